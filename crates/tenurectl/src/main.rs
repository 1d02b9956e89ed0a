//! tenurectl - Admin CLI for tenure
//!
//! Works directly against the service database, so it can be used with or
//! without tenured running.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tenure_api::{EntitlementKind, EntitlementView, GrantView};
use tenure_config::{Policy, load_config};
use tenure_core::{GrantUpdate, NewEntitlement, TenureEngine};
use tenure_notify::{DisabledChannel, NotificationChannel, SmtpChannel};
use tenure_store::SqliteStore;
use tenure_util::{
    DATABASE_FILENAME, DurationSpec, EntitlementId, MOCK_TIME_FORMAT, SystemClock,
    default_config_path, format_datetime_full,
};
use tracing_subscriber::EnvFilter;

/// tenurectl - Manage tenure grants and entitlements
#[derive(Parser, Debug)]
#[command(name = "tenurectl")]
#[command(about = "Manage tenure grants and entitlements", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (default: ~/.config/tenure/config.toml)
    #[arg(short, long, global = true, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set TENURE_DATA_DIR env var)
    #[arg(short, long, global = true, env = "TENURE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log level
    #[arg(short, long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage MAC-keyed grants
    Grant {
        #[command(subcommand)]
        command: GrantCommand,
    },

    /// Validate a presented identifier, as a client would
    Validate {
        /// MAC address (`AA-BB-...` or `AA:BB:...`)
        identifier: String,
    },

    /// Manage certificates and project subscriptions
    Entitlement {
        #[command(subcommand)]
        command: EntitlementCommand,
    },

    /// Run one sweep now
    Sweep,

    /// Run one alert pass now
    Alerts,

    /// List active grants expiring within a window
    Expiring {
        /// Window in days (default: the configured report window)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Show recent audit events
    Audit {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
enum GrantCommand {
    /// Issue a grant starting now
    Create {
        identifier: String,
        /// Company the grant is issued to
        owner: String,
        /// Validity period, e.g. "10 horas", "1 mes"
        duration: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Restart a grant from now and reactivate it
    Regrant {
        identifier: String,
        /// New validity period (default: keep the current one)
        duration: Option<String>,
    },
    /// Edit owner, note, identifier or duration; the anchor is kept
    Update {
        identifier: String,
        #[arg(long)]
        owner: Option<String>,
        /// Empty string clears the note
        #[arg(long)]
        note: Option<String>,
        /// New MAC address
        #[arg(long)]
        mac: Option<String>,
        /// New validity period, counted from the original anchor
        #[arg(long)]
        duration: Option<String>,
    },
    /// Deactivate a grant
    Revoke { identifier: String },
    /// Remove a grant
    Delete { identifier: String },
    /// Show one grant
    Show { identifier: String },
    /// List all grants
    List,
    /// Find grants by owner or MAC fragment, ignoring case
    Search { query: String },
}

#[derive(Subcommand, Debug)]
enum EntitlementCommand {
    /// Register a certificate or project subscription
    Add {
        /// certificate | project
        kind: EntitlementKind,
        /// Certificate number or product id, unique per kind
        reference: String,
        /// Validity period, e.g. "1 año"
        duration: DurationSpec,
        #[arg(long, default_value = "")]
        label: String,
        /// Start of validity (default: now)
        #[arg(long, value_parser = parse_anchor)]
        anchor: Option<DateTime<Utc>>,
        /// Primary alert recipient
        #[arg(long)]
        to: Option<String>,
        /// Additional alert recipients
        #[arg(long)]
        cc: Vec<String>,
    },
    /// Move the anchor or change the duration; clears sent alerts
    Reschedule {
        id: i64,
        #[arg(long, value_parser = parse_anchor)]
        anchor: Option<DateTime<Utc>>,
        #[arg(long)]
        duration: Option<DurationSpec>,
    },
    /// Replace the alert recipients
    Recipients {
        id: i64,
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        cc: Vec<String>,
    },
    /// Cancel an entitlement; it is kept but no longer swept or alerted
    Deactivate { id: i64 },
    /// Undo a cancellation
    Reactivate { id: i64 },
    /// Remove an entitlement
    Delete { id: i64 },
    /// Show one entitlement
    Show { id: i64 },
    /// List entitlements
    List {
        #[arg(long)]
        kind: Option<EntitlementKind>,
    },
    /// Count entitlements per state
    Counts {
        #[arg(long)]
        kind: Option<EntitlementKind>,
    },
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD`, all as UTC
fn parse_anchor(text: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Ok(instant.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, MOCK_TIME_FORMAT) {
        return Ok(naive.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("'{}' is not a date (expected YYYY-MM-DD)", text))
}

fn open_engine(cli: &Cli) -> Result<TenureEngine> {
    let policy = if cli.config.exists() {
        load_config(&cli.config)
            .with_context(|| format!("Failed to load config from {:?}", cli.config))?
    } else {
        Policy::default()
    };

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| policy.service.data_dir.clone());
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

    let db_path = data_dir.join(DATABASE_FILENAME);
    let store = Arc::new(
        SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open database {:?}", db_path))?,
    );

    let channel: Arc<dyn NotificationChannel> = match &policy.mail {
        Some(mail) => Arc::new(
            SmtpChannel::from_config(mail)
                .with_context(|| format!("Failed to set up SMTP relay {}", mail.host))?,
        ),
        None => Arc::new(DisabledChannel),
    };

    Ok(TenureEngine::new(policy, store, channel, Arc::new(SystemClock)))
}

fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

fn print_grant(view: &GrantView) {
    println!(
        "{}  {:<24} {:<10} expires {}  ({})",
        view.identifier,
        view.owner,
        view.state.to_string(),
        format_datetime_full(&view.expires_at),
        view.remaining,
    );
}

fn print_entitlement(view: &EntitlementView) {
    let sent: Vec<String> = view.alerts_sent.iter().map(u32::to_string).collect();
    let state = if view.active {
        view.state.to_string()
    } else {
        "cancelled".to_string()
    };
    println!(
        "#{:<4} {:<11} {:<12} {:<11} expires {}  {} días  alerts [{}]  {}",
        view.id,
        view.kind.to_string(),
        view.reference,
        state,
        format_datetime_full(&view.expires_at),
        view.remaining_days,
        sent.join(","),
        view.label,
    );
}

fn run_grant(engine: &TenureEngine, json: bool, command: GrantCommand) -> Result<()> {
    let registry = engine.registry();
    match command {
        GrantCommand::Create {
            identifier,
            owner,
            duration,
            note,
        } => {
            let view = registry.create_grant(&identifier, &owner, &duration, note)?;
            emit(json, &view, print_grant)
        }
        GrantCommand::Regrant {
            identifier,
            duration,
        } => {
            let view = registry.regrant_grant(&identifier, duration.as_deref())?;
            emit(json, &view, print_grant)
        }
        GrantCommand::Update {
            identifier,
            owner,
            note,
            mac,
            duration,
        } => {
            let view = registry.update_grant(
                &identifier,
                GrantUpdate {
                    identifier: mac,
                    owner,
                    note,
                    duration,
                },
            )?;
            emit(json, &view, print_grant)
        }
        GrantCommand::Revoke { identifier } => {
            let view = registry.revoke_grant(&identifier)?;
            emit(json, &view, print_grant)
        }
        GrantCommand::Delete { identifier } => {
            registry.delete_grant(&identifier)?;
            if !json {
                println!("Deleted grant {}", identifier);
            }
            Ok(())
        }
        GrantCommand::Show { identifier } => {
            let view = registry.get_grant(&identifier)?;
            emit(json, &view, print_grant)
        }
        GrantCommand::List => {
            let views = registry.list_grants()?;
            emit(json, &views, |views| views.iter().for_each(print_grant))
        }
        GrantCommand::Search { query } => {
            let views = registry.search_grants(&query)?;
            emit(json, &views, |views| {
                if views.is_empty() {
                    println!("No grants match '{}'", query);
                }
                views.iter().for_each(print_grant)
            })
        }
    }
}

fn run_entitlement(engine: &TenureEngine, json: bool, command: EntitlementCommand) -> Result<()> {
    let registry = engine.registry();
    match command {
        EntitlementCommand::Add {
            kind,
            reference,
            duration,
            label,
            anchor,
            to,
            cc,
        } => {
            let label = if label.is_empty() {
                format!("{} {}", kind, reference)
            } else {
                label
            };
            let view = registry.create_entitlement(NewEntitlement {
                kind,
                reference,
                label,
                duration,
                anchor,
                primary_recipient: to,
                secondary_recipients: cc,
            })?;
            emit(json, &view, print_entitlement)
        }
        EntitlementCommand::Reschedule {
            id,
            anchor,
            duration,
        } => {
            if anchor.is_none() && duration.is_none() {
                anyhow::bail!("Nothing to reschedule: pass --anchor and/or --duration");
            }
            let view = registry.reschedule_entitlement(EntitlementId::new(id), anchor, duration)?;
            emit(json, &view, print_entitlement)
        }
        EntitlementCommand::Recipients { id, to, cc } => {
            let view = registry.set_recipients(EntitlementId::new(id), to, cc)?;
            emit(json, &view, |view| {
                print_entitlement(view);
                println!("      recipients: {}", view.recipients.join(", "));
            })
        }
        EntitlementCommand::Deactivate { id } => {
            let view = registry.deactivate_entitlement(EntitlementId::new(id))?;
            emit(json, &view, print_entitlement)
        }
        EntitlementCommand::Reactivate { id } => {
            let view = registry.reactivate_entitlement(EntitlementId::new(id))?;
            emit(json, &view, print_entitlement)
        }
        EntitlementCommand::Delete { id } => {
            registry.delete_entitlement(EntitlementId::new(id))?;
            if !json {
                println!("Deleted entitlement #{}", id);
            }
            Ok(())
        }
        EntitlementCommand::Show { id } => {
            let view = registry.get_entitlement(EntitlementId::new(id))?;
            emit(json, &view, |view| {
                print_entitlement(view);
                println!("      recipients: {}", view.recipients.join(", "));
            })
        }
        EntitlementCommand::List { kind } => {
            let views = registry.list_entitlements(kind)?;
            emit(json, &views, |views| views.iter().for_each(print_entitlement))
        }
        EntitlementCommand::Counts { kind } => {
            let counts = registry.count_entitlements(kind)?;
            emit(json, &counts, |c| {
                println!("active       {}", c.active);
                println!("near_expiry  {}", c.near_expiry);
                println!("expired      {}", c.expired);
                println!("cancelled    {}", c.cancelled);
                println!("total        {}", c.total());
            })
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let engine = open_engine(&cli)?;
    let json = cli.json;

    match cli.command {
        Commands::Grant { command } => run_grant(&engine, json, command),
        Commands::Entitlement { command } => run_entitlement(&engine, json, command),
        Commands::Validate { identifier } => {
            let outcome = engine.validate(&identifier)?;
            emit(json, &outcome, |outcome| match (&outcome.entity_label, &outcome.remaining) {
                (Some(owner), Some(remaining)) => {
                    println!("{}  {}  ({})", outcome.code, owner, remaining)
                }
                _ => println!("{}", outcome.code),
            })
        }
        Commands::Sweep => {
            let report = engine.run_sweep()?;
            emit(json, &report, |r| {
                println!(
                    "Sweep {}: {} grants checked, {} deactivated; {} entitlements checked, {} updated; {} failures{}",
                    r.run_id,
                    r.grants_checked,
                    r.grants_deactivated,
                    r.entitlements_checked,
                    r.entitlements_updated,
                    r.failures,
                    if r.interrupted { " (interrupted)" } else { "" },
                )
            })
        }
        Commands::Alerts => {
            let report = engine.run_alerts()?;
            emit(json, &report, |r| {
                for sent in &r.sent {
                    println!(
                        "Sent {} {} ({} días) to {}",
                        sent.kind,
                        sent.reference,
                        sent.threshold_days,
                        sent.recipients.join(", ")
                    );
                }
                println!(
                    "{} evaluated, {} sent, {} without recipient, {} failed, {} conflicts",
                    r.evaluated,
                    r.sent.len(),
                    r.skipped_no_recipient,
                    r.failed,
                    r.conflicts,
                );
            })
        }
        Commands::Expiring { days } => {
            let window = days.unwrap_or(engine.policy().service.report_window_days);
            let expiring = engine.sweeper().report_expiring(window)?;
            emit(json, &expiring, |grants| {
                for g in grants {
                    println!(
                        "{}  {:<24} expires {}  ({})",
                        g.identifier,
                        g.owner,
                        format_datetime_full(&g.expires_at),
                        g.remaining,
                    );
                }
            })
        }
        Commands::Audit { limit } => {
            let events = engine.registry().recent_audits(limit)?;
            emit(json, &events, |events| {
                for event in events {
                    let detail = serde_json::to_string(&event.event).unwrap_or_default();
                    println!("{}  {}", format_datetime_full(&event.timestamp), detail);
                }
            })
        }
    }
}
