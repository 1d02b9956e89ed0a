//! tenured - The tenure background service
//!
//! This is the main entry point for the tenured service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Notification channel (SMTP or disabled)
//! - The tenure engine
//! - Scheduled sweeps, alert passes and expiring-soon reports

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tenure_config::{Policy, load_config};
use tenure_core::TenureEngine;
use tenure_notify::{DisabledChannel, NotificationChannel, SmtpChannel};
use tenure_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use tenure_util::{DATABASE_FILENAME, SystemClock, TenureError, default_config_path};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// tenured - License and entitlement expiry service
#[derive(Parser, Debug)]
#[command(name = "tenured")]
#[command(about = "License and entitlement expiry service", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/tenure/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set TENURE_DATA_DIR env var)
    #[arg(short, long, env = "TENURE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

/// Main service state
struct Service {
    engine: Arc<TenureEngine>,
    store: Arc<dyn Store>,
    shutdown: Arc<AtomicBool>,
}

impl Service {
    fn new(args: &Args) -> Result<Self> {
        // Load configuration
        let policy = if args.config.exists() {
            load_config(&args.config)
                .with_context(|| format!("Failed to load config from {:?}", args.config))?
        } else {
            warn!(
                config_path = %args.config.display(),
                "Config file not found, using defaults"
            );
            Policy::default()
        };

        info!(
            config_path = %args.config.display(),
            sweep_interval_secs = policy.service.sweep_interval.as_secs(),
            alert_interval_secs = policy.service.alert_interval.as_secs(),
            mail = policy.mail.is_some(),
            "Configuration loaded"
        );

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| policy.service.data_dir.clone());

        // Create data directory
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        // Initialize store
        let db_path = data_dir.join(DATABASE_FILENAME);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );
        if !store.is_healthy() {
            anyhow::bail!("Database {:?} failed its health check", db_path);
        }

        info!(db_path = %db_path.display(), "Store initialized");

        // Log service start
        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        // Initialize notification channel
        let channel: Arc<dyn NotificationChannel> = match &policy.mail {
            Some(mail) => {
                let smtp = SmtpChannel::from_config(mail)
                    .with_context(|| format!("Failed to set up SMTP relay {}", mail.host))?;
                info!(host = %mail.host, port = mail.port, "SMTP channel initialized");
                Arc::new(smtp)
            }
            None => {
                warn!("No [mail] section configured, alerts will stay pending");
                Arc::new(DisabledChannel)
            }
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let engine = TenureEngine::new(policy, store.clone(), channel, Arc::new(SystemClock))
            .with_shutdown(shutdown.clone());

        Ok(Self {
            engine: Arc::new(engine),
            store,
            shutdown,
        })
    }

    async fn run(self) -> Result<()> {
        let service = &self.engine.policy().service;

        // Set up signal handlers. The flag stops a sweep between rows; the
        // notify wakes the loop below once the current job returns.
        let stop = Arc::new(Notify::new());
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        {
            let shutdown = self.shutdown.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
                    _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
                }
                shutdown.store(true, Ordering::SeqCst);
                stop.notify_one();
            });
        }

        let mut sweep_timer = tokio::time::interval(service.sweep_interval);
        let mut alert_timer = tokio::time::interval(service.alert_interval);
        let mut report_timer = tokio::time::interval(service.report_interval);
        for timer in [&mut sweep_timer, &mut alert_timer, &mut report_timer] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        info!("Service running");

        loop {
            tokio::select! {
                _ = stop.notified() => break,

                _ = sweep_timer.tick() => {
                    if let Some(report) = run_job(&self.engine, "sweep", |e| e.run_sweep()).await {
                        debug!(
                            run_id = %report.run_id,
                            rows_written = report.rows_written(),
                            "Sweep job finished"
                        );
                    }
                }

                _ = alert_timer.tick() => {
                    if let Some(report) = run_job(&self.engine, "alerts", |e| e.run_alerts()).await
                        && (!report.sent.is_empty() || report.failed > 0)
                    {
                        info!(
                            run_id = %report.run_id,
                            sent = report.sent.len(),
                            failed = report.failed,
                            skipped_no_recipient = report.skipped_no_recipient,
                            "Alert pass completed"
                        );
                    }
                }

                _ = report_timer.tick() => {
                    run_job(&self.engine, "expiring-report", |e| e.report_expiring()).await;
                }
            }

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
        }

        // Graceful shutdown
        info!("Shutting down tenured");

        if let Err(e) = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStopped))
        {
            warn!(error = %e, "Failed to log service shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

/// Run a synchronous engine job off the async runtime
async fn run_job<T, F>(engine: &Arc<TenureEngine>, name: &'static str, job: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(&TenureEngine) -> Result<T, TenureError> + Send + 'static,
{
    let engine = engine.clone();
    match tokio::task::spawn_blocking(move || job(engine.as_ref())).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!(job = name, error = %e, "Job failed");
            None
        }
        Err(e) => {
            error!(job = name, error = %e, "Job panicked or was cancelled");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mock_time = tenure_util::is_mock_time_active(),
        "tenured starting"
    );

    // Create and run the service
    let service = Service::new(&args)?;
    service.run().await
}
