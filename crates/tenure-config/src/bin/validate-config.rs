//! Config validation CLI tool
//!
//! Validates a tenure configuration file and reports any errors.

use std::path::PathBuf;
use std::process::ExitCode;
use tenure_api::EntitlementKind;
use tenure_util::default_config_path;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a tenure configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config config.example.toml");
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match tenure_config::load_config(&config_path) {
        Ok(policy) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", tenure_config::CURRENT_CONFIG_VERSION);
            println!("  Data dir: {}", policy.service.data_dir.display());
            println!("  Sweep every: {}s", policy.service.sweep_interval.as_secs());
            println!("  Alerts every: {}s", policy.service.alert_interval.as_secs());
            match &policy.mail {
                Some(mail) => println!("  Mail: {}:{} as {}", mail.host, mail.port, mail.from),
                None => println!("  Mail: not configured (alerts will stay pending)"),
            }

            println!();
            println!("Kinds:");
            for kind in EntitlementKind::ALL {
                let k = policy.kind(kind);
                println!(
                    "  - {}: thresholds {:?} days, near expiry at {} days, recipient {}",
                    kind,
                    k.thresholds_days,
                    k.near_expiry_days,
                    if k.require_recipient { "required" } else { "optional" }
                );
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                tenure_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                tenure_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                tenure_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                tenure_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        tenure_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
