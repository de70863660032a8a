//! vice-president - TLS certificate lifecycle for Kubernetes ingresses
//!
//! The binary offers an offline check of certificate material: it runs the
//! validator and the revocation checker against a certificate and key on
//! disk and prints the action the reconciler would take.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use config::LogFormat;
use vice_president::models::{CertificateMaterial, HostState, Secret};
use vice_president::services::secret::{self, SecretKeys};
use vice_president::services::{decide, Evaluator, RemoteComparer, RevocationChecker};
use vice_president::{config, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    // Check for --help flag
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }

    // Check for --version flag
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("vice-president {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Check for --init-config flag
    if let Some(pos) = args.iter().position(|arg| arg == "--init-config") {
        let path = args
            .get(pos + 1)
            .map(PathBuf::from)
            .context("--init-config requires a path")?;
        AppConfig::create_default_config(&path)
            .with_context(|| format!("Failed to write configuration to {:?}", path))?;
        println!("Default configuration written to {:?}", path);
        return Ok(());
    }

    // Load configuration first (before logging, so we know log format)
    let config = AppConfig::load().context("Failed to load configuration")?;

    // The guard must be kept alive for the duration of the program
    // to ensure log messages are flushed to files
    let _log_guard = init_logging(&config);

    if let Some(pos) = args.iter().position(|arg| arg == "--check") {
        let operands = args.get(pos + 1..pos + 4).context(
            "--check requires <cert.pem> <key.pem> <host>, see --help",
        )?;
        return check(&config, &operands[0], &operands[1], &operands[2]).await;
    }

    print_help();
    Ok(())
}

/// Evaluate certificate material on disk and print the resulting decision
async fn check(config: &AppConfig, cert_path: &str, key_path: &str, host: &str) -> Result<()> {
    info!(certificate = %cert_path, key = %key_path, host = %host, "Checking certificate material");

    let keys = SecretKeys::default();
    let mut secret = Secret::new("local", "check");
    secret.data.insert(
        keys.cert.clone(),
        std::fs::read(cert_path).with_context(|| format!("Failed to read {}", cert_path))?,
    );
    secret.data.insert(
        keys.key.clone(),
        std::fs::read(key_path).with_context(|| format!("Failed to read {}", key_path))?,
    );

    let material = CertificateMaterial::new(host, [host]).context("Invalid host")?;
    let decoded = secret::decode(&secret, &keys);

    let revocation = RevocationChecker::new(
        &config.certificates.issuer_cache_dir,
        Duration::from_secs(config.vice.timeout_secs),
    )
    .context("Failed to initialize revocation checker")?;
    let evaluator = Evaluator::new(Arc::new(revocation), config.certificates.min_validity_days);

    let host_state = HostState::from_annotations(&Default::default(), material.host());
    let evaluation = evaluator.evaluate(&decoded, &material, host_state, false).await;
    let decision = decide(&evaluation);

    match decoded {
        Ok(ref found) => {
            if let Some(ref certificate) = found.certificate {
                println!("Certificate:  {}", certificate.common_name().unwrap_or("-"));
                println!("  SANs:       {}", certificate.dns_names().join(", "));
                println!("  Serial:     {}", certificate.serial_hex());
                println!("  Not before: {}", certificate.not_before());
                println!("  Not after:  {}", certificate.not_after());

                if config.certificates.validate_remote {
                    let remote = RemoteComparer::new(
                        config.certificates.remote_port,
                        config.certificates.placeholder_common_names.clone(),
                    )
                    .context("Failed to initialize remote comparison")?;
                    let matches = remote.remote_matches(material.host(), certificate).await;
                    println!("  Served:     {}", if matches { "matches" } else { "differs" });
                }
            }
        }
        Err(ref e) => println!("Material:     {}", e),
    }

    println!("Revoked:      {}", evaluation.revoked);
    println!("Expires soon: {}", evaluation.expires_soon);
    println!("State:        {}", evaluation.current_state());
    println!("Action:       {} ({})", decision.action, decision.reason);

    Ok(())
}

/// Initialize the logging/tracing infrastructure
fn init_logging(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use config::LogTarget;
    use tracing_subscriber::{prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let log_config = &config.logging;

    match &log_config.target {
        LogTarget::Console => {
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_console_logging(subscriber, &log_config.format);
            None
        }
        LogTarget::File => {
            let (writer, guard) = create_file_writer(log_config);
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_file_logging(subscriber, &log_config.format, writer);
            Some(guard)
        }
        LogTarget::Both => {
            let (writer, guard) = create_file_writer(log_config);
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_both_logging(subscriber, &log_config.format, writer);
            Some(guard)
        }
    }
}

/// Create a file writer with optional daily rotation
fn create_file_writer(
    log_config: &config::LoggingConfig,
) -> (
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
) {
    if let Err(e) = std::fs::create_dir_all(&log_config.log_dir) {
        eprintln!(
            "Warning: Failed to create log directory {:?}: {}",
            log_config.log_dir, e
        );
    }

    let file_appender = if log_config.daily_rotation {
        tracing_appender::rolling::daily(&log_config.log_dir, &log_config.log_prefix)
    } else {
        tracing_appender::rolling::never(&log_config.log_dir, &log_config.log_prefix)
    };

    tracing_appender::non_blocking(file_appender)
}

/// Console output goes to stderr so `--check` results stay parseable on stdout
fn init_console_logging<S>(subscriber: S, format: &LogFormat)
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
    use tracing_subscriber::{fmt, prelude::*};

    match format {
        LogFormat::Json => {
            subscriber
                .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Compact => {
            subscriber
                .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            subscriber
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    }
}

/// Initialize file-only logging
fn init_file_logging<S>(
    subscriber: S,
    format: &LogFormat,
    writer: tracing_appender::non_blocking::NonBlocking,
) where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
    use tracing_subscriber::{fmt, prelude::*};

    match format {
        LogFormat::Json => {
            subscriber
                .with(fmt::layer().json().with_target(true).with_writer(writer))
                .init();
        }
        LogFormat::Compact => {
            subscriber
                .with(fmt::layer().compact().with_target(false).with_writer(writer))
                .init();
        }
        LogFormat::Pretty => {
            subscriber
                .with(fmt::layer().with_target(true).with_ansi(false).with_writer(writer))
                .init();
        }
    }
}

/// Initialize both console and file logging
fn init_both_logging<S>(
    subscriber: S,
    format: &LogFormat,
    writer: tracing_appender::non_blocking::NonBlocking,
) where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
    use tracing_subscriber::{fmt, prelude::*};

    match format {
        LogFormat::Json => {
            subscriber
                .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
                .with(fmt::layer().json().with_target(true).with_writer(writer))
                .init();
        }
        LogFormat::Compact => {
            subscriber
                .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
                .with(fmt::layer().compact().with_target(false).with_writer(writer))
                .init();
        }
        LogFormat::Pretty => {
            subscriber
                .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
                .with(fmt::layer().with_target(true).with_ansi(false).with_writer(writer))
                .init();
        }
    }
}

/// Print help message
fn print_help() {
    println!(
        r#"vice-president {}

USAGE:
    vice-president [OPTIONS]

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information
    --check <cert.pem> <key.pem> <host>
                            Validate a certificate and key for a host, check
                            revocation and print the action the reconciler
                            would take.
    --init-config <path>    Write a configuration file with default values.

ENVIRONMENT:
    VICE_PRESIDENT_CONFIG   Path to configuration file (default: config.yaml)
    VICE_URL, VICE_CERT, VICE_KEY
                            Override the CA endpoint and client credentials
    VICE_PRESIDENT_MIN_VALIDITY_DAYS
                            Override the renewal horizon
    RUST_LOG, VICE_PRESIDENT_LOG_FORMAT
                            Override log level and format

CONFIGURATION:
    The configuration file is looked up in the following order:
    1. Path specified by VICE_PRESIDENT_CONFIG environment variable
    2. ./config.yaml
    3. ./config/config.yaml
    4. /etc/vice-president/config.yaml
    5. $XDG_CONFIG_HOME/vice-president/config.yaml"#,
        env!("CARGO_PKG_VERSION")
    );
}
