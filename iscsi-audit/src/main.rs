use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use iscsi_audit::audit::run_audit;
use iscsi_audit::cleanup::cleanup_orphaned_targets_until;
use iscsi_audit::config::{AuditConfig, CleanupConfig};
use iscsi_audit::metrics;
use iscsi_audit::report::{self, Report};
use truenas_client::{ClientConfig, TrueNasClient};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "iscsi-audit")]
#[command(about = "Audit TrueNAS iSCSI exports for orphaned targets and extents")]
struct Args {
    /// TrueNAS hostname or address
    #[arg(long, env = "TRUENAS_HOST")]
    host: String,

    /// TrueNAS API port
    #[arg(long, env = "TRUENAS_PORT", default_value = "443")]
    port: u16,

    /// URL scheme (http or https)
    #[arg(long, env = "TRUENAS_SCHEME", default_value = "https")]
    scheme: String,

    /// TrueNAS API key
    #[arg(long, env = "TRUENAS_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Accept self-signed TLS certificates
    #[arg(long, env = "TRUENAS_ALLOW_INSECURE")]
    allow_insecure: bool,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "60")]
    timeout_secs: u64,

    /// Retries for transient read failures
    #[arg(long, default_value = "3")]
    max_retries: u32,

    /// Parent dataset holding the volumes (e.g., tank/k8s/volumes)
    #[arg(long, env = "PARENT_DATASET", required_unless_present = "debug_sessions")]
    parent_dataset: Option<String>,

    /// Maximum existence probes in flight
    #[arg(long, default_value = "1")]
    probe_concurrency: usize,

    /// Delete targets that have neither an extent nor a dataset
    #[arg(long)]
    cleanup: bool,

    /// Only report what cleanup would delete (pass --dry-run=false to delete)
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    dry_run: bool,

    /// Report format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Write Prometheus metrics to this file at the end of the run
    #[arg(long, env = "METRICS_TEXTFILE")]
    metrics_textfile: Option<PathBuf>,

    /// Dump raw session records and exit
    #[arg(long)]
    debug_sessions: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout carries the report
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let metrics_handle = match args.metrics_textfile {
        Some(_) => Some(
            metrics::init_metrics()
                .map_err(|e| format!("Failed to initialize metrics: {}", e))?,
        ),
        None => None,
    };

    let client_config = ClientConfig {
        host: args.host.clone(),
        port: args.port,
        scheme: args.scheme.clone(),
        api_key: args.api_key.clone(),
        allow_insecure: args.allow_insecure,
        timeout: Duration::from_secs(args.timeout_secs),
        max_retries: args.max_retries,
    };
    let client = TrueNasClient::new(&client_config)?;

    info!("Using TrueNAS API at {}", client_config.base_url());
    if args.allow_insecure {
        warn!("TLS certificate verification disabled");
    }

    if args.debug_sessions {
        let sessions = client.raw_sessions().await?;
        print!("{}", report::render_raw_sessions(&sessions));
        return Ok(());
    }

    let parent_dataset = args
        .parent_dataset
        .as_deref()
        .ok_or("--parent-dataset is required")?;
    let audit_config =
        AuditConfig::new(parent_dataset)?.with_probe_concurrency(args.probe_concurrency)?;
    let cleanup_config = CleanupConfig {
        enabled: args.cleanup,
        dry_run: args.dry_run,
    };

    info!(
        parent_dataset = audit_config.parent_dataset(),
        probe_concurrency = audit_config.probe_concurrency(),
        "Starting audit"
    );

    let result = tokio::select! {
        result = run_audit(&client, &audit_config) => result?,
        _ = shutdown_signal() => {
            error!("Interrupted, audit aborted");
            return Err("audit interrupted".into());
        }
    };

    let summary = if cleanup_config.enabled {
        let candidates = result.cleanup_candidates();
        if candidates.is_empty() {
            info!("No orphaned targets to clean up");
            None
        } else {
            if cleanup_config.dry_run {
                info!("Dry run mode, no changes will be made");
            }
            Some(
                cleanup_orphaned_targets_until(
                    &client,
                    candidates,
                    cleanup_config.dry_run,
                    shutdown_signal(),
                )
                .await,
            )
        }
    } else {
        None
    };

    match args.format {
        OutputFormat::Text => {
            print!("{}", report::render_text(audit_config.parent_dataset(), &result));
            if let Some(summary) = &summary {
                println!();
                print!("{}", report::render_cleanup(summary));
            }
        }
        OutputFormat::Json => {
            let report = Report {
                parent_dataset: audit_config.parent_dataset(),
                audit: &result,
                cleanup: summary.as_ref(),
            };
            println!("{}", report.to_json()?);
        }
    }

    if let (Some(handle), Some(path)) = (&metrics_handle, &args.metrics_textfile) {
        metrics::write_textfile(handle, path)
            .map_err(|e| format!("Failed to write metrics to {}: {}", path.display(), e))?;
    }

    if summary.as_ref().is_some_and(|s| s.interrupted()) {
        error!("Interrupted, cleanup stopped part way");
        return Err("cleanup interrupted".into());
    }

    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    use signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            None
        }
    };

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => Some(s),
        Err(e) => {
            error!("Failed to install SIGINT handler: {}", e);
            None
        }
    };

    tokio::select! {
        Some(_) = async { sigterm.as_mut()?.recv().await }, if sigterm.is_some() => {
            info!("Received SIGTERM");
        }
        Some(_) = async { sigint.as_mut()?.recv().await }, if sigint.is_some() => {
            info!("Received SIGINT");
        }
        else => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONNECTION: [&str; 5] = ["iscsi-audit", "--host", "nas", "--api-key", "1-abc"];

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(CONNECTION.iter().chain(extra))
    }

    #[test]
    fn test_debug_sessions_needs_no_dataset() {
        let args = parse(&["--debug-sessions"]).unwrap();
        assert!(args.debug_sessions);
        assert_eq!(args.parent_dataset, None);
    }

    #[test]
    fn test_audit_requires_dataset() {
        assert!(parse(&[]).is_err());

        let args = parse(&["--parent-dataset", "tank/csi"]).unwrap();
        assert_eq!(args.parent_dataset.as_deref(), Some("tank/csi"));
    }

    #[test]
    fn test_dry_run_defaults_on() {
        let args = parse(&["--parent-dataset", "tank", "--cleanup"]).unwrap();
        assert!(args.cleanup);
        assert!(args.dry_run);

        let args = parse(&["--parent-dataset", "tank", "--cleanup", "--dry-run=false"]).unwrap();
        assert!(!args.dry_run);
    }
}
