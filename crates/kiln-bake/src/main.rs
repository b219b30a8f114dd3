//! Kiln bake binary.
//!
//! Bakes a named, reusable image from a disposable control-plane
//! instance. Exit code 0 on full success, 1 on any fatal error with the
//! diagnostic written to stderr.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kiln_bake::{pipeline, valid_alias, BakeConfig, BakeError};
use kiln_client::RestControlPlane;

#[derive(Parser)]
#[command(name = "kiln-bake")]
#[command(about = "Bake a reusable image from a disposable instance")]
#[command(version)]
struct Cli {
    /// Target image alias (alphanumerics, hyphen and underscore)
    alias: String,

    /// Path to the configuration file
    #[arg(short, long, default_value = "kiln.toml")]
    config: PathBuf,

    /// Leave the build instance in place for debugging
    #[arg(long)]
    keep_instance: bool,

    /// Poll interval override in seconds for operation waits
    #[arg(long)]
    poll_interval: Option<u64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("kiln_bake=info".parse().expect("valid directive"))
                .add_directive("kiln_client=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), BakeError> {
    if !valid_alias(&cli.alias) {
        return Err(BakeError::Config(format!(
            "invalid alias '{}': only alphanumerics, '-' and '_' are allowed",
            cli.alias
        )));
    }

    let config = BakeConfig::from_file(&cli.config)?;
    config.validate()?;

    let mut plane = RestControlPlane::new(&config.api.client_config()?)?;
    if let Some(secs) = cli.poll_interval {
        plane = plane.with_poll_interval(Duration::from_secs(secs.max(1)));
    }

    let cancel = CancellationToken::new();
    tokio::spawn(interrupt_listener(cancel.clone()));

    let outcome = pipeline::run(&plane, &config, &cli.alias, cli.keep_instance, &cancel).await?;

    info!(
        alias = %outcome.alias,
        fingerprint = %outcome.fingerprint,
        "image published"
    );
    println!("{}: {}", outcome.alias, outcome.fingerprint);
    Ok(())
}

/// Cancel the run on Ctrl+C or SIGTERM.
///
/// The token is cancelled once; a second signal during cleanup finds it
/// already cancelled and does not re-enter teardown.
async fn interrupt_listener(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, cancelling run"),
        () = terminate => info!("received SIGTERM, cancelling run"),
    }
    cancel.cancel();
}
