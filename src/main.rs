//! # reseal
//!
//! Re-encrypts SealedSecrets under the sealing controller's active public key
//! after a key rotation.
//!
//! Exit codes:
//!
//! - `0` every item updated or already up to date
//! - `1` at least one item failed or was skipped for a missing plaintext Secret
//! - `2` a fatal condition aborted the run (or setup failed)

use clap::Parser;
use sealed_secret_rekeyer::cli::Cli;
use sealed_secret_rekeyer::controller::Orchestrator;
use sealed_secret_rekeyer::observability::metrics;
use sealed_secret_rekeyer::runtime::{exit_code_for, init_process, initialize, EXIT_FATAL};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_process(cli.verbose);

    let config = match cli.into_config() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("{e:#}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let collaborators = match initialize(&config).await {
        Ok(collaborators) => collaborators,
        Err(e) => {
            error!("Initialization failed: {e:#}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let orchestrator = Orchestrator::new(Arc::clone(&config), collaborators);

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let summary = orchestrator.run().await;
    print!("{}", summary.render(config.verbose));

    if let Some(path) = &config.metrics_file {
        if let Err(e) = metrics::write_textfile(path) {
            warn!("Failed to write metrics: {e:#}");
        }
    }

    exit_code_for(&summary)
}
