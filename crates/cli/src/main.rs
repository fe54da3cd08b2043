//! `syncflow` entry point.

use std::process::ExitCode;

use cli::{Config, RunOutcome};
use dht::InMemoryDht;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("syncflow: {error}");
            return ExitCode::from(2);
        }
    };

    // 2. Initialize tracing
    init_tracing(&config);

    // 3. Install Prometheus metrics recorder
    let metrics_handle = match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()
    {
        Ok(handle) => Some(handle),
        Err(error) => {
            tracing::warn!(%error, "metrics disabled");
            None
        }
    };

    // 4. Run the upload
    let dht = InMemoryDht::new();
    let succeeded = match cli::run_upload(&config, &dht).await {
        Ok(RunOutcome::Uploaded(meta)) => {
            tracing::info!(
                file_id = %meta.file_id,
                size = meta.size,
                chunks = meta.chunk_count,
                entries = dht.entry_count().await,
                "file stored"
            );
            true
        }
        Ok(RunOutcome::RolledBack(reason) | RunOutcome::TimedOut(reason)) => {
            tracing::error!(hint = reason.hint(), "upload failed");
            tracing::debug!(cause = %reason.cause(), "failure cause");
            false
        }
        Err(error) => {
            tracing::error!(%error, "upload could not run");
            false
        }
    };
    metrics::counter!("syncflow_runs_total", "success" => succeeded.to_string())
        .increment(1);

    // 5. Print metrics snapshot
    if config.print_metrics
        && let Some(handle) = &metrics_handle
    {
        println!("{}", handle.render());
    }

    if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
