mod config;

use clap::Parser;
use config::Config;
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics_defs::MetricType;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "plexus", about = "Backend-for-frontend aggregation gateway")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, short)]
    config: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            process::exit(1);
        }
    };

    init_tracing();
    let _sentry_guard = init_sentry(&config);
    if let Err(e) = init_metrics(&config) {
        eprintln!("Failed to install metrics recorder: {e}");
        process::exit(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(gateway::run(config.gateway, config.aggregator)) {
        tracing::error!(error = %e, "gateway exited with error");
        process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn init_sentry(config: &Config) -> Option<sentry::ClientInitGuard> {
    config.common.logging.as_ref().map(|logging| {
        sentry::init((
            logging.sentry_dsn.clone(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    })
}

fn init_metrics(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let Some(metrics_config) = &config.common.metrics else {
        return Ok(());
    };

    let recorder = StatsdBuilder::from(
        metrics_config.statsd_host.as_str(),
        metrics_config.statsd_port,
    )
    .build(Some("plexus"))?;
    metrics::set_global_recorder(recorder).map_err(|e| e.to_string())?;
    describe_metrics();

    Ok(())
}

fn describe_metrics() {
    let all = aggregator::metrics_defs::ALL_METRICS
        .iter()
        .chain(gateway::metrics_defs::ALL_METRICS);
    for def in all {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
}
