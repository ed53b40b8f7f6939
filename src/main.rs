use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kvsoak::{
    config::{Args, Backend, ReportFormat},
    report::{JsonReporter, StdoutReporter},
    store::{memory::MemoryConnection, redis::RedisConnection},
    Runner, SoakReport,
};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(threads) = args.worker_threads {
        builder.worker_threads(threads);
    }
    let runtime = builder.build().context("failed to build the tokio runtime")?;

    let report = runtime.block_on(soak(args))?;
    tracing::info!(
        "Soak finished: {} iterations across {} workers in {:?}",
        report.iterations,
        report.workers,
        report.elapsed
    );
    Ok(())
}

async fn soak(args: Args) -> anyhow::Result<SoakReport> {
    let runner = Runner::new(args.soak_config());

    let shutdown = runner.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping workers...");
            shutdown.cancel();
        }
    });

    let options = args.connect_options();
    let address = args.address.as_str();
    let report = match (args.backend, args.report) {
        (Backend::Redis, ReportFormat::Text) => {
            runner
                .run::<RedisConnection, _>(address, options, &StdoutReporter)
                .await
        }
        (Backend::Redis, ReportFormat::Json) => {
            runner
                .run::<RedisConnection, _>(address, options, &JsonReporter)
                .await
        }
        (Backend::Memory, ReportFormat::Text) => {
            runner
                .run::<MemoryConnection, _>(address, options, &StdoutReporter)
                .await
        }
        (Backend::Memory, ReportFormat::Json) => {
            runner
                .run::<MemoryConnection, _>(address, options, &JsonReporter)
                .await
        }
    };
    Ok(report?)
}
