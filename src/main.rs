use anyhow::Context as _;
use clap::Parser;
use epever_tracer::{config::Args, scheduler::PollScheduler, sink::MemorySink, tracer::Con};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!(port = %args.port, slave = args.slave, baud = args.baud, "starting");
    let con = Con::connect(&args.port, args.baud, args.slave, args.timeout())
        .with_context(|| format!("opening {}", args.port))?;
    let mut scheduler = PollScheduler::new(con, MemorySink::new(), args.scheduler_config());

    // a failure exit lets the supervisor restart us with a fresh port
    tokio::select! {
        res = scheduler.run() => res.context("polling stopped")?,
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for ctrl-c")?;
            info!("interrupted, exiting");
        }
    }
    Ok(())
}
