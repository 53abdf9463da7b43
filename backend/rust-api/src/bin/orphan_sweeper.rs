use tracing_subscriber::fmt::init;

use quizgen_api::{
    config::Config,
    services::{connect_store, orphan_sweeper::OrphanSweeper},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = Config::load()?;
    let store = connect_store(&config).await?;

    let interval = if config.storage.orphan_sweep_interval.is_zero() {
        std::time::Duration::from_secs(600)
    } else {
        config.storage.orphan_sweep_interval
    };

    let sweeper = OrphanSweeper::new(store, interval, config.storage.orphan_grace);

    // `--once` runs a single pass, for cron-style scheduling
    if std::env::args().any(|arg| arg == "--once") {
        let deleted = sweeper.run_once().await?;
        tracing::info!(deleted, "Single orphan sweep finished");
        return Ok(());
    }

    sweeper.run().await?;

    Ok(())
}
