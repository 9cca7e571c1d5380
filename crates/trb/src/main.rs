use std::sync::Arc;

use trb_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), trb_core::Error> {
    trb_core::logging::init("trb")?;

    let cfg = Arc::new(Config::load()?);
    tracing::info!(
        temp_dir = %cfg.temp_dir.display(),
        size_limit = cfg.size_limit,
        part_size = cfg.part_size,
        "configuration loaded"
    );

    trb_telegram::router::run_polling(cfg)
        .await
        .map_err(|e| trb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
