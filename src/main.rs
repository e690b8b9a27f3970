use grievance::{Config, Indexer, logging};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    logging::init()?;

    let config = Config::load_or_default()?;
    let indexer = Indexer::from_config(&config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after in-flight requests");
            on_signal.cancel();
        }
    });

    let report = indexer.sync_all(&cancel).await?;
    for outcome in report.failed() {
        if let Err(e) = &outcome.result {
            error!(complaint_id = outcome.complaint_id, "not indexed: {e}");
        }
    }

    let stored = indexer.count().await?;
    info!(
        embeddings = stored,
        succeeded = report.succeeded_count(),
        failed = report.failed_count(),
        "embeddings generated and stored"
    );
    Ok(())
}
