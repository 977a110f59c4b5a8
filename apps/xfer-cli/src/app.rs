//! Upload → close → download round trip against the in-memory service.

use std::sync::Arc;
use std::time::Duration;

use objxfer_engine::{
    MemoryObjectStore, OpenFile, RemoteObjectClient, TransferContext, TransferEvent, UploadSource,
};
use objxfer_transfer::{TransferConfig, checksum_bytes};
use tokio::sync::mpsc;

use crate::args::Args;

/// Runs one round trip and verifies the downloaded bytes.
pub async fn run(args: Args, config: TransferConfig) -> anyhow::Result<()> {
    let ctx = TransferContext::capture()?;
    let store = Arc::new(
        MemoryObjectStore::new()
            .with_close_delay(3)
            .with_jitter(Duration::from_millis(args.jitter_ms)),
    );
    let client: Arc<dyn RemoteObjectClient> = store.clone();

    let (tx, rx) = mpsc::channel(256);
    let reporter = tokio::spawn(report(rx));

    let object = store.create_file(args.container.as_str());
    let file = OpenFile::attach(Arc::clone(&client), config, object)
        .await?
        .with_events(tx);

    let source = UploadSource::from_path(&ctx, &args.input).await?;
    let summary = file.upload(Some(source)).await?;
    let closed = file.close_and_wait().await?;
    drop(file);

    let downloaded = closed.download_bytes().await?;
    let original = tokio::fs::read(ctx.resolve(&args.input)?).await?;
    let expected = checksum_bytes(&original);
    let actual = checksum_bytes(&downloaded);
    anyhow::ensure!(
        expected == actual,
        "round trip mismatch for {}: expected {expected}, got {actual}",
        closed.id()
    );

    if let Some(output) = &args.output {
        let path = closed.download_to_path(&ctx, output).await?;
        tracing::info!(path = %path.display(), "copy written");
    }

    reporter.await?;

    let calls = store.calls();
    println!(
        "{}: {} bytes in {} parts, sha256 {actual}",
        closed.id(),
        closed.size(),
        summary.part_count()
    );
    println!(
        "calls: {} slots, {} uploads, {} commits, {} polls, {} range fetches",
        calls.request_part_slot, calls.upload_part, calls.commit_part, calls.poll_state,
        calls.fetch_range
    );
    Ok(())
}

/// Logs transfer events until every sender is gone.
async fn report(mut rx: mpsc::Receiver<TransferEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            TransferEvent::PartCommitted {
                object,
                index,
                size,
            } => tracing::debug!(%object, index, size, "part committed"),
            TransferEvent::Progress {
                object,
                transferred_bytes,
                total_bytes,
                bytes_per_second,
            } => tracing::info!(
                %object,
                transferred_bytes,
                total_bytes = ?total_bytes,
                bytes_per_second = bytes_per_second as u64,
                "upload progress"
            ),
            TransferEvent::RangeFetched { object, range } => {
                tracing::debug!(%object, %range, "range fetched")
            }
            TransferEvent::Closed { object, size } => tracing::info!(%object, size, "closed"),
            TransferEvent::Failed { object, error } => {
                tracing::error!(%object, error = %error, "transfer failed")
            }
        }
    }
}
