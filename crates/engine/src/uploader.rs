use std::sync::Arc;
use std::time::Duration;

use objxfer_protocol::{ObjectId, PartAck};
use objxfer_transfer::{RetryPolicy, TransferConfig, UploadPart};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{EngineError, RemoteError, TransferTarget};
use crate::remote::RemoteObjectClient;
use crate::retry::{timed, with_retry};

/// Transfers single parts: slot request, byte upload, commit.
///
/// Each attempt runs the full sequence so a retry always uploads into a
/// fresh slot.
#[derive(Clone)]
pub struct PartUploader {
    client: Arc<dyn RemoteObjectClient>,
    object: ObjectId,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl PartUploader {
    pub fn new(
        client: Arc<dyn RemoteObjectClient>,
        object: ObjectId,
        config: &TransferConfig,
    ) -> Self {
        Self {
            client,
            object,
            retry: config.retry().clone(),
            request_timeout: config.request_timeout(),
        }
    }

    /// Uploads and commits `part`, retrying transient failures.
    pub async fn upload(
        &self,
        part: &UploadPart,
        cancel: &CancellationToken,
    ) -> Result<PartAck, EngineError> {
        let index = part.index();
        let what = format!("part {index}");

        let ack = with_retry(&self.retry, cancel, &what, move |attempt| {
            debug!(object = %self.object, index, attempt, size = part.data.len(), "uploading part");
            self.attempt(part)
        })
        .await
        .map_err(|e| e.into_engine(&self.object, TransferTarget::Part(index)))?;

        debug!(object = %self.object, index, size = ack.size, "part committed");
        Ok(ack)
    }

    async fn attempt(&self, part: &UploadPart) -> Result<PartAck, RemoteError> {
        let index = part.index();
        let target = timed(
            self.request_timeout,
            self.client.request_part_slot(&self.object, index),
        )
        .await?;

        timed(
            self.request_timeout,
            self.client.upload_part(&target, part.data.clone()),
        )
        .await?;

        let ack = timed(
            self.request_timeout,
            self.client.commit_part(&self.object, index, &part.checksum),
        )
        .await?;

        if ack.index != index || ack.checksum != part.checksum {
            return Err(RemoteError::ChecksumMismatch(index));
        }
        Ok(ack)
    }
}
