//! Open → closing → closed lifecycle coordination.
//!
//! [`CloseStateMachine`] is the only place the local view of an object's
//! lifecycle state is written. Upload workers never touch it; they hold an
//! [`UploadGuard`] for the duration of an upload so a close cannot start
//! underneath them.

use std::sync::{Mutex, MutexGuard, PoisonError};

use objxfer_protocol::{CloseOutcome, ObjectId, ObjectState, ObjectStatus};
use objxfer_transfer::TransferConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EngineError, TransferTarget};
use crate::remote::RemoteObjectClient;
use crate::retry::{timed, with_retry};

/// Local lifecycle state of a file object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseState {
    Open,
    Closing,
    Closed,
    /// The last close attempt failed; the object is still open remotely.
    Failed,
}

impl From<ObjectState> for CloseState {
    fn from(state: ObjectState) -> Self {
        match state {
            ObjectState::Open => Self::Open,
            ObjectState::Closing => Self::Closing,
            ObjectState::Closed => Self::Closed,
        }
    }
}

enum CloseStep {
    AlreadyClosed(ObjectStatus),
    Request,
    Await,
}

/// Serializes lifecycle transitions of one object.
pub struct CloseStateMachine {
    inner: Mutex<MachineInner>,
}

struct MachineInner {
    state: CloseState,
    active_uploads: u32,
    closed: Option<ObjectStatus>,
}

/// Marks an upload in progress; released on drop.
pub struct UploadGuard<'a> {
    machine: &'a CloseStateMachine,
}

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        let mut s = self.machine.lock();
        s.active_uploads = s.active_uploads.saturating_sub(1);
    }
}

impl CloseStateMachine {
    pub fn new(initial: ObjectState) -> Self {
        Self {
            inner: Mutex::new(MachineInner {
                state: initial.into(),
                active_uploads: 0,
                closed: None,
            }),
        }
    }

    /// Current local state.
    pub fn state(&self) -> CloseState {
        self.lock().state
    }

    /// Status reported by the service when the object closed.
    pub fn closed_status(&self) -> Option<ObjectStatus> {
        self.lock().closed.clone()
    }

    /// Registers an upload. Fails unless parts may still be committed.
    pub fn begin_upload(&self, object: &ObjectId) -> Result<UploadGuard<'_>, EngineError> {
        let mut s = self.lock();
        match s.state {
            CloseState::Open | CloseState::Failed => {
                s.active_uploads += 1;
                Ok(UploadGuard { machine: self })
            }
            CloseState::Closing => Err(EngineError::state(
                object,
                "cannot upload parts while the object is closing",
            )),
            CloseState::Closed => Err(EngineError::state(
                object,
                "cannot upload parts to a closed object",
            )),
        }
    }

    fn begin_close(&self, object: &ObjectId, committed: u32) -> Result<CloseStep, EngineError> {
        let mut s = self.lock();
        match s.state {
            CloseState::Closed => {
                let status = s.closed.clone().unwrap_or(ObjectStatus {
                    state: ObjectState::Closed,
                    committed_parts: committed,
                    size: None,
                });
                Ok(CloseStep::AlreadyClosed(status))
            }
            CloseState::Closing => Ok(CloseStep::Await),
            CloseState::Open | CloseState::Failed => {
                if s.active_uploads > 0 {
                    return Err(EngineError::state(
                        object,
                        format!("{} upload(s) still in progress", s.active_uploads),
                    ));
                }
                if committed == 0 {
                    return Err(EngineError::state(
                        object,
                        "an object needs at least one part to be closed",
                    ));
                }
                s.state = CloseState::Closing;
                Ok(CloseStep::Request)
            }
        }
    }

    /// Closes `object` and waits until the service reports it closed.
    ///
    /// `committed` is the number of parts the caller knows to be committed;
    /// zero fails immediately without a network call or state change.
    /// Closing an already closed object returns its status again.
    pub async fn close_and_wait(
        &self,
        client: &dyn RemoteObjectClient,
        object: &ObjectId,
        committed: u32,
        config: &TransferConfig,
        cancel: &CancellationToken,
    ) -> Result<ObjectStatus, EngineError> {
        let step = match self.begin_close(object, committed)? {
            CloseStep::AlreadyClosed(status) => {
                debug!(object = %object, "already closed");
                return Ok(status);
            }
            step => step,
        };

        match self.drive_close(step, client, object, config, cancel).await {
            Ok(status) => {
                let mut s = self.lock();
                s.state = CloseState::Closed;
                s.closed = Some(status.clone());
                info!(
                    object = %object,
                    size = ?status.size,
                    parts = status.committed_parts,
                    "object closed"
                );
                Ok(status)
            }
            Err(e) => {
                self.lock().state = CloseState::Failed;
                warn!(object = %object, error = %e, "close failed");
                Err(e)
            }
        }
    }

    async fn drive_close(
        &self,
        step: CloseStep,
        client: &dyn RemoteObjectClient,
        object: &ObjectId,
        config: &TransferConfig,
        cancel: &CancellationToken,
    ) -> Result<ObjectStatus, EngineError> {
        let timeout = config.request_timeout();

        if matches!(step, CloseStep::Request) {
            let outcome = with_retry(config.retry(), cancel, "request close", move |_| {
                timed(timeout, client.request_close(object))
            })
            .await
            .map_err(|e| e.into_engine(object, TransferTarget::Object))?;

            if let CloseOutcome::Rejected { reason } = outcome {
                return Err(EngineError::state(object, format!("close rejected: {reason}")));
            }
            debug!(object = %object, "close accepted");
        }

        let waited = config.close_timeout();
        match tokio::time::timeout(waited, poll_until_closed(client, object, config, cancel)).await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::CloseTimeout {
                object: object.clone(),
                waited,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MachineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn poll_until_closed(
    client: &dyn RemoteObjectClient,
    object: &ObjectId,
    config: &TransferConfig,
    cancel: &CancellationToken,
) -> Result<ObjectStatus, EngineError> {
    let timeout = config.request_timeout();
    loop {
        let status = with_retry(config.retry(), cancel, "poll state", move |_| {
            timed(timeout, client.poll_state(object))
        })
        .await
        .map_err(|e| e.into_engine(object, TransferTarget::Object))?;

        if status.state == ObjectState::Closed {
            return Ok(status);
        }
        debug!(object = %object, state = %status.state, "waiting for close");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            _ = tokio::time::sleep(config.close_poll_interval()) => {}
        }
    }
}
