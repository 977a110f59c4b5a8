use objxfer_protocol::{ContainerId, ObjectId, RemoteFileObject};
use objxfer_transfer::PartLedger;

use crate::close::{CloseState, CloseStateMachine};

/// Local state shared by everything operating on one open object.
pub struct FileSession {
    id: ObjectId,
    container: ContainerId,
    ledger: PartLedger,
    machine: CloseStateMachine,
}

impl FileSession {
    /// Starts tracking `object`, which already holds `committed` parts.
    pub fn new(object: &RemoteFileObject, committed: u32) -> Self {
        Self {
            id: object.id.clone(),
            container: object.container.clone(),
            ledger: PartLedger::with_existing(committed),
            machine: CloseStateMachine::new(object.state),
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn container(&self) -> &ContainerId {
        &self.container
    }

    pub fn ledger(&self) -> &PartLedger {
        &self.ledger
    }

    pub fn machine(&self) -> &CloseStateMachine {
        &self.machine
    }

    pub fn state(&self) -> CloseState {
        self.machine.state()
    }

    pub fn committed_parts(&self) -> u32 {
        self.ledger.committed_count()
    }
}

impl std::fmt::Debug for FileSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSession")
            .field("id", &self.id)
            .field("container", &self.container)
            .field("state", &self.state())
            .field("committed_parts", &self.committed_parts())
            .finish()
    }
}
