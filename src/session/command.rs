use tokio::sync::oneshot;

use crate::error::OtaResult;
use crate::models::UpdateRecord;

/// Reply channel for a command. Answers acceptance, not completion.
pub(crate) type Reply = oneshot::Sender<OtaResult<()>>;

/// Request from an [`UpdateSession`](super::UpdateSession) handle to the actor.
#[derive(Debug)]
pub(crate) enum Command {
    Start { reply: Reply },
    ClearUpdates { reply: Reply },
    Retrieve { record: UpdateRecord, reply: Reply },
    Apply { record: UpdateRecord, reply: Reply },
    Stop { reply: oneshot::Sender<()> },
}

/// Result of a background task, fed back into the actor.
#[derive(Debug)]
pub(crate) enum TaskOutcome {
    Retrieved {
        record: UpdateRecord,
        result: OtaResult<UpdateRecord>,
    },
    Applied {
        record: UpdateRecord,
        result: OtaResult<()>,
    },
    Reconciled(OtaResult<Option<UpdateRecord>>),
}
