use std::time::Duration;

use tracing::Level;

pub type TaskId = u64;

/// Messages consumed by the progress actor, each exactly once.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    AddTask {
        id: TaskId,
        label: String,
        total: Option<u64>,
        /// Position the task starts at (non-zero when resuming)
        position: u64,
    },
    UpdateTask {
        id: TaskId,
        current: u64,
        total: Option<u64>,
        /// Time since the task was added, used for the rate sample
        elapsed: Duration,
    },
    FinishTask {
        id: TaskId,
        /// False when the task was dropped without completing
        success: bool,
    },
    Resize {
        width: u16,
    },
    Log {
        level: Level,
        message: String,
    },
    Stop,
}
