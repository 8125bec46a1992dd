use std::time::Duration;

use thiserror::Error;

use crate::device::AllocationRef;

/// A closed command buffer handed to a queue.
#[derive(Debug, Clone)]
pub struct Submission {
    pub commands: Vec<u8>,
    pub residency: Vec<AllocationRef>,
    pub copy_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("timed out waiting for completion")]
    Timeout,

    #[error("device lost")]
    DeviceLost,
}

pub trait CommandQueue: Send {
    fn execute(&mut self, submission: Submission) -> Result<(), QueueError>;

    /// Block until all submitted work completes. `None` waits forever.
    fn synchronize(&mut self, timeout: Option<Duration>) -> Result<(), QueueError>;
}
