//! Command list encoder.
//!
//! A [`CommandList`] turns compute/copy API calls into a batch buffer for the
//! device's hardware generation. Copies and fills become builtin-kernel
//! launches, or copy-engine blits on copy-only lists. Every allocation the
//! encoded commands touch is recorded in the list's residency set.
//!
//! Devices, kernels and queues are external collaborators behind the
//! [`Device`], [`Kernel`] and [`CommandQueue`] traits; [`sim`] provides
//! in-memory implementations.

pub mod aligned;
pub mod builtin;
pub mod cmdlist;
pub mod config;
pub mod container;
pub mod device;
pub mod error;
pub mod event;
pub mod image;
pub mod kernel;
pub mod queue;
pub mod region;
pub mod sim;

#[cfg(test)]
mod tests;

pub use aligned::AlignedAllocation;
pub use builtin::Builtin;
pub use cmdlist::{CommandList, CommandListState, EventArgs, MemAdvice};
pub use config::CommandListDesc;
pub use device::{
    AllocationId, AllocationRef, AllocationType, Device, DeviceError, GraphicsAllocation,
    KernelRef, MemoryType,
};
pub use error::{CmdListError, ResultCode};
pub use event::{Event, EventDesc, EventPool, EventScope};
pub use image::{Image, ImageDesc, ImageRegion, ImageType};
pub use kernel::{Kernel, KernelError};
pub use queue::{CommandQueue, QueueError, Submission};
pub use region::{CopyRegion, GroupCount};
