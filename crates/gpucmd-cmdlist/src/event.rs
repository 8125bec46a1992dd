//! Events: GPU-visible state cells used for wait/signal ordering.
//!
//! A plain event's cell is a `u32` at the event's address holding
//! [`STATE_CLEARED`] or [`STATE_SIGNALED`]. Timestamp events instead carry four
//! `u64` clock samples and report completion through `context_end`, which
//! stays at the cleared pattern until the end-of-work capture lands.

use bitflags::bitflags;

use crate::device::AllocationRef;
use crate::error::CmdListError;

pub const STATE_SIGNALED: u32 = 0;
pub const STATE_CLEARED: u32 = 0xFFFF_FFFF;

pub const CONTEXT_START_OFFSET: u64 = 0;
pub const GLOBAL_START_OFFSET: u64 = 8;
pub const CONTEXT_END_OFFSET: u64 = 16;
pub const GLOBAL_END_OFFSET: u64 = 24;

/// Bytes reserved per event in an [`EventPool`].
pub const EVENT_SLOT_SIZE: u64 = 64;

bitflags! {
    /// Cache coherency domain an event signal or wait must reach.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EventScope: u32 {
        const SUBDEVICE = 1 << 0;
        const DEVICE = 1 << 1;
        const HOST = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventDesc {
    pub signal_scope: EventScope,
    pub wait_scope: EventScope,
    pub timestamp: bool,
}

#[derive(Clone, Debug)]
pub struct Event {
    allocation: AllocationRef,
    offset: u64,
    desc: EventDesc,
}

impl Event {
    pub fn new(allocation: AllocationRef, offset: u64, desc: EventDesc) -> Self {
        Self {
            allocation,
            offset,
            desc,
        }
    }

    pub fn allocation(&self) -> &AllocationRef {
        &self.allocation
    }

    pub fn gpu_address(&self) -> u64 {
        self.allocation.gpu_address + self.offset
    }

    pub fn signal_scope(&self) -> EventScope {
        self.desc.signal_scope
    }

    pub fn wait_scope(&self) -> EventScope {
        self.desc.wait_scope
    }

    pub fn is_timestamp(&self) -> bool {
        self.desc.timestamp
    }

    pub fn context_start_address(&self) -> u64 {
        self.gpu_address() + CONTEXT_START_OFFSET
    }

    pub fn global_start_address(&self) -> u64 {
        self.gpu_address() + GLOBAL_START_OFFSET
    }

    pub fn context_end_address(&self) -> u64 {
        self.gpu_address() + CONTEXT_END_OFFSET
    }

    pub fn global_end_address(&self) -> u64 {
        self.gpu_address() + GLOBAL_END_OFFSET
    }

    /// Address polled by waiters.
    pub fn completion_address(&self) -> u64 {
        if self.is_timestamp() {
            self.context_end_address()
        } else {
            self.gpu_address()
        }
    }
}

/// One allocation carved into fixed-size event slots.
#[derive(Clone, Debug)]
pub struct EventPool {
    allocation: AllocationRef,
    count: u32,
}

impl EventPool {
    pub fn new(allocation: AllocationRef, count: u32) -> Result<Self, CmdListError> {
        if u64::from(count) * EVENT_SLOT_SIZE > allocation.size {
            return Err(CmdListError::InvalidArgument(
                "event pool allocation too small",
            ));
        }
        Ok(Self { allocation, count })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn allocation(&self) -> &AllocationRef {
        &self.allocation
    }

    pub fn event(&self, index: u32, desc: EventDesc) -> Result<Event, CmdListError> {
        if index >= self.count {
            return Err(CmdListError::InvalidArgument("event index out of range"));
        }
        Ok(Event::new(
            self.allocation.clone(),
            u64::from(index) * EVENT_SLOT_SIZE,
            desc,
        ))
    }
}
