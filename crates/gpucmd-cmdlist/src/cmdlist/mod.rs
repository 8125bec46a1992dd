//! Command list core: lifecycle, validation and the append entry points.
//!
//! Every append goes through [`CommandList::record`], which validates the
//! event arguments, emits the waits, encodes the operation and appends the
//! signal for the optional signal event. A failing append leaves the stream
//! and residency exactly as they were.

mod blit;
mod copy;
mod fill;
mod image;
mod kernel;
mod sync;

use core::fmt;
use std::sync::{Arc, MutexGuard, PoisonError};

use gpucmd_hw::{CommandStream, HwCommandEncoder, PipeControlArgs};
use tracing::{debug, warn};

use crate::aligned::{self, AlignedAllocation};
use crate::builtin::Builtin;
use crate::config::CommandListDesc;
use crate::container::CommandContainer;
use crate::device::{AllocationRef, Device, KernelRef};
use crate::error::CmdListError;
use crate::event::Event;
use crate::kernel::Kernel;
use crate::queue::{CommandQueue, Submission};

pub use sync::MemAdvice;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandListState {
    Initial,
    Recording,
    Closed,
    Executing,
}

/// Synchronization arguments shared by the append operations.
///
/// `num_wait_events` is authoritative: a non-zero count with no slice, or a
/// slice shorter than the count, is rejected before anything is encoded.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventArgs<'a> {
    pub signal: Option<&'a Event>,
    pub num_wait_events: u32,
    pub wait_events: Option<&'a [&'a Event]>,
}

impl<'a> EventArgs<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn signal(event: &'a Event) -> Self {
        Self {
            signal: Some(event),
            ..Self::default()
        }
    }

    pub fn wait(events: &'a [&'a Event]) -> Self {
        Self {
            signal: None,
            num_wait_events: u32::try_from(events.len()).unwrap_or(u32::MAX),
            wait_events: Some(events),
        }
    }

    pub fn with_signal(mut self, event: &'a Event) -> Self {
        self.signal = Some(event);
        self
    }

    fn validated_waits(&self) -> Result<&'a [&'a Event], CmdListError> {
        let count = self.num_wait_events as usize;
        if count == 0 {
            return Ok(&[]);
        }
        match self.wait_events {
            Some(events) if events.len() >= count => Ok(&events[..count]),
            _ => Err(CmdListError::InvalidArgument(
                "wait event count given without wait events",
            )),
        }
    }
}

pub(crate) fn lock_kernel(kernel: &KernelRef) -> MutexGuard<'_, dyn Kernel + Send + 'static> {
    kernel.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct CommandList {
    device: Arc<dyn Device>,
    queue: Option<Box<dyn CommandQueue>>,
    encoder: &'static dyn HwCommandEncoder,
    desc: CommandListDesc,
    container: CommandContainer,
    state: CommandListState,
}

impl fmt::Debug for CommandList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandList")
            .field("label", &self.desc.label)
            .field("family", &self.encoder.family())
            .field("state", &self.state)
            .field("copy_only", &self.desc.copy_only)
            .field("immediate", &self.desc.immediate)
            .field("used", &self.container.stream().used())
            .finish()
    }
}

impl CommandList {
    /// Create a command list bound to `device`. Immediate lists submit to
    /// `queue` after every append and therefore require one.
    pub fn create(
        device: Arc<dyn Device>,
        queue: Option<Box<dyn CommandQueue>>,
        desc: CommandListDesc,
    ) -> Result<Self, CmdListError> {
        if desc.immediate && queue.is_none() {
            return Err(CmdListError::InvalidArgument(
                "immediate command list requires a queue",
            ));
        }

        let encoder = device.hw_family().encoder();
        let container = CommandContainer::new(desc.command_buffer_size);
        let mut list = Self {
            device,
            queue,
            encoder,
            desc,
            container,
            state: CommandListState::Initial,
        };
        list.initialize();
        Ok(list)
    }

    fn initialize(&mut self) {
        self.program_state_base_address();
        self.state = CommandListState::Recording;
        debug!(
            label = self.desc.label.as_deref().unwrap_or(""),
            family = %self.encoder.family(),
            copy_only = self.desc.copy_only,
            immediate = self.desc.immediate,
            "command list initialized"
        );
    }

    fn program_state_base_address(&mut self) {
        if self.desc.copy_only {
            return;
        }
        let bases = self.device.heap_base_addresses();
        self.encoder
            .encode_state_base_address(self.container.stream_mut(), &bases);
    }

    pub fn state(&self) -> CommandListState {
        self.state
    }

    pub fn is_copy_only(&self) -> bool {
        self.desc.copy_only
    }

    pub fn is_immediate(&self) -> bool {
        self.desc.immediate
    }

    pub fn desc(&self) -> &CommandListDesc {
        &self.desc
    }

    pub fn encoder(&self) -> &'static dyn HwCommandEncoder {
        self.encoder
    }

    pub fn command_stream(&self) -> &CommandStream {
        self.container.stream()
    }

    pub fn residency(&self) -> &[AllocationRef] {
        self.container.residency()
    }

    pub fn deallocations(&self) -> &[AllocationRef] {
        self.container.deallocations()
    }

    pub fn host_ptr_allocations(&self) -> impl Iterator<Item = (u64, &AllocationRef)> {
        self.container.host_ptr_allocations()
    }

    /// Raw bytes at the end of the stream for direct encoding, or `None`
    /// when the command buffer cannot hold `size` more bytes.
    pub fn reserve_space(&mut self, size: usize) -> Option<&mut [u8]> {
        self.container.stream_mut().get_space(size)
    }

    pub fn close(&mut self) -> Result<(), CmdListError> {
        if self.state == CommandListState::Closed {
            warn!("closing an already closed command list");
        }
        self.container.dedup_residency();
        self.encoder
            .encode_batch_buffer_end(self.container.stream_mut());
        self.state = CommandListState::Closed;
        debug!(
            used = self.container.stream().used(),
            residency = self.container.residency().len(),
            "command list closed"
        );
        Ok(())
    }

    /// Drop all recorded work and return to recording.
    ///
    /// Temporaries and host-pointer shadows are released through the device.
    pub fn reset(&mut self) -> Result<(), CmdListError> {
        let owned = self.container.reset();
        let freed = owned.len();
        for alloc in owned {
            self.device.free_allocation(alloc);
        }
        self.program_state_base_address();
        self.state = CommandListState::Recording;
        debug!(freed, "command list reset");
        Ok(())
    }

    /// Close, submit, wait for completion and reset. Immediate lists only.
    ///
    /// The list is reset even when submission fails.
    pub fn execute_immediate(&mut self) -> Result<(), CmdListError> {
        if !self.desc.immediate {
            return Err(CmdListError::InvalidArgument(
                "execute_immediate on a non-immediate command list",
            ));
        }

        self.close()?;
        self.state = CommandListState::Executing;
        let submission = Submission {
            commands: self.container.stream().as_bytes().to_vec(),
            residency: self.container.residency().to_vec(),
            copy_only: self.desc.copy_only,
        };
        let result = self.submit_and_wait(submission);
        self.reset()?;
        result
    }

    fn submit_and_wait(&mut self, submission: Submission) -> Result<(), CmdListError> {
        let queue = self
            .queue
            .as_mut()
            .ok_or(CmdListError::InvalidArgument("command list has no queue"))?;
        queue.execute(submission)?;
        queue.synchronize(None)?;
        Ok(())
    }

    fn record<F>(
        &mut self,
        op: &'static str,
        events: EventArgs<'_>,
        encode: F,
    ) -> Result<(), CmdListError>
    where
        F: FnOnce(&mut Self) -> Result<(), CmdListError>,
    {
        let waits = events.validated_waits()?;
        if self.state == CommandListState::Closed {
            warn!(op, "append to a closed command list");
        }

        let checkpoint = self.container.checkpoint();
        if let Err(err) = self.encode_with_events(waits, events.signal, encode) {
            self.container.rollback(checkpoint);
            debug!(op, %err, "append rejected");
            return Err(err);
        }
        debug!(op, used = self.container.stream().used(), "appended");

        if self.desc.immediate {
            self.execute_immediate()?;
        }
        Ok(())
    }

    fn encode_with_events<F>(
        &mut self,
        waits: &[&Event],
        signal: Option<&Event>,
        encode: F,
    ) -> Result<(), CmdListError>
    where
        F: FnOnce(&mut Self) -> Result<(), CmdListError>,
    {
        self.encode_wait_events(waits);
        if let Some(event) = signal {
            self.encode_timestamp_begin(event);
        }
        encode(self)?;
        if let Some(event) = signal {
            self.encode_signal_post_walker(event);
        }
        Ok(())
    }

    fn resolve(&mut self, ptr: u64, size: u64) -> Result<AlignedAllocation, CmdListError> {
        aligned::resolve(&*self.device, self.encoder, &mut self.container, ptr, size)
    }

    /// Like `resolve`, but the range must lie in an allocation the device
    /// already knows about.
    fn resolve_known(&self, ptr: u64, size: u64) -> Result<AlignedAllocation, CmdListError> {
        aligned::resolve_known(&*self.device, self.encoder, ptr, size)
    }

    fn builtin(&self, builtin: Builtin) -> Result<KernelRef, CmdListError> {
        Ok(self.device.builtin_kernel(builtin)?)
    }

    fn encode_dc_flush(&mut self) {
        self.encoder
            .encode_pipe_control(self.container.stream_mut(), PipeControlArgs { dc_flush: true });
    }

    /// Make host-visible writes by the GPU coherent once the work completes.
    fn flush_if_needed(&mut self, needs_flush: bool) {
        if needs_flush && !self.desc.copy_only {
            self.encode_dc_flush();
        }
    }
}
