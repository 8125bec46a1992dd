use gpucmd_hw::cmd::{
    CompareOp, PostSync, GP_THREAD_TIME_REG_ADDRESS_OFFSET_LOW, REG_GLOBAL_TIMESTAMP_LDW,
};
use gpucmd_hw::PipeControlArgs;
use tracing::debug;

use super::{CommandList, EventArgs};
use crate::error::CmdListError;
use crate::event::{Event, STATE_CLEARED, STATE_SIGNALED};

/// Usage hints for shared allocations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemAdvice {
    SetReadMostly,
    ClearReadMostly,
    SetPreferredLocation,
    ClearPreferredLocation,
    SetNonAtomicMostly,
    ClearNonAtomicMostly,
    BiasCached,
    BiasUncached,
}

impl CommandList {
    /// Execution barrier: later commands start after earlier ones finish.
    pub fn append_barrier(&mut self, events: EventArgs<'_>) -> Result<(), CmdListError> {
        self.record("append_barrier", events, |list| {
            if list.desc.copy_only {
                list.encoder
                    .encode_mi_flush_dw(list.container.stream_mut(), PostSync::None);
            } else {
                list.encoder.encode_pipe_control(
                    list.container.stream_mut(),
                    PipeControlArgs { dc_flush: false },
                );
            }
            Ok(())
        })
    }

    /// Barrier that also makes writes to the given ranges visible.
    pub fn append_memory_ranges_barrier(
        &mut self,
        ranges: &[u64],
        range_sizes: &[u64],
        events: EventArgs<'_>,
    ) -> Result<(), CmdListError> {
        if ranges.len() != range_sizes.len() {
            return Err(CmdListError::InvalidArgument(
                "range and range size counts differ",
            ));
        }
        self.record("append_memory_ranges_barrier", events, |list| {
            debug!(ranges = ranges.len(), "memory ranges barrier");
            if list.desc.copy_only {
                list.encoder
                    .encode_mi_flush_dw(list.container.stream_mut(), PostSync::None);
            } else {
                list.encode_dc_flush();
            }
            Ok(())
        })
    }

    pub fn append_signal_event(&mut self, event: &Event) -> Result<(), CmdListError> {
        self.record("append_signal_event", EventArgs::none(), |list| {
            list.encode_signal_post_walker(event);
            Ok(())
        })
    }

    pub fn append_event_reset(&mut self, event: &Event) -> Result<(), CmdListError> {
        self.record("append_event_reset", EventArgs::none(), |list| {
            list.container.add_to_residency(event.allocation());
            let address = event.completion_address();
            if list.desc.copy_only {
                list.encoder.encode_mi_flush_dw(
                    list.container.stream_mut(),
                    PostSync::WriteImmediate {
                        address,
                        data: u64::from(STATE_CLEARED),
                    },
                );
            } else {
                list.encoder.encode_pipe_control_with_post_sync(
                    list.container.stream_mut(),
                    PipeControlArgs { dc_flush: true },
                    address,
                    u64::from(STATE_CLEARED),
                );
            }
            Ok(())
        })
    }

    /// Stall the engine until each of the first `num_events` events is
    /// signaled.
    pub fn append_wait_on_events(
        &mut self,
        num_events: u32,
        events: Option<&[&Event]>,
    ) -> Result<(), CmdListError> {
        let args = EventArgs {
            signal: None,
            num_wait_events: num_events,
            wait_events: events,
        };
        self.record("append_wait_on_events", args, |_| Ok(()))
    }

    /// Succeeds for pointers inside known allocations; no commands are needed.
    pub fn append_mem_advise(
        &mut self,
        ptr: u64,
        size: u64,
        advice: MemAdvice,
    ) -> Result<(), CmdListError> {
        if self.device.find_allocation_for_range(ptr, size.max(1)).is_none() {
            return Err(CmdListError::Unknown("advice for an unknown allocation"));
        }
        debug!(ptr, size, ?advice, "mem advise");
        Ok(())
    }

    pub fn append_memory_prefetch(&mut self, ptr: u64, size: u64) -> Result<(), CmdListError> {
        if self.device.find_allocation_for_range(ptr, size.max(1)).is_none() {
            return Err(CmdListError::Unknown("prefetch of an unknown allocation"));
        }
        debug!(ptr, size, "memory prefetch");
        Ok(())
    }

    pub(super) fn encode_wait_events(&mut self, events: &[&Event]) {
        for event in events {
            self.container.add_to_residency(event.allocation());
            self.encoder.encode_semaphore_wait(
                self.container.stream_mut(),
                event.completion_address(),
                STATE_CLEARED,
                CompareOp::SadNotEqualSdd,
            );

            if event.wait_scope().is_empty() {
                continue;
            }
            if self.desc.copy_only {
                self.encoder
                    .encode_mi_flush_dw(self.container.stream_mut(), PostSync::None);
            } else {
                self.encode_dc_flush();
            }
        }
    }

    /// Capture the start timestamps of a profiling event.
    pub(super) fn encode_timestamp_begin(&mut self, event: &Event) {
        if !event.is_timestamp() {
            return;
        }
        self.container.add_to_residency(event.allocation());
        let stream = self.container.stream_mut();
        self.encoder.encode_store_register_mem(
            stream,
            REG_GLOBAL_TIMESTAMP_LDW,
            event.global_start_address(),
        );
        self.encoder.encode_store_register_mem(
            stream,
            GP_THREAD_TIME_REG_ADDRESS_OFFSET_LOW,
            event.context_start_address(),
        );
    }

    fn encode_timestamp_end(&mut self, event: &Event) {
        if self.desc.copy_only {
            self.encoder
                .encode_mi_flush_dw(self.container.stream_mut(), PostSync::None);
        } else {
            self.encoder.encode_pipe_control(
                self.container.stream_mut(),
                PipeControlArgs { dc_flush: false },
            );
        }
        let stream = self.container.stream_mut();
        self.encoder.encode_store_register_mem(
            stream,
            REG_GLOBAL_TIMESTAMP_LDW,
            event.global_end_address(),
        );
        self.encoder.encode_store_register_mem(
            stream,
            GP_THREAD_TIME_REG_ADDRESS_OFFSET_LOW,
            event.context_end_address(),
        );
    }

    /// Mark `event` signaled once all preceding work completes.
    ///
    /// Timestamp events complete through their end-of-work capture instead
    /// of a state write.
    pub(super) fn encode_signal_post_walker(&mut self, event: &Event) {
        self.container.add_to_residency(event.allocation());
        if event.is_timestamp() {
            self.encode_timestamp_end(event);
            return;
        }

        let address = event.gpu_address();
        if self.desc.copy_only {
            self.encoder.encode_mi_flush_dw(
                self.container.stream_mut(),
                PostSync::WriteImmediate {
                    address,
                    data: u64::from(STATE_SIGNALED),
                },
            );
        } else {
            self.encoder.encode_pipe_control_with_post_sync(
                self.container.stream_mut(),
                PipeControlArgs {
                    dc_flush: !event.signal_scope().is_empty(),
                },
                address,
                u64::from(STATE_SIGNALED),
            );
        }
    }
}
