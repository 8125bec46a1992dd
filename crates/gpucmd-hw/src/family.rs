//! Per-generation command encoders.
//!
//! Command lists pick an encoder once from the device's [`HwFamily`] and call
//! everything through [`HwCommandEncoder`]. The generations share the packet
//! format; they differ in limits ([`HwInfo`]) and in the extra flushes and
//! stalls they need around synchronization packets.

use core::fmt;

use crate::blit::{self, BlitProperties};
use crate::cmd::{BaseAddresses, CompareOp, PipeControlFlags, PostSync, WalkerArgs};
use crate::error::HwError;
use crate::stream::CommandStream;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HwFamily {
    Gen9,
    Gen12Lp,
}

impl HwFamily {
    pub fn encoder(self) -> &'static dyn HwCommandEncoder {
        static GEN9: Gen9Encoder = Gen9Encoder::new(HwInfo::for_family(HwFamily::Gen9));
        static GEN12LP: Gen12LpEncoder = Gen12LpEncoder::new(HwInfo::for_family(HwFamily::Gen12Lp));
        match self {
            HwFamily::Gen9 => &GEN9,
            HwFamily::Gen12Lp => &GEN12LP,
        }
    }
}

impl fmt::Display for HwFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HwFamily::Gen9 => f.write_str("gen9"),
            HwFamily::Gen12Lp => f.write_str("gen12lp"),
        }
    }
}

/// Hardware limits that shape encoding decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HwInfo {
    pub family: HwFamily,
    pub cache_line_size: u64,
    /// Alignment of surface state base addresses handed to kernels.
    pub surface_base_address_alignment: u64,
    pub max_blit_width: u32,
    pub max_blit_height: u32,
    /// Largest pattern the copy engine can fill inline.
    pub max_fill_pattern_size: usize,
    pub max_work_group_size: u32,
}

impl HwInfo {
    pub const fn for_family(family: HwFamily) -> Self {
        match family {
            HwFamily::Gen9 => Self {
                family,
                cache_line_size: 64,
                surface_base_address_alignment: 4,
                max_blit_width: 0x7FC0,
                max_blit_height: 0x3FC0,
                max_fill_pattern_size: 4,
                max_work_group_size: 256,
            },
            HwFamily::Gen12Lp => Self {
                family,
                cache_line_size: 64,
                surface_base_address_alignment: 64,
                max_blit_width: 0x7FC0,
                max_blit_height: 0x3FC0,
                max_fill_pattern_size: 16,
                max_work_group_size: 1024,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipeControlArgs {
    pub dc_flush: bool,
}

/// Capability interface every hardware generation implements.
pub trait HwCommandEncoder: fmt::Debug + Send + Sync {
    fn hw_info(&self) -> &HwInfo;

    fn family(&self) -> HwFamily {
        self.hw_info().family
    }

    /// Flags for a CS-stall pipe control with the requested flushes.
    fn pipe_control_flags(&self, args: PipeControlArgs) -> PipeControlFlags {
        let mut flags = PipeControlFlags::CS_STALL;
        if args.dc_flush {
            flags |= PipeControlFlags::DC_FLUSH;
        }
        flags
    }

    fn encode_state_base_address(&self, stream: &mut CommandStream, bases: &BaseAddresses) {
        stream.state_base_address(bases);
    }

    fn encode_pipe_control(&self, stream: &mut CommandStream, args: PipeControlArgs) {
        stream.pipe_control(self.pipe_control_flags(args), PostSync::None);
    }

    fn encode_pipe_control_with_post_sync(
        &self,
        stream: &mut CommandStream,
        args: PipeControlArgs,
        address: u64,
        data: u64,
    ) {
        stream.pipe_control(
            self.pipe_control_flags(args),
            PostSync::WriteImmediate { address, data },
        );
    }

    fn encode_mi_flush_dw(&self, stream: &mut CommandStream, post_sync: PostSync) {
        stream.mi_flush_dw(post_sync);
    }

    fn encode_semaphore_wait(
        &self,
        stream: &mut CommandStream,
        address: u64,
        value: u32,
        compare: CompareOp,
    ) {
        stream.semaphore_wait(address, value, compare);
    }

    fn encode_store_register_mem(&self, stream: &mut CommandStream, register: u32, address: u64) {
        stream.store_register_mem(register, address);
    }

    fn encode_load_register_mem(&self, stream: &mut CommandStream, register: u32, address: u64) {
        stream.load_register_mem(register, address);
    }

    fn encode_greater_than_predicate(&self, stream: &mut CommandStream, address: u64, value: u32) {
        stream.predicate_greater_than(address, value);
    }

    fn encode_walker(&self, stream: &mut CommandStream, args: &WalkerArgs) {
        stream.walker(args);
    }

    fn dispatch_blit_commands_for_buffer(
        &self,
        stream: &mut CommandStream,
        props: &BlitProperties,
    ) -> Result<(), HwError> {
        blit::dispatch_buffer(stream, self.hw_info(), props)
    }

    fn dispatch_blit_commands_for_images(
        &self,
        stream: &mut CommandStream,
        props: &BlitProperties,
    ) -> Result<(), HwError> {
        blit::dispatch_images(stream, self.hw_info(), props)
    }

    fn dispatch_blit_memory_color_fill(
        &self,
        stream: &mut CommandStream,
        dst_address: u64,
        pattern: &[u8],
        size: u64,
    ) -> Result<(), HwError> {
        blit::dispatch_color_fill(stream, self.hw_info(), dst_address, pattern, size)
    }

    fn encode_batch_buffer_end(&self, stream: &mut CommandStream) {
        stream.batch_buffer_end();
    }

    /// Split `ptr` into a surface-aligned base and the byte offset from it.
    fn ssh_aligned_pointer(&self, ptr: u64) -> (u64, u64) {
        let offset = ptr % self.hw_info().surface_base_address_alignment;
        (ptr - offset, offset)
    }

    /// Whether a fill with this pattern must go through a memory copy. The
    /// color blit only takes power-of-two pixel sizes.
    fn use_mem_copy_to_blit_fill(&self, pattern_size: usize) -> bool {
        pattern_size > self.hw_info().max_fill_pattern_size || !pattern_size.is_power_of_two()
    }
}

#[derive(Debug)]
pub struct Gen9Encoder {
    info: HwInfo,
}

impl Gen9Encoder {
    pub const fn new(info: HwInfo) -> Self {
        Self { info }
    }
}

impl HwCommandEncoder for Gen9Encoder {
    fn hw_info(&self) -> &HwInfo {
        &self.info
    }

    fn encode_pipe_control_with_post_sync(
        &self,
        stream: &mut CommandStream,
        args: PipeControlArgs,
        address: u64,
        data: u64,
    ) {
        // Post-sync writes need an empty stalling pipe control in front.
        stream.pipe_control(
            PipeControlFlags::CS_STALL | PipeControlFlags::WORKAROUND,
            PostSync::None,
        );
        stream.pipe_control(
            self.pipe_control_flags(args),
            PostSync::WriteImmediate { address, data },
        );
    }
}

#[derive(Debug)]
pub struct Gen12LpEncoder {
    info: HwInfo,
}

impl Gen12LpEncoder {
    pub const fn new(info: HwInfo) -> Self {
        Self { info }
    }
}

impl HwCommandEncoder for Gen12LpEncoder {
    fn hw_info(&self) -> &HwInfo {
        &self.info
    }

    fn pipe_control_flags(&self, args: PipeControlArgs) -> PipeControlFlags {
        let mut flags = PipeControlFlags::CS_STALL;
        if args.dc_flush {
            flags |= PipeControlFlags::DC_FLUSH | PipeControlFlags::HDC_PIPELINE_FLUSH;
        }
        flags
    }
}
