use gpucmd_hw::cmd::WalkerFlags;
use tracing::debug;

use super::{lock_kernel, CommandList, EventArgs};
use crate::builtin::Builtin;
use crate::error::{out_of_resources, CmdListError};
use crate::kernel::set_arg;
use crate::region::{split_fill, to_u32};

impl CommandList {
    /// Fill `size` bytes at `ptr` with `pattern` repeated.
    pub fn append_memory_fill(
        &mut self,
        ptr: u64,
        pattern: &[u8],
        size: u64,
        events: EventArgs<'_>,
    ) -> Result<(), CmdListError> {
        if pattern.is_empty() {
            return Err(CmdListError::InvalidArgument("empty fill pattern"));
        }
        self.record("append_memory_fill", events, |list| {
            if list.desc.copy_only {
                list.encode_blit_fill(ptr, pattern, size)
            } else {
                list.encode_kernel_fill(ptr, pattern, size)
            }
        })
    }

    fn encode_kernel_fill(&mut self, ptr: u64, pattern: &[u8], size: u64) -> Result<(), CmdListError> {
        if size == 0 {
            return Ok(());
        }

        let dst = self.resolve_known(ptr, size)?;
        let immediate = pattern.len() == 1;
        let builtin = if immediate {
            Builtin::FillBufferImmediate
        } else {
            Builtin::FillBufferSshOffset
        };

        let kernel_ref = self.builtin(builtin)?;
        let mut kernel = lock_kernel(&kernel_ref);

        kernel.set_arg_buffer_with_alloc(0, dst.aligned_base, &dst.allocation)?;
        set_arg(&mut *kernel, 1, to_u32(dst.offset, "fill offset too large")?)?;
        let group_width = if immediate {
            set_arg(&mut *kernel, 2, u32::from(pattern[0]))?;
            kernel.simd_size()
        } else {
            let pattern_alloc = self
                .device
                .allocate_host_memory(pattern)
                .map_err(out_of_resources(pattern.len() as u64))?;
            self.container.queue_deallocation(pattern_alloc.clone());
            kernel.set_arg_buffer_with_alloc(2, pattern_alloc.gpu_address, &pattern_alloc)?;
            let pattern_size = to_u32(pattern.len() as u64, "fill pattern too large")?;
            set_arg(&mut *kernel, 3, pattern_size)?;
            pattern_size
        };

        let split = split_fill(size, group_width);
        debug!(
            size,
            pattern_size = pattern.len(),
            group_width = split.group_width,
            groups = split.groups,
            remainder = split.remainder,
            "memory fill split"
        );

        self.container.add_to_residency(&dst.allocation);

        if split.groups > 0 {
            kernel
                .set_group_size([split.group_width, 1, 1])
                .map_err(|_| CmdListError::Unknown("fill group size rejected"))?;
            let groups = to_u32(split.groups, "fill too large")?;
            self.encode_kernel_launch(&*kernel, [groups, 1, 1], WalkerFlags::empty());
        }

        if split.remainder > 0 {
            let offset = dst.offset + size - split.remainder;
            set_arg(&mut *kernel, 1, to_u32(offset, "fill offset too large")?)?;
            kernel
                .set_group_size([split.remainder as u32, 1, 1])
                .map_err(|_| CmdListError::Unknown("fill remainder group size rejected"))?;
            self.encode_kernel_launch(&*kernel, [1, 1, 1], WalkerFlags::empty());
        }

        self.flush_if_needed(dst.needs_flush);
        Ok(())
    }
}
