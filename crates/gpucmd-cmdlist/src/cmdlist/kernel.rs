use gpucmd_hw::cmd::{WalkerArgs, WalkerFlags, GPGPU_DISPATCHDIMX, GPGPU_DISPATCHDIMY, GPGPU_DISPATCHDIMZ};
use tracing::debug;

use super::{CommandList, EventArgs};
use crate::error::CmdListError;
use crate::kernel::Kernel;
use crate::region::GroupCount;

impl CommandList {
    pub fn append_launch_kernel(
        &mut self,
        kernel: &dyn Kernel,
        group_count: GroupCount,
        events: EventArgs<'_>,
    ) -> Result<(), CmdListError> {
        self.ensure_compute("append_launch_kernel")?;
        self.record("append_launch_kernel", events, |list| {
            list.encode_kernel_launch(kernel, group_count.as_array(), WalkerFlags::empty());
            Ok(())
        })
    }

    pub fn append_launch_cooperative_kernel(
        &mut self,
        _kernel: &dyn Kernel,
        _group_count: GroupCount,
        _events: EventArgs<'_>,
    ) -> Result<(), CmdListError> {
        Err(CmdListError::UnsupportedFeature("cooperative kernel launch"))
    }

    /// Launch with the group count read by the GPU from `group_count_address`.
    pub fn append_launch_kernel_indirect(
        &mut self,
        kernel: &dyn Kernel,
        group_count_address: u64,
        events: EventArgs<'_>,
    ) -> Result<(), CmdListError> {
        self.ensure_compute("append_launch_kernel_indirect")?;
        self.record("append_launch_kernel_indirect", events, |list| {
            list.make_resident_range(group_count_address, GroupCount::SIZE_BYTES)?;
            list.encode_load_group_count(group_count_address);
            list.encode_kernel_launch(kernel, [0; 3], WalkerFlags::INDIRECT);
            Ok(())
        })
    }

    /// Launch `kernels[i]` with the group count at
    /// `group_counts_address + i * 12` while the `u32` at `count_address` is
    /// greater than `i`.
    pub fn append_launch_multiple_kernels_indirect(
        &mut self,
        kernels: &[&dyn Kernel],
        count_address: u64,
        group_counts_address: u64,
        events: EventArgs<'_>,
    ) -> Result<(), CmdListError> {
        self.ensure_compute("append_launch_multiple_kernels_indirect")?;
        if kernels.is_empty() {
            return Err(CmdListError::InvalidArgument("no kernels to launch"));
        }

        self.record("append_launch_multiple_kernels_indirect", events, |list| {
            list.make_resident_range(count_address, 4)?;
            list.make_resident_range(
                group_counts_address,
                GroupCount::SIZE_BYTES * kernels.len() as u64,
            )?;
            for (i, kernel) in kernels.iter().enumerate() {
                list.encode_load_group_count(group_counts_address + GroupCount::SIZE_BYTES * i as u64);
                list.encoder.encode_greater_than_predicate(
                    list.container.stream_mut(),
                    count_address,
                    i as u32,
                );
                list.encode_kernel_launch(
                    *kernel,
                    [0; 3],
                    WalkerFlags::INDIRECT | WalkerFlags::PREDICATED,
                );
            }
            Ok(())
        })
    }

    fn ensure_compute(&self, op: &'static str) -> Result<(), CmdListError> {
        if self.desc.copy_only {
            debug!(op, "kernel launch on copy-only command list");
            return Err(CmdListError::UnsupportedFeature(
                "kernel launch on a copy-only command list",
            ));
        }
        Ok(())
    }

    fn make_resident_range(&mut self, address: u64, size: u64) -> Result<(), CmdListError> {
        let alloc = self
            .device
            .find_allocation_for_range(address, size)
            .ok_or(CmdListError::InvalidArgument(
                "indirect arguments are not in a known allocation",
            ))?;
        self.container.add_to_residency(&alloc);
        Ok(())
    }

    fn encode_load_group_count(&mut self, address: u64) {
        let stream = self.container.stream_mut();
        self.encoder
            .encode_load_register_mem(stream, GPGPU_DISPATCHDIMX, address);
        self.encoder
            .encode_load_register_mem(stream, GPGPU_DISPATCHDIMY, address + 4);
        self.encoder
            .encode_load_register_mem(stream, GPGPU_DISPATCHDIMZ, address + 8);
    }

    pub(super) fn encode_kernel_launch<K: Kernel + ?Sized>(
        &mut self,
        kernel: &K,
        group_count: [u32; 3],
        flags: WalkerFlags,
    ) {
        self.container.add_all_to_residency(kernel.residency());
        let args = WalkerArgs {
            kernel_id: kernel.kernel_id(),
            flags,
            group_count,
            group_size: kernel.group_size(),
            simd_size: kernel.simd_size(),
            payload: kernel.cross_thread_data(),
        };
        self.encoder
            .encode_walker(self.container.stream_mut(), &args);
    }
}
