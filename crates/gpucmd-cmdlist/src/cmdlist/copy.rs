use gpucmd_hw::cmd::WalkerFlags;
use gpucmd_hw::{BlitProperties, Vec3};
use tracing::debug;

use super::{lock_kernel, CommandList, EventArgs};
use crate::aligned::AlignedAllocation;
use crate::builtin::Builtin;
use crate::device::AllocationRef;
use crate::error::CmdListError;
use crate::kernel::set_arg;
use crate::region::{
    dispatch_grid, groups_for, split_linear_copy, to_u32, CopyRegion, WIDE_ELEMENT_SIZE,
};

impl CommandList {
    pub fn append_memory_copy(
        &mut self,
        dst: u64,
        src: u64,
        size: u64,
        events: EventArgs<'_>,
    ) -> Result<(), CmdListError> {
        self.record("append_memory_copy", events, |list| {
            list.encode_memory_copy(dst, src, size)
        })
    }

    /// Copy a pitched rectangle (or box when `depth > 1`) between buffers.
    #[allow(clippy::too_many_arguments)]
    pub fn append_memory_copy_region(
        &mut self,
        dst: u64,
        dst_region: &CopyRegion,
        dst_pitch: u32,
        dst_slice_pitch: u32,
        src: u64,
        src_region: &CopyRegion,
        src_pitch: u32,
        src_slice_pitch: u32,
        events: EventArgs<'_>,
    ) -> Result<(), CmdListError> {
        if !dst_region.same_extent(src_region) {
            return Err(CmdListError::InvalidArgument(
                "source and destination regions differ in size",
            ));
        }
        self.record("append_memory_copy_region", events, |list| {
            list.encode_memory_copy_region(
                dst,
                dst_region,
                (u64::from(dst_pitch), u64::from(dst_slice_pitch)),
                src,
                src_region,
                (u64::from(src_pitch), u64::from(src_slice_pitch)),
            )
        })
    }

    /// Migrate `size` bytes between two allocations, e.g. to service a page
    /// fault. `flush_host` makes the result visible to the host.
    pub fn append_page_fault_copy(
        &mut self,
        dst: &AllocationRef,
        src: &AllocationRef,
        size: u64,
        flush_host: bool,
    ) -> Result<(), CmdListError> {
        if size > dst.size || size > src.size {
            return Err(CmdListError::InvalidArgument(
                "page fault copy larger than its allocations",
            ));
        }
        self.record("append_page_fault_copy", EventArgs::none(), |list| {
            if list.desc.copy_only {
                let props = BlitProperties::for_copy_buffer(
                    dst.gpu_address,
                    src.gpu_address,
                    Vec3::new(size, 1, 1),
                );
                return list.encode_blit_buffer(dst, src, &props);
            }

            let kernel_ref = list.builtin(Builtin::PageFaultCopy)?;
            let mut kernel = lock_kernel(&kernel_ref);
            let simd = kernel.simd_size();
            kernel.set_arg_buffer_with_alloc(0, dst.gpu_address, dst)?;
            kernel.set_arg_buffer_with_alloc(1, src.gpu_address, src)?;
            set_arg(&mut *kernel, 2, size)?;
            kernel
                .set_group_size([simd, 1, 1])
                .map_err(|_| CmdListError::Unknown("page fault copy group size rejected"))?;
            let groups = to_u32(groups_for(size, simd, 1), "page fault copy too large")?;

            list.container.add_to_residency(dst);
            list.container.add_to_residency(src);
            list.encode_kernel_launch(&*kernel, [groups, 1, 1], WalkerFlags::empty());
            if flush_host {
                list.encode_dc_flush();
            }
            Ok(())
        })
    }

    pub(super) fn encode_memory_copy(
        &mut self,
        dst: u64,
        src: u64,
        size: u64,
    ) -> Result<(), CmdListError> {
        if size == 0 {
            return Ok(());
        }

        let dst_alloc = self.resolve(dst, size)?;
        let src_alloc = self.resolve(src, size)?;

        let cache_line = self.encoder.hw_info().cache_line_size;
        let split = split_linear_copy(dst, src, size, cache_line);
        debug!(
            dst,
            src,
            size,
            left = split.left,
            middle = split.middle,
            right = split.right,
            "memory copy split"
        );

        let segments = [
            (Builtin::CopyBufferToBufferSide, 0, split.left, 1),
            (
                Builtin::CopyBufferToBufferMiddle,
                split.left,
                split.middle,
                WIDE_ELEMENT_SIZE,
            ),
            (
                Builtin::CopyBufferToBufferSide,
                split.left + split.middle,
                split.right,
                1,
            ),
        ];
        for (builtin, offset, bytes, element_size) in segments {
            if bytes == 0 {
                continue;
            }
            if self.desc.copy_only {
                self.encode_aligned_copy_blit(&dst_alloc, &src_alloc, offset, bytes)?;
            } else {
                self.encode_copy_segment(builtin, &dst_alloc, &src_alloc, offset, bytes, element_size)?;
            }
        }

        self.flush_if_needed(dst_alloc.needs_flush);
        Ok(())
    }

    fn encode_copy_segment(
        &mut self,
        builtin: Builtin,
        dst: &AlignedAllocation,
        src: &AlignedAllocation,
        offset: u64,
        bytes: u64,
        element_size: u64,
    ) -> Result<(), CmdListError> {
        let kernel_ref = self.builtin(builtin)?;
        let mut kernel = lock_kernel(&kernel_ref);
        let simd = kernel.simd_size();

        kernel.set_arg_buffer_with_alloc(0, dst.aligned_base, &dst.allocation)?;
        kernel.set_arg_buffer_with_alloc(1, src.aligned_base, &src.allocation)?;
        set_arg(&mut *kernel, 2, to_u32(dst.offset + offset, "copy offset too large")?)?;
        set_arg(&mut *kernel, 3, to_u32(src.offset + offset, "copy offset too large")?)?;
        set_arg(&mut *kernel, 4, to_u32(bytes / element_size, "copy too large")?)?;
        kernel
            .set_group_size([simd, 1, 1])
            .map_err(|_| CmdListError::Unknown("copy group size rejected"))?;
        let groups = to_u32(groups_for(bytes, simd, element_size), "copy too large")?;

        self.container.add_to_residency(&dst.allocation);
        self.container.add_to_residency(&src.allocation);
        self.encode_kernel_launch(&*kernel, [groups, 1, 1], WalkerFlags::empty());
        Ok(())
    }

    fn encode_memory_copy_region(
        &mut self,
        dst: u64,
        dst_region: &CopyRegion,
        (dst_pitch, dst_slice_pitch): (u64, u64),
        src: u64,
        src_region: &CopyRegion,
        (src_pitch, src_slice_pitch): (u64, u64),
    ) -> Result<(), CmdListError> {
        let extent_of = |region: &CopyRegion, pitch: u64, slice_pitch: u64| {
            region
                .byte_extent(pitch, slice_pitch)
                .ok_or(CmdListError::InvalidArgument("region extent overflows"))
        };
        let dst_alloc = self.resolve(dst, extent_of(dst_region, dst_pitch, dst_slice_pitch)?)?;
        let src_alloc = self.resolve(src, extent_of(src_region, src_pitch, src_slice_pitch)?)?;

        let dst_origin = Vec3::new(
            u64::from(dst_region.origin_x) + dst_alloc.offset,
            u64::from(dst_region.origin_y),
            u64::from(dst_region.origin_z),
        );
        let src_origin = Vec3::new(
            u64::from(src_region.origin_x) + src_alloc.offset,
            u64::from(src_region.origin_y),
            u64::from(src_region.origin_z),
        );
        let extent = [
            src_region.width,
            src_region.height.max(1),
            src_region.depth.max(1),
        ];

        if self.desc.copy_only {
            let props = BlitProperties::for_copy_buffer(
                dst_alloc.aligned_base,
                src_alloc.aligned_base,
                Vec3::new(
                    u64::from(extent[0]),
                    u64::from(extent[1]),
                    u64::from(extent[2]),
                ),
            )
            .with_offsets(dst_origin, src_origin)
            .with_dst_pitches(dst_pitch, dst_slice_pitch)
            .with_src_pitches(src_pitch, src_slice_pitch);
            return self.encode_blit_buffer(&dst_alloc.allocation, &src_alloc.allocation, &props);
        }

        let is_3d = src_region.is_3d();
        let builtin = if is_3d {
            Builtin::CopyBufferRectBytes3d
        } else {
            Builtin::CopyBufferRectBytes2d
        };
        let kernel_ref = self.builtin(builtin)?;
        let mut kernel = lock_kernel(&kernel_ref);

        kernel.set_arg_buffer_with_alloc(0, src_alloc.aligned_base, &src_alloc.allocation)?;
        kernel.set_arg_buffer_with_alloc(1, dst_alloc.aligned_base, &dst_alloc.allocation)?;
        let origin = |v: Vec3<u64>| -> Result<[u32; 3], CmdListError> {
            Ok([
                to_u32(v.x, "region origin too large")?,
                to_u32(v.y, "region origin too large")?,
                to_u32(v.z, "region origin too large")?,
            ])
        };
        let src_origin = origin(src_origin)?;
        let dst_origin = origin(dst_origin)?;
        let pitch = |v: u64| to_u32(v, "region pitch too large");
        if is_3d {
            set_arg(&mut *kernel, 2, src_origin)?;
            set_arg(&mut *kernel, 3, dst_origin)?;
            set_arg(&mut *kernel, 4, [pitch(src_pitch)?, pitch(src_slice_pitch)?])?;
            set_arg(&mut *kernel, 5, [pitch(dst_pitch)?, pitch(dst_slice_pitch)?])?;
        } else {
            set_arg(&mut *kernel, 2, [src_origin[0], src_origin[1]])?;
            set_arg(&mut *kernel, 3, [dst_origin[0], dst_origin[1]])?;
            set_arg(&mut *kernel, 4, pitch(src_pitch)?)?;
            set_arg(&mut *kernel, 5, pitch(dst_pitch)?)?;
        }

        let groups = dispatch_grid(&mut *kernel, extent)?;
        debug!(?extent, ?groups, is_3d, "memory copy region");

        self.container.add_to_residency(&dst_alloc.allocation);
        self.container.add_to_residency(&src_alloc.allocation);
        self.encode_kernel_launch(&*kernel, groups, WalkerFlags::empty());
        self.flush_if_needed(dst_alloc.needs_flush);
        Ok(())
    }
}
