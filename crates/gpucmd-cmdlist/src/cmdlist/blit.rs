//! Copy-engine encodings. Copy-only lists route every copy and fill here;
//! other lists reach it only through the explicit `*_blit` appends.

use gpucmd_hw::{BlitProperties, Vec3};
use tracing::debug;

use super::{CommandList, EventArgs};
use crate::aligned::AlignedAllocation;
use crate::device::AllocationRef;
use crate::error::{out_of_resources, CmdListError};

fn blit_within(alloc: &AllocationRef, offset: u64, size: u64) -> Result<(), CmdListError> {
    match offset.checked_add(size) {
        Some(end) if end <= alloc.size => Ok(()),
        _ => Err(CmdListError::InvalidArgument(
            "blit range outside of its allocation",
        )),
    }
}

impl CommandList {
    pub fn append_memory_copy_blit(
        &mut self,
        dst: &AllocationRef,
        dst_offset: u64,
        src: &AllocationRef,
        src_offset: u64,
        size: u64,
        events: EventArgs<'_>,
    ) -> Result<(), CmdListError> {
        blit_within(dst, dst_offset, size)?;
        blit_within(src, src_offset, size)?;
        self.record("append_memory_copy_blit", events, |list| {
            let props =
                BlitProperties::for_copy_buffer(dst.gpu_address, src.gpu_address, Vec3::new(size, 1, 1))
                    .with_offsets(Vec3::new(dst_offset, 0, 0), Vec3::new(src_offset, 0, 0));
            list.encode_blit_buffer(dst, src, &props)
        })
    }

    /// Pitched buffer copy on the copy engine. `props` addresses must point
    /// into `dst` and `src`.
    pub fn append_memory_copy_blit_region(
        &mut self,
        dst: &AllocationRef,
        src: &AllocationRef,
        props: &BlitProperties,
        events: EventArgs<'_>,
    ) -> Result<(), CmdListError> {
        if !dst.contains(props.dst_gpu_address, 1) || !src.contains(props.src_gpu_address, 1) {
            return Err(CmdListError::InvalidArgument(
                "blit addresses outside of their allocations",
            ));
        }
        self.record("append_memory_copy_blit_region", events, |list| {
            list.encode_blit_buffer(dst, src, props)
        })
    }

    pub fn append_copy_image_blit(
        &mut self,
        dst: &AllocationRef,
        src: &AllocationRef,
        props: &BlitProperties,
        events: EventArgs<'_>,
    ) -> Result<(), CmdListError> {
        if props.bytes_per_pixel.is_none() {
            return Err(CmdListError::InvalidArgument(
                "image blit without bytes per pixel",
            ));
        }
        self.record("append_copy_image_blit", events, |list| {
            list.encode_blit_images(dst, src, props)
        })
    }

    pub fn append_blit_fill(
        &mut self,
        ptr: u64,
        pattern: &[u8],
        size: u64,
        events: EventArgs<'_>,
    ) -> Result<(), CmdListError> {
        if pattern.is_empty() {
            return Err(CmdListError::InvalidArgument("empty fill pattern"));
        }
        self.record("append_blit_fill", events, |list| {
            list.encode_blit_fill(ptr, pattern, size)
        })
    }

    pub(super) fn encode_blit_buffer(
        &mut self,
        dst: &AllocationRef,
        src: &AllocationRef,
        props: &BlitProperties,
    ) -> Result<(), CmdListError> {
        self.container.add_to_residency(dst);
        self.container.add_to_residency(src);
        self.encoder
            .dispatch_blit_commands_for_buffer(self.container.stream_mut(), props)?;
        Ok(())
    }

    pub(super) fn encode_blit_images(
        &mut self,
        dst: &AllocationRef,
        src: &AllocationRef,
        props: &BlitProperties,
    ) -> Result<(), CmdListError> {
        self.container.add_to_residency(dst);
        self.container.add_to_residency(src);
        self.encoder
            .dispatch_blit_commands_for_images(self.container.stream_mut(), props)?;
        Ok(())
    }

    pub(super) fn encode_aligned_copy_blit(
        &mut self,
        dst: &AlignedAllocation,
        src: &AlignedAllocation,
        offset: u64,
        size: u64,
    ) -> Result<(), CmdListError> {
        let props = BlitProperties::for_copy_buffer(
            dst.aligned_base,
            src.aligned_base,
            Vec3::new(size, 1, 1),
        )
        .with_offsets(
            Vec3::new(dst.offset + offset, 0, 0),
            Vec3::new(src.offset + offset, 0, 0),
        );
        self.encode_blit_buffer(&dst.allocation, &src.allocation, &props)
    }

    /// Color-fill whole patterns; anything the fill engine cannot express is
    /// staged in host memory and copied.
    pub(super) fn encode_blit_fill(
        &mut self,
        ptr: u64,
        pattern: &[u8],
        size: u64,
    ) -> Result<(), CmdListError> {
        if pattern.is_empty() {
            return Err(CmdListError::InvalidArgument("empty fill pattern"));
        }
        if size == 0 {
            return Ok(());
        }

        let alloc = self
            .device
            .find_allocation_for_range(ptr, size)
            .ok_or(CmdListError::InvalidArgument(
                "fill destination is not a known allocation",
            ))?;

        if self.encoder.use_mem_copy_to_blit_fill(pattern.len()) {
            return self.encode_staged_fill_copy(&alloc, ptr, pattern, size);
        }

        let tail = size % pattern.len() as u64;
        let body = size - tail;
        if body > 0 {
            self.container.add_to_residency(&alloc);
            self.encoder.dispatch_blit_memory_color_fill(
                self.container.stream_mut(),
                ptr,
                pattern,
                body,
            )?;
        }
        if tail > 0 {
            // `body` is a whole number of patterns, so the tail restarts it.
            self.encode_staged_fill_copy(&alloc, ptr + body, pattern, tail)?;
        }
        Ok(())
    }

    fn encode_staged_fill_copy(
        &mut self,
        dst: &AllocationRef,
        dst_address: u64,
        pattern: &[u8],
        size: u64,
    ) -> Result<(), CmdListError> {
        let len = usize::try_from(size)
            .map_err(|_| CmdListError::InvalidArgument("fill too large"))?;
        let data: Vec<u8> = pattern.iter().copied().cycle().take(len).collect();
        let staging = self
            .device
            .allocate_host_memory(&data)
            .map_err(out_of_resources(size))?;
        self.container.queue_deallocation(staging.clone());
        debug!(
            size,
            pattern_size = pattern.len(),
            staging = staging.id,
            "blit fill through staged copy"
        );

        let props = BlitProperties::for_copy_buffer(
            dst_address,
            staging.gpu_address,
            Vec3::new(size, 1, 1),
        );
        self.encode_blit_buffer(dst, &staging, &props)
    }
}
