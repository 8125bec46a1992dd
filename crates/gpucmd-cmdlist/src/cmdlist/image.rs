use gpucmd_hw::cmd::WalkerFlags;
use gpucmd_hw::{BlitProperties, Vec3};
use tracing::debug;

use super::{lock_kernel, CommandList, EventArgs};
use crate::builtin::Builtin;
use crate::error::CmdListError;
use crate::image::{Image, ImageRegion, ImageType};
use crate::kernel::set_arg;
use crate::region::{dispatch_grid, to_u32};

fn region_or_full(image: &Image, region: Option<&ImageRegion>) -> Result<ImageRegion, CmdListError> {
    let region = region.copied().unwrap_or_else(|| image.full_region());
    if !image.contains_region(&region) {
        return Err(CmdListError::InvalidArgument("image region out of bounds"));
    }
    Ok(region)
}

fn widen(v: Vec3<u32>) -> Vec3<u64> {
    Vec3::new(u64::from(v.x), u64::from(v.y), u64::from(v.z))
}

fn origin_array(v: Vec3<u32>) -> [u32; 3] {
    [v.x, v.y, v.z]
}

fn extent_array(v: Vec3<u32>) -> [u32; 3] {
    [v.x, v.y.max(1), v.z.max(1)]
}

/// Row and slice pitch of a tightly packed buffer holding `region` of
/// `image`. 1D array layers are rows, so they step by the row pitch.
fn packed_pitches(image: &Image, region: &ImageRegion) -> (u64, u64) {
    let row = u64::from(region.extent.x) * u64::from(image.bytes_per_pixel());
    let rows_per_slice = match image.desc().image_type {
        ImageType::Image1DArray => 1,
        _ => u64::from(region.extent.y.max(1)),
    };
    (row, row * rows_per_slice)
}

impl CommandList {
    pub fn append_image_copy(
        &mut self,
        dst: &Image,
        src: &Image,
        events: EventArgs<'_>,
    ) -> Result<(), CmdListError> {
        self.append_image_copy_region(dst, src, None, None, events)
    }

    /// Copy between images. A missing region means the whole image.
    pub fn append_image_copy_region(
        &mut self,
        dst: &Image,
        src: &Image,
        dst_region: Option<&ImageRegion>,
        src_region: Option<&ImageRegion>,
        events: EventArgs<'_>,
    ) -> Result<(), CmdListError> {
        let dst_region = region_or_full(dst, dst_region)?;
        let src_region = region_or_full(src, src_region)?;
        if extent_array(dst_region.extent) != extent_array(src_region.extent) {
            return Err(CmdListError::InvalidArgument(
                "source and destination image regions differ in size",
            ));
        }
        if dst.bytes_per_pixel() != src.bytes_per_pixel() {
            return Err(CmdListError::InvalidArgument("image element sizes differ"));
        }

        self.record("append_image_copy_region", events, |list| {
            if list.desc.copy_only {
                let props = BlitProperties::for_copy_image(
                    dst.gpu_address(),
                    src.gpu_address(),
                    src.bytes_per_pixel(),
                    widen(src_region.extent),
                )
                .with_offsets(widen(dst_region.origin), widen(src_region.origin))
                .with_dst_pitches(dst.row_pitch(), dst.slice_pitch())
                .with_src_pitches(src.row_pitch(), src.slice_pitch())
                .with_image_sizes(dst.extent(), src.extent());
                return list.encode_blit_images(dst.allocation(), src.allocation(), &props);
            }

            let kernel_ref = list.builtin(Builtin::CopyImageRegion)?;
            let mut kernel = lock_kernel(&kernel_ref);
            kernel.set_arg_image(0, src)?;
            kernel.set_arg_image(1, dst)?;
            set_arg(&mut *kernel, 2, origin_array(src_region.origin))?;
            set_arg(&mut *kernel, 3, origin_array(dst_region.origin))?;
            let groups = dispatch_grid(&mut *kernel, extent_array(src_region.extent))?;
            debug!(?groups, "image copy region");

            list.container.add_to_residency(src.allocation());
            list.container.add_to_residency(dst.allocation());
            list.encode_kernel_launch(&*kernel, groups, WalkerFlags::empty());
            Ok(())
        })
    }

    /// Upload `region` of `image` from the tightly packed buffer at `src`.
    pub fn append_image_copy_from_memory(
        &mut self,
        image: &Image,
        src: u64,
        region: Option<&ImageRegion>,
        events: EventArgs<'_>,
    ) -> Result<(), CmdListError> {
        let region = region_or_full(image, region)?;
        let bpp = image.bytes_per_pixel();
        let builtin = Builtin::copy_buffer_to_image(bpp)?;

        self.record("append_image_copy_from_memory", events, |list| {
            let src_alloc = list.resolve(src, image.input_buffer_size(&region))?;
            let (row_pitch, slice_pitch) = packed_pitches(image, &region);

            if list.desc.copy_only {
                let props = BlitProperties::for_copy_image(
                    image.gpu_address(),
                    src_alloc.address(),
                    bpp,
                    widen(region.extent),
                )
                .with_offsets(widen(region.origin), Vec3::default())
                .with_dst_pitches(image.row_pitch(), image.slice_pitch())
                .with_src_pitches(row_pitch, slice_pitch);
                return list.encode_blit_images(image.allocation(), &src_alloc.allocation, &props);
            }

            let kernel_ref = list.builtin(builtin)?;
            let mut kernel = lock_kernel(&kernel_ref);
            kernel.set_arg_buffer_with_alloc(0, src_alloc.aligned_base, &src_alloc.allocation)?;
            kernel.set_arg_image(1, image)?;
            set_arg(&mut *kernel, 2, to_u32(src_alloc.offset, "buffer offset too large")?)?;
            set_arg(&mut *kernel, 3, origin_array(region.origin))?;
            set_arg(
                &mut *kernel,
                4,
                [
                    to_u32(row_pitch, "row pitch too large")?,
                    to_u32(slice_pitch, "slice pitch too large")?,
                ],
            )?;
            let groups = dispatch_grid(&mut *kernel, extent_array(region.extent))?;
            debug!(?groups, bpp, "image copy from memory");

            list.container.add_to_residency(&src_alloc.allocation);
            list.container.add_to_residency(image.allocation());
            list.encode_kernel_launch(&*kernel, groups, WalkerFlags::empty());
            Ok(())
        })
    }

    /// Download `region` of `image` into a tightly packed buffer at `dst`.
    pub fn append_image_copy_to_memory(
        &mut self,
        dst: u64,
        image: &Image,
        region: Option<&ImageRegion>,
        events: EventArgs<'_>,
    ) -> Result<(), CmdListError> {
        let region = region_or_full(image, region)?;
        let bpp = image.bytes_per_pixel();
        let builtin = Builtin::copy_image_to_buffer(bpp)?;

        self.record("append_image_copy_to_memory", events, |list| {
            let dst_alloc = list.resolve(dst, image.input_buffer_size(&region))?;
            let (row_pitch, slice_pitch) = packed_pitches(image, &region);

            if list.desc.copy_only {
                let props = BlitProperties::for_copy_image(
                    dst_alloc.address(),
                    image.gpu_address(),
                    bpp,
                    widen(region.extent),
                )
                .with_offsets(Vec3::default(), widen(region.origin))
                .with_dst_pitches(row_pitch, slice_pitch)
                .with_src_pitches(image.row_pitch(), image.slice_pitch());
                return list.encode_blit_images(&dst_alloc.allocation, image.allocation(), &props);
            }

            let kernel_ref = list.builtin(builtin)?;
            let mut kernel = lock_kernel(&kernel_ref);
            kernel.set_arg_image(0, image)?;
            kernel.set_arg_buffer_with_alloc(1, dst_alloc.aligned_base, &dst_alloc.allocation)?;
            set_arg(&mut *kernel, 2, origin_array(region.origin))?;
            set_arg(&mut *kernel, 3, to_u32(dst_alloc.offset, "buffer offset too large")?)?;
            set_arg(
                &mut *kernel,
                4,
                [
                    to_u32(row_pitch, "row pitch too large")?,
                    to_u32(slice_pitch, "slice pitch too large")?,
                ],
            )?;
            let groups = dispatch_grid(&mut *kernel, extent_array(region.extent))?;
            debug!(?groups, bpp, "image copy to memory");

            list.container.add_to_residency(image.allocation());
            list.container.add_to_residency(&dst_alloc.allocation);
            list.encode_kernel_launch(&*kernel, groups, WalkerFlags::empty());
            list.flush_if_needed(dst_alloc.needs_flush);
            Ok(())
        })
    }
}
