//! Copy-engine descriptors and the rules for splitting them into blit packets.

use crate::cmd::{ColorBlt, CopyBlt};
use crate::error::HwError;
use crate::family::HwInfo;
use crate::stream::CommandStream;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Vec3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T> Vec3<T> {
    pub const fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }
}

/// A single copy-engine operation.
///
/// Addresses are GPU virtual addresses of the surface bases; offsets are in
/// bytes for buffer copies and in pixels for image copies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlitProperties {
    pub dst_gpu_address: u64,
    pub src_gpu_address: u64,
    pub dst_offset: Vec3<u64>,
    pub src_offset: Vec3<u64>,
    pub copy_size: Vec3<u64>,
    pub dst_row_pitch: u64,
    pub dst_slice_pitch: u64,
    pub src_row_pitch: u64,
    pub src_slice_pitch: u64,
    pub bytes_per_pixel: Option<u32>,
    pub dst_size: Vec3<u32>,
    pub src_size: Vec3<u32>,
}

impl BlitProperties {
    /// Buffer copy of `copy_size` bytes/rows/slices. Zero `y`/`z` extents are
    /// treated as 1 and unset pitches default to a tightly packed layout.
    pub fn for_copy_buffer(dst_gpu_address: u64, src_gpu_address: u64, copy_size: Vec3<u64>) -> Self {
        let copy_size = Vec3::new(copy_size.x, copy_size.y.max(1), copy_size.z.max(1));
        let row_pitch = copy_size.x;
        let slice_pitch = row_pitch * copy_size.y;
        Self {
            dst_gpu_address,
            src_gpu_address,
            copy_size,
            dst_row_pitch: row_pitch,
            dst_slice_pitch: slice_pitch,
            src_row_pitch: row_pitch,
            src_slice_pitch: slice_pitch,
            ..Default::default()
        }
    }

    /// Image copy of `copy_size` pixels with `bytes_per_pixel` elements.
    pub fn for_copy_image(
        dst_gpu_address: u64,
        src_gpu_address: u64,
        bytes_per_pixel: u32,
        copy_size: Vec3<u64>,
    ) -> Self {
        let mut props = Self::for_copy_buffer(dst_gpu_address, src_gpu_address, copy_size);
        let row_pitch = copy_size.x * u64::from(bytes_per_pixel);
        props.bytes_per_pixel = Some(bytes_per_pixel);
        props.dst_row_pitch = row_pitch;
        props.src_row_pitch = row_pitch;
        props.dst_slice_pitch = row_pitch * props.copy_size.y;
        props.src_slice_pitch = row_pitch * props.copy_size.y;
        props
    }

    pub fn with_offsets(mut self, dst_offset: Vec3<u64>, src_offset: Vec3<u64>) -> Self {
        self.dst_offset = dst_offset;
        self.src_offset = src_offset;
        self
    }

    pub fn with_dst_pitches(mut self, row_pitch: u64, slice_pitch: u64) -> Self {
        self.dst_row_pitch = row_pitch;
        self.dst_slice_pitch = slice_pitch;
        self
    }

    pub fn with_src_pitches(mut self, row_pitch: u64, slice_pitch: u64) -> Self {
        self.src_row_pitch = row_pitch;
        self.src_slice_pitch = slice_pitch;
        self
    }

    pub fn with_image_sizes(mut self, dst_size: Vec3<u32>, src_size: Vec3<u32>) -> Self {
        self.dst_size = dst_size;
        self.src_size = src_size;
        self
    }
}

fn checked_address(
    base: u64,
    x: u64,
    y: u64,
    row_pitch: u64,
    z: u64,
    slice_pitch: u64,
) -> Result<u64, HwError> {
    y.checked_mul(row_pitch)
        .and_then(|row| z.checked_mul(slice_pitch).and_then(|slice| row.checked_add(slice)))
        .and_then(|off| off.checked_add(x))
        .and_then(|off| base.checked_add(off))
        .ok_or(HwError::AddressOverflow)
}

fn to_u32(what: &'static str, value: u64) -> Result<u32, HwError> {
    u32::try_from(value).map_err(|_| HwError::BlitTooLarge { what, value })
}

/// Chunk of a linear run: `width * height` elements starting `offset`
/// elements into the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlitChunk {
    pub offset: u64,
    pub width: u32,
    pub height: u32,
}

/// Split a linear run of `total` elements into copy-engine rectangles.
pub fn split_linear(total: u64, max_width: u32, max_height: u32) -> Vec<BlitChunk> {
    let max_width = u64::from(max_width.max(1));
    let max_height = u64::from(max_height.max(1));
    let mut chunks = Vec::new();
    let mut offset = 0u64;
    while offset < total {
        let remaining = total - offset;
        let width = remaining.min(max_width);
        let height = if remaining <= max_width {
            1
        } else {
            (remaining / width).min(max_height)
        };
        chunks.push(BlitChunk {
            offset,
            width: width as u32,
            height: height as u32,
        });
        offset += width * height;
    }
    chunks
}

pub fn dispatch_buffer(
    stream: &mut CommandStream,
    info: &HwInfo,
    props: &BlitProperties,
) -> Result<(), HwError> {
    let offset = |base: u64, delta: u64| base.checked_add(delta).ok_or(HwError::AddressOverflow);
    for slice in 0..props.copy_size.z {
        for row in 0..props.copy_size.y {
            let dst_row = checked_address(
                props.dst_gpu_address,
                props.dst_offset.x,
                offset(props.dst_offset.y, row)?,
                props.dst_row_pitch,
                offset(props.dst_offset.z, slice)?,
                props.dst_slice_pitch,
            )?;
            let src_row = checked_address(
                props.src_gpu_address,
                props.src_offset.x,
                offset(props.src_offset.y, row)?,
                props.src_row_pitch,
                offset(props.src_offset.z, slice)?,
                props.src_slice_pitch,
            )?;

            for chunk in split_linear(props.copy_size.x, info.max_blit_width, info.max_blit_height) {
                stream.xy_copy_blt(&CopyBlt {
                    color_depth: 1,
                    dst_address: offset(dst_row, chunk.offset)?,
                    src_address: offset(src_row, chunk.offset)?,
                    dst_x: 0,
                    dst_y: 0,
                    src_x: 0,
                    src_y: 0,
                    width: chunk.width,
                    height: chunk.height,
                    dst_pitch: chunk.width,
                    src_pitch: chunk.width,
                });
            }
        }
    }
    Ok(())
}

pub fn dispatch_images(
    stream: &mut CommandStream,
    info: &HwInfo,
    props: &BlitProperties,
) -> Result<(), HwError> {
    let bpp = props.bytes_per_pixel.ok_or(HwError::MissingBytesPerPixel)?;
    if !matches!(bpp, 1 | 2 | 4 | 8 | 16) {
        return Err(HwError::UnsupportedPixelSize { bytes: bpp });
    }
    if props.copy_size.x > u64::from(info.max_blit_width) {
        return Err(HwError::BlitTooLarge {
            what: "image width",
            value: props.copy_size.x,
        });
    }
    if props.copy_size.y > u64::from(info.max_blit_height) {
        return Err(HwError::BlitTooLarge {
            what: "image height",
            value: props.copy_size.y,
        });
    }

    for slice in 0..props.copy_size.z {
        let dst_address = checked_address(
            props.dst_gpu_address,
            0,
            0,
            0,
            props
                .dst_offset
                .z
                .checked_add(slice)
                .ok_or(HwError::AddressOverflow)?,
            props.dst_slice_pitch,
        )?;
        let src_address = checked_address(
            props.src_gpu_address,
            0,
            0,
            0,
            props
                .src_offset
                .z
                .checked_add(slice)
                .ok_or(HwError::AddressOverflow)?,
            props.src_slice_pitch,
        )?;
        stream.xy_copy_blt(&CopyBlt {
            color_depth: bpp,
            dst_address,
            src_address,
            dst_x: to_u32("dst x", props.dst_offset.x)?,
            dst_y: to_u32("dst y", props.dst_offset.y)?,
            src_x: to_u32("src x", props.src_offset.x)?,
            src_y: to_u32("src y", props.src_offset.y)?,
            width: to_u32("image width", props.copy_size.x)?,
            height: to_u32("image height", props.copy_size.y)?,
            dst_pitch: to_u32("dst pitch", props.dst_row_pitch)?,
            src_pitch: to_u32("src pitch", props.src_row_pitch)?,
        });
    }
    Ok(())
}

pub fn dispatch_color_fill(
    stream: &mut CommandStream,
    info: &HwInfo,
    dst_address: u64,
    pattern: &[u8],
    size: u64,
) -> Result<(), HwError> {
    let pattern_size = pattern.len();
    if !matches!(pattern_size, 1 | 2 | 4 | 8 | 16) || pattern_size > info.max_fill_pattern_size {
        return Err(HwError::UnsupportedPatternSize { size: pattern_size });
    }
    if size % pattern_size as u64 != 0 {
        return Err(HwError::FillSizeNotMultiple { size, pattern_size });
    }

    let mut words = [0u32; 4];
    for (i, b) in pattern.iter().enumerate() {
        words[i / 4] |= u32::from(*b) << ((i % 4) * 8);
    }

    let pixels = size / pattern_size as u64;
    for chunk in split_linear(pixels, info.max_blit_width, info.max_blit_height) {
        let address = chunk
            .offset
            .checked_mul(pattern_size as u64)
            .and_then(|off| dst_address.checked_add(off))
            .ok_or(HwError::AddressOverflow)?;
        stream.xy_color_blt(&ColorBlt {
            color_depth: pattern_size as u32,
            dst_address: address,
            width: chunk.width,
            height: chunk.height,
            dst_pitch: chunk.width * pattern_size as u32,
            pattern: words,
        });
    }
    Ok(())
}
