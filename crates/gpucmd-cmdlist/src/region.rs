//! Shape math for builtin-kernel copies and fills.

use bytemuck::{Pod, Zeroable};

use crate::error::CmdListError;
use crate::kernel::Kernel;

/// Element width of the cache-line aligned middle copy kernel.
pub const WIDE_ELEMENT_SIZE: u64 = 16;

/// Byte segments of a linear copy, in destination order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinearCopySplit {
    pub left: u64,
    pub middle: u64,
    pub right: u64,
}

/// Split `size` bytes copied to `dst` so the middle segment covers whole
/// destination cache lines.
///
/// When `src + left` is not dword aligned the wide kernel cannot be used and
/// the middle segment folds into `left`.
pub fn split_linear_copy(dst: u64, src: u64, size: u64, cache_line: u64) -> LinearCopySplit {
    let left = ((cache_line - dst % cache_line) % cache_line).min(size);
    let right = (dst.wrapping_add(size) % cache_line).min(size - left);
    let mut split = LinearCopySplit {
        left,
        middle: size - left - right,
        right,
    };
    if src.wrapping_add(split.left) % 4 != 0 {
        split.left += split.middle;
        split.middle = 0;
    }
    split
}

/// Bulk/remainder decomposition of a fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FillSplit {
    pub group_width: u32,
    pub groups: u64,
    pub remainder: u64,
}

pub fn split_fill(size: u64, group_width: u32) -> FillSplit {
    let width = u64::from(group_width.max(1));
    FillSplit {
        group_width: group_width.max(1),
        groups: size / width,
        remainder: size % width,
    }
}

/// Rectangular region of a pitched buffer, in bytes/rows/slices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CopyRegion {
    pub origin_x: u32,
    pub origin_y: u32,
    pub origin_z: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl CopyRegion {
    pub fn is_3d(&self) -> bool {
        self.depth > 1
    }

    pub fn same_extent(&self, other: &CopyRegion) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.depth.max(1) == other.depth.max(1)
    }

    /// Bytes from the buffer base the region is considered to span, or
    /// `None` if that does not fit in a `u64`.
    pub fn byte_extent(&self, pitch: u64, slice_pitch: u64) -> Option<u64> {
        let origin = u64::from(self.origin_y)
            .checked_mul(pitch)?
            .checked_add(u64::from(self.origin_x))?;
        let area = u64::from(self.width).checked_mul(u64::from(self.height))?;
        if self.is_3d() {
            u64::from(self.origin_z)
                .checked_mul(slice_pitch)?
                .checked_add(origin)?
                .checked_add(area.checked_mul(u64::from(self.depth))?)
        } else {
            origin.checked_add(area)
        }
    }
}

/// Indirect dispatch arguments as laid out in GPU memory.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GroupCount {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GroupCount {
    pub const SIZE_BYTES: u64 = 12;

    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub fn as_array(&self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Groups needed to cover `bytes` with one `element_size` element per lane.
pub fn groups_for(bytes: u64, simd_size: u32, element_size: u64) -> u64 {
    let per_group = u64::from(simd_size.max(1)) * element_size;
    bytes.div_ceil(per_group)
}

/// Pick and program a group size for `extent`, returning the group count.
///
/// Every axis of `extent` must be a multiple of the chosen group size.
pub fn dispatch_grid<K: Kernel + ?Sized>(
    kernel: &mut K,
    extent: [u32; 3],
) -> Result<[u32; 3], CmdListError> {
    let group_size = kernel
        .suggest_group_size(extent)
        .map_err(|_| CmdListError::Unknown("group size suggestion failed"))?;
    kernel
        .set_group_size(group_size)
        .map_err(|_| CmdListError::Unknown("group size rejected"))?;

    let mut groups = [0u32; 3];
    for axis in 0..3 {
        let size = group_size[axis];
        if size == 0 || extent[axis] % size != 0 {
            tracing::debug!(?extent, ?group_size, axis, "region not divisible by group size");
            return Err(CmdListError::Unknown(
                "region size not divisible by group size",
            ));
        }
        groups[axis] = extent[axis] / size;
    }
    Ok(groups)
}

pub(crate) fn to_u32(value: u64, what: &'static str) -> Result<u32, CmdListError> {
    u32::try_from(value).map_err(|_| CmdListError::InvalidArgument(what))
}
