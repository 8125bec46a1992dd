use gpucmd_hw::Vec3;

use crate::device::AllocationRef;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageType {
    Image1D,
    Image1DArray,
    Image2D,
    Image2DArray,
    Image3D,
}

/// Image shape. For array types `height` (1D arrays) or `depth` (2D arrays)
/// holds the layer count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    pub image_type: ImageType,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub bytes_per_pixel: u32,
}

/// Origin and extent of an image region, in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageRegion {
    pub origin: Vec3<u32>,
    pub extent: Vec3<u32>,
}

#[derive(Clone, Debug)]
pub struct Image {
    allocation: AllocationRef,
    desc: ImageDesc,
}

impl Image {
    pub fn new(allocation: AllocationRef, desc: ImageDesc) -> Self {
        Self { allocation, desc }
    }

    pub fn allocation(&self) -> &AllocationRef {
        &self.allocation
    }

    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    pub fn gpu_address(&self) -> u64 {
        self.allocation.gpu_address
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.desc.bytes_per_pixel
    }

    pub fn extent(&self) -> Vec3<u32> {
        Vec3::new(
            self.desc.width.max(1),
            self.desc.height.max(1),
            self.desc.depth.max(1),
        )
    }

    pub fn row_pitch(&self) -> u64 {
        u64::from(self.desc.width) * u64::from(self.desc.bytes_per_pixel)
    }

    pub fn slice_pitch(&self) -> u64 {
        self.row_pitch() * u64::from(self.desc.height.max(1))
    }

    pub fn full_region(&self) -> ImageRegion {
        ImageRegion {
            origin: Vec3::default(),
            extent: self.extent(),
        }
    }

    pub fn contains_region(&self, region: &ImageRegion) -> bool {
        let extent = self.extent();
        let fits = |origin: u32, len: u32, max: u32| {
            origin.checked_add(len).is_some_and(|end| end <= max)
        };
        fits(region.origin.x, region.extent.x, extent.x)
            && fits(region.origin.y, region.extent.y, extent.y)
            && fits(region.origin.z, region.extent.z, extent.z)
    }

    /// Bytes a linear buffer needs to hold `region` of this image. Array
    /// layers are counted, since they live in `height` or `depth`.
    pub fn input_buffer_size(&self, region: &ImageRegion) -> u64 {
        let bpp = u64::from(self.desc.bytes_per_pixel);
        let w = u64::from(region.extent.x);
        let h = u64::from(region.extent.y.max(1));
        let d = u64::from(region.extent.z.max(1));
        match self.desc.image_type {
            ImageType::Image1D => w * bpp,
            ImageType::Image1DArray | ImageType::Image2D => w * h * bpp,
            ImageType::Image2DArray | ImageType::Image3D => w * h * d * bpp,
        }
    }
}
