use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HwError {
    #[error("fill pattern size {size} is not supported by the copy engine")]
    UnsupportedPatternSize { size: usize },

    #[error("fill size {size} is not a multiple of the pattern size {pattern_size}")]
    FillSizeNotMultiple { size: u64, pattern_size: usize },

    #[error("image blit requires bytes_per_pixel")]
    MissingBytesPerPixel,

    #[error("unsupported bytes per pixel {bytes}")]
    UnsupportedPixelSize { bytes: u32 },

    #[error("{what} {value} exceeds the copy engine limit")]
    BlitTooLarge { what: &'static str, value: u64 },

    #[error("GPU address computation overflowed")]
    AddressOverflow,
}
