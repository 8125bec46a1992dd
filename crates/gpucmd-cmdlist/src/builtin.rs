use crate::error::CmdListError;

/// Precompiled data-movement kernels provided by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Builtin {
    CopyBufferToBufferSide,
    CopyBufferToBufferMiddle,
    CopyBufferRectBytes2d,
    CopyBufferRectBytes3d,
    FillBufferImmediate,
    FillBufferSshOffset,
    CopyBufferToImage3dBytes,
    CopyBufferToImage3d2Bytes,
    CopyBufferToImage3d4Bytes,
    CopyBufferToImage3d8Bytes,
    CopyBufferToImage3d16Bytes,
    CopyImage3dToBufferBytes,
    CopyImage3dToBuffer2Bytes,
    CopyImage3dToBuffer4Bytes,
    CopyImage3dToBuffer8Bytes,
    CopyImage3dToBuffer16Bytes,
    CopyImageRegion,
    PageFaultCopy,
}

impl Builtin {
    pub fn copy_buffer_to_image(bytes_per_pixel: u32) -> Result<Self, CmdListError> {
        match bytes_per_pixel {
            1 => Ok(Builtin::CopyBufferToImage3dBytes),
            2 => Ok(Builtin::CopyBufferToImage3d2Bytes),
            4 => Ok(Builtin::CopyBufferToImage3d4Bytes),
            8 => Ok(Builtin::CopyBufferToImage3d8Bytes),
            16 => Ok(Builtin::CopyBufferToImage3d16Bytes),
            _ => Err(CmdListError::InvalidArgument("unsupported image element size")),
        }
    }

    pub fn copy_image_to_buffer(bytes_per_pixel: u32) -> Result<Self, CmdListError> {
        match bytes_per_pixel {
            1 => Ok(Builtin::CopyImage3dToBufferBytes),
            2 => Ok(Builtin::CopyImage3dToBuffer2Bytes),
            4 => Ok(Builtin::CopyImage3dToBuffer4Bytes),
            8 => Ok(Builtin::CopyImage3dToBuffer8Bytes),
            16 => Ok(Builtin::CopyImage3dToBuffer16Bytes),
            _ => Err(CmdListError::InvalidArgument("unsupported image element size")),
        }
    }
}
