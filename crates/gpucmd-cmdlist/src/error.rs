use gpucmd_hw::HwError;
use thiserror::Error;

use crate::device::DeviceError;
use crate::kernel::KernelError;
use crate::queue::QueueError;

#[derive(Debug, Error)]
pub enum CmdListError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),

    #[error("unknown error: {0}")]
    Unknown(&'static str),

    #[error("out of resources allocating {requested} bytes")]
    OutOfResources { requested: u64 },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Hw(#[from] HwError),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// API-level result taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success,
    InvalidArgument,
    UnsupportedFeature,
    Unknown,
    OutOfResources,
}

impl CmdListError {
    pub fn code(&self) -> ResultCode {
        match self {
            CmdListError::InvalidArgument(_) => ResultCode::InvalidArgument,
            CmdListError::UnsupportedFeature(_) => ResultCode::UnsupportedFeature,
            CmdListError::OutOfResources { .. } => ResultCode::OutOfResources,
            CmdListError::Device(DeviceError::OutOfMemory { .. }) => ResultCode::OutOfResources,
            CmdListError::Hw(HwError::AddressOverflow) => ResultCode::InvalidArgument,
            CmdListError::Unknown(_)
            | CmdListError::Device(_)
            | CmdListError::Hw(_)
            | CmdListError::Kernel(_)
            | CmdListError::Queue(_) => ResultCode::Unknown,
        }
    }
}

impl<T> From<&Result<T, CmdListError>> for ResultCode {
    fn from(result: &Result<T, CmdListError>) -> Self {
        match result {
            Ok(_) => ResultCode::Success,
            Err(err) => err.code(),
        }
    }
}

/// Shadow and temporary allocation failures surface as `OutOfResources`.
pub(crate) fn out_of_resources(requested: u64) -> impl FnOnce(DeviceError) -> CmdListError {
    move |err| match err {
        DeviceError::OutOfMemory { size } => CmdListError::OutOfResources { requested: size },
        DeviceError::UnknownAllocation(_) | DeviceError::BuiltinUnavailable(_) => {
            tracing::warn!(requested, %err, "allocation failed");
            CmdListError::OutOfResources { requested }
        }
    }
}
