use core::fmt;

use thiserror::Error;

use crate::device::AllocationRef;
use crate::image::Image;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("argument index {0} out of range")]
    InvalidArgumentIndex(u32),

    #[error("group size {size:?} rejected")]
    InvalidGroupSize { size: [u32; 3] },

    #[error("no group size fits extent {extent:?}")]
    NoGroupSize { extent: [u32; 3] },
}

/// Compiled compute kernel with mutable argument state.
pub trait Kernel: fmt::Debug {
    fn kernel_id(&self) -> u32;

    fn simd_size(&self) -> u32;

    fn set_argument_value(&mut self, index: u32, bytes: &[u8]) -> Result<(), KernelError>;

    fn set_arg_buffer_with_alloc(
        &mut self,
        index: u32,
        address: u64,
        alloc: &AllocationRef,
    ) -> Result<(), KernelError>;

    fn set_arg_image(&mut self, index: u32, image: &Image) -> Result<(), KernelError>;

    fn suggest_group_size(&self, extent: [u32; 3]) -> Result<[u32; 3], KernelError>;

    fn set_group_size(&mut self, size: [u32; 3]) -> Result<(), KernelError>;

    fn group_size(&self) -> [u32; 3];

    /// Argument payload carried inline in the walker.
    fn cross_thread_data(&self) -> Vec<u8>;

    /// Allocations bound as arguments.
    fn residency(&self) -> Vec<AllocationRef>;
}

pub(crate) fn set_arg<K, T>(kernel: &mut K, index: u32, value: T) -> Result<(), KernelError>
where
    K: Kernel + ?Sized,
    T: bytemuck::Pod,
{
    kernel.set_argument_value(index, bytemuck::bytes_of(&value))
}
