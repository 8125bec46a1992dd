//! Device-side collaborators consumed by command lists.

use std::sync::{Arc, Mutex};

use gpucmd_hw::cmd::BaseAddresses;
use gpucmd_hw::HwFamily;
use thiserror::Error;

use crate::builtin::Builtin;
use crate::kernel::Kernel;

pub type AllocationId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryType {
    Device,
    Host,
    Shared,
    /// Unmanaged host memory wrapped by a shadow allocation.
    HostPtr,
}

impl MemoryType {
    /// Host-visible unified memory needs a cache flush before the GPU reads
    /// what the CPU wrote.
    pub fn is_host_unified(self) -> bool {
        matches!(self, MemoryType::Host | MemoryType::Shared)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocationType {
    Buffer,
    Image,
    Event,
    /// Short-lived allocation owned by a command list (fill patterns, staging).
    Temporary,
    HostPtr,
}

#[derive(Debug, PartialEq, Eq)]
pub struct GraphicsAllocation {
    pub id: AllocationId,
    pub gpu_address: u64,
    pub size: u64,
    pub memory_type: MemoryType,
    pub allocation_type: AllocationType,
}

impl GraphicsAllocation {
    pub fn end(&self) -> u64 {
        self.gpu_address.saturating_add(self.size)
    }

    /// Whether `[ptr, ptr + size)` lies inside this allocation.
    pub fn contains(&self, ptr: u64, size: u64) -> bool {
        ptr >= self.gpu_address
            && ptr
                .checked_add(size)
                .is_some_and(|end| end <= self.end())
    }
}

pub type AllocationRef = Arc<GraphicsAllocation>;

/// Builtin kernels are device-owned and shared; callers lock for the whole
/// bind-and-launch sequence.
pub type KernelRef = Arc<Mutex<dyn Kernel + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("out of memory allocating {size} bytes")]
    OutOfMemory { size: u64 },

    #[error("unknown allocation {0}")]
    UnknownAllocation(AllocationId),

    #[error("builtin kernel {0:?} is not available")]
    BuiltinUnavailable(Builtin),
}

pub trait Device: Send + Sync {
    fn hw_family(&self) -> HwFamily;

    /// Heap bases programmed by `StateBaseAddress`.
    fn heap_base_addresses(&self) -> BaseAddresses {
        BaseAddresses::default()
    }

    fn builtin_kernel(&self, builtin: Builtin) -> Result<KernelRef, DeviceError>;

    /// Wrap unmanaged host memory in a GPU-visible allocation.
    fn allocate_from_host_ptr(&self, ptr: u64, size: u64) -> Result<AllocationRef, DeviceError>;

    fn find_allocation_for_range(&self, ptr: u64, size: u64) -> Option<AllocationRef>;

    fn allocation_for_ptr(&self, ptr: u64) -> Option<AllocationRef> {
        self.find_allocation_for_range(ptr, 1)
    }

    /// Temporary host-visible allocation initialized with `data`.
    fn allocate_host_memory(&self, data: &[u8]) -> Result<AllocationRef, DeviceError>;

    fn free_allocation(&self, alloc: AllocationRef);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_checks_both_ends() {
        let alloc = GraphicsAllocation {
            id: 1,
            gpu_address: 0x1000,
            size: 0x100,
            memory_type: MemoryType::Device,
            allocation_type: AllocationType::Buffer,
        };
        assert!(alloc.contains(0x1000, 0x100));
        assert!(alloc.contains(0x10FF, 1));
        assert!(!alloc.contains(0x10FF, 2));
        assert!(!alloc.contains(0xFFF, 1));
        assert!(!alloc.contains(u64::MAX, 2));
    }
}
