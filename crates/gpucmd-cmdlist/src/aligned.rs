//! Resolve user pointers to GPU-visible, surface-aligned allocations.

use gpucmd_hw::HwCommandEncoder;

use crate::container::CommandContainer;
use crate::device::{AllocationRef, Device};
use crate::error::{out_of_resources, CmdListError};

#[derive(Clone, Debug)]
pub struct AlignedAllocation {
    pub aligned_base: u64,
    /// Bytes from `aligned_base` to the resolved pointer.
    pub offset: u64,
    pub allocation: AllocationRef,
    pub needs_flush: bool,
}

impl AlignedAllocation {
    pub fn address(&self) -> u64 {
        self.aligned_base + self.offset
    }
}

/// Resolve a range inside a registered allocation. No shadow is created for
/// unknown pointers.
pub fn resolve_known(
    device: &dyn Device,
    encoder: &dyn HwCommandEncoder,
    ptr: u64,
    size: u64,
) -> Result<AlignedAllocation, CmdListError> {
    let allocation = device
        .find_allocation_for_range(ptr, size)
        .ok_or(CmdListError::InvalidArgument(
            "destination is not a known allocation",
        ))?;
    let (aligned_base, offset) = encoder.ssh_aligned_pointer(ptr);
    let needs_flush = allocation.memory_type.is_host_unified();
    Ok(AlignedAllocation {
        aligned_base,
        offset,
        allocation,
        needs_flush,
    })
}

/// Find or create an allocation covering `[ptr, ptr + size)`.
///
/// Unregistered host pointers get a shadow allocation that lives in the
/// container's host-pointer map until the next reset.
pub fn resolve(
    device: &dyn Device,
    encoder: &dyn HwCommandEncoder,
    container: &mut CommandContainer,
    ptr: u64,
    size: u64,
) -> Result<AlignedAllocation, CmdListError> {
    if let Ok(known) = resolve_known(device, encoder, ptr, size) {
        return Ok(known);
    }

    let reusable = container
        .host_ptr_allocation(ptr)
        .filter(|existing| existing.size >= size)
        .cloned();
    let shadow = match reusable {
        Some(existing) => existing,
        None => {
            let shadow = device
                .allocate_from_host_ptr(ptr, size)
                .map_err(out_of_resources(size))?;
            tracing::debug!(
                ptr,
                size,
                id = shadow.id,
                "host pointer shadow allocation"
            );
            container.insert_host_ptr_allocation(ptr, shadow.clone());
            shadow
        }
    };

    let (aligned_base, offset) = encoder.ssh_aligned_pointer(shadow.gpu_address);
    Ok(AlignedAllocation {
        aligned_base,
        offset,
        allocation: shadow,
        needs_flush: true,
    })
}
