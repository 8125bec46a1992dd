use std::collections::{BTreeMap, HashSet};

use gpucmd_hw::CommandStream;

use crate::device::AllocationRef;

/// Stream position and residency length an append can roll back to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Checkpoint {
    stream_len: usize,
    residency_len: usize,
}

/// Command stream plus the allocation bookkeeping that travels with it.
#[derive(Debug)]
pub struct CommandContainer {
    stream: CommandStream,
    residency: Vec<AllocationRef>,
    deallocations: Vec<AllocationRef>,
    host_ptr_map: BTreeMap<u64, AllocationRef>,
}

impl CommandContainer {
    pub fn new(command_buffer_size: usize) -> Self {
        Self {
            stream: CommandStream::with_capacity(command_buffer_size),
            residency: Vec::new(),
            deallocations: Vec::new(),
            host_ptr_map: BTreeMap::new(),
        }
    }

    pub fn stream(&self) -> &CommandStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut CommandStream {
        &mut self.stream
    }

    pub fn residency(&self) -> &[AllocationRef] {
        &self.residency
    }

    pub fn add_to_residency(&mut self, alloc: &AllocationRef) {
        self.residency.push(alloc.clone());
    }

    pub fn add_all_to_residency(&mut self, allocs: impl IntoIterator<Item = AllocationRef>) {
        self.residency.extend(allocs);
    }

    /// Drop repeated allocations, keeping first-reference order.
    pub fn dedup_residency(&mut self) {
        let mut seen = HashSet::new();
        self.residency.retain(|alloc| seen.insert(alloc.id));
    }

    pub fn deallocations(&self) -> &[AllocationRef] {
        &self.deallocations
    }

    pub fn queue_deallocation(&mut self, alloc: AllocationRef) {
        self.deallocations.push(alloc);
    }

    pub fn host_ptr_allocation(&self, ptr: u64) -> Option<&AllocationRef> {
        self.host_ptr_map.get(&ptr)
    }

    /// Record a shadow allocation for `ptr`. A smaller shadow it replaces may
    /// still be referenced by encoded commands, so it is queued for release.
    pub fn insert_host_ptr_allocation(&mut self, ptr: u64, alloc: AllocationRef) {
        if let Some(old) = self.host_ptr_map.insert(ptr, alloc) {
            self.deallocations.push(old);
        }
    }

    pub fn host_ptr_allocations(&self) -> impl Iterator<Item = (u64, &AllocationRef)> {
        self.host_ptr_map.iter().map(|(ptr, alloc)| (*ptr, alloc))
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            stream_len: self.stream.used(),
            residency_len: self.residency.len(),
        }
    }

    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) {
        self.stream.truncate(checkpoint.stream_len);
        self.residency.truncate(checkpoint.residency_len);
    }

    /// Clear commands and residency, handing back every allocation the
    /// container owned so the caller can free it.
    pub(crate) fn reset(&mut self) -> Vec<AllocationRef> {
        self.stream.clear();
        self.residency.clear();
        let mut owned = std::mem::take(&mut self.deallocations);
        owned.extend(std::mem::take(&mut self.host_ptr_map).into_values());
        owned
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device::{AllocationType, GraphicsAllocation, MemoryType};

    fn alloc(id: u64) -> AllocationRef {
        Arc::new(GraphicsAllocation {
            id,
            gpu_address: id * 0x1000,
            size: 0x1000,
            memory_type: MemoryType::Device,
            allocation_type: AllocationType::Buffer,
        })
    }

    #[test]
    fn dedup_keeps_first_order() {
        let mut container = CommandContainer::new(1024);
        for id in [3, 1, 3, 2, 1] {
            container.add_to_residency(&alloc(id));
        }
        container.dedup_residency();
        let ids: Vec<_> = container.residency().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn replaced_shadow_is_released_on_reset() {
        let mut container = CommandContainer::new(1024);
        container.insert_host_ptr_allocation(0x5000, alloc(1));
        container.insert_host_ptr_allocation(0x5000, alloc(2));
        assert_eq!(container.deallocations().len(), 1);

        let mut freed: Vec<_> = container.reset().iter().map(|a| a.id).collect();
        freed.sort_unstable();
        assert_eq!(freed, vec![1, 2]);
        assert!(container.deallocations().is_empty());
        assert_eq!(container.host_ptr_allocations().count(), 0);
    }
}
