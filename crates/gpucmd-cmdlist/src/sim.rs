//! In-memory device, kernel and queue.
//!
//! These back the test suites and host-side tooling that want to inspect
//! what a command list would submit without real hardware. Host-pointer
//! shadows map the host address 1:1 into the GPU address space.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gpucmd_hw::cmd::HwCmd;
use gpucmd_hw::{parse_cmd_stream, HwFamily, HwInfo};

use crate::builtin::Builtin;
use crate::device::{
    AllocationId, AllocationRef, AllocationType, Device, DeviceError, GraphicsAllocation,
    KernelRef, MemoryType,
};
use crate::image::Image;
use crate::kernel::{Kernel, KernelError};
use crate::queue::{CommandQueue, QueueError, Submission};

const SIM_ALLOCATION_ALIGNMENT: u64 = 0x1000;
const SIM_MAX_KERNEL_ARGS: u32 = 16;

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimDeviceConfig {
    pub family: HwFamily,
    /// First GPU virtual address handed out by the device allocator.
    pub device_va_base: u64,
    pub simd_size: u32,
    pub max_work_group_size: u32,
    /// Make every host-pointer shadow allocation fail.
    pub fail_host_ptr_allocations: bool,
}

impl Default for SimDeviceConfig {
    fn default() -> Self {
        Self::for_family(HwFamily::Gen12Lp)
    }
}

impl SimDeviceConfig {
    pub fn for_family(family: HwFamily) -> Self {
        Self {
            family,
            device_va_base: 0xFF00_0000_0000,
            simd_size: 32,
            max_work_group_size: HwInfo::for_family(family).max_work_group_size,
            fail_host_ptr_allocations: false,
        }
    }
}

#[derive(Debug, Default)]
struct SimDeviceState {
    next_id: AllocationId,
    next_va: u64,
    /// Registered allocations keyed by GPU base address.
    allocations: BTreeMap<u64, AllocationRef>,
    contents: HashMap<AllocationId, Vec<u8>>,
    host_ptr_live: HashMap<AllocationId, AllocationRef>,
    freed: Vec<AllocationId>,
}

impl SimDeviceState {
    fn next_id(&mut self) -> AllocationId {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug)]
pub struct SimDevice {
    config: SimDeviceConfig,
    fail_host_ptr: AtomicBool,
    state: Mutex<SimDeviceState>,
    builtins: Mutex<HashMap<Builtin, Arc<Mutex<SimKernel>>>>,
}

impl SimDevice {
    pub fn new(config: SimDeviceConfig) -> Self {
        Self {
            fail_host_ptr: AtomicBool::new(config.fail_host_ptr_allocations),
            state: Mutex::new(SimDeviceState {
                next_va: config.device_va_base,
                ..Default::default()
            }),
            builtins: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &SimDeviceConfig {
        &self.config
    }

    pub fn set_fail_host_ptr_allocations(&self, fail: bool) {
        self.fail_host_ptr.store(fail, Ordering::Relaxed);
    }

    /// Allocate and register `size` bytes of GPU-visible memory.
    pub fn allocate(
        &self,
        size: u64,
        memory_type: MemoryType,
        allocation_type: AllocationType,
    ) -> AllocationRef {
        let mut state = lock(&self.state);
        let id = state.next_id();
        let gpu_address = state.next_va;
        let span = size.max(1).div_ceil(SIM_ALLOCATION_ALIGNMENT) * SIM_ALLOCATION_ALIGNMENT;
        state.next_va += span;

        let alloc = Arc::new(GraphicsAllocation {
            id,
            gpu_address,
            size,
            memory_type,
            allocation_type,
        });
        state.allocations.insert(gpu_address, alloc.clone());
        alloc
    }

    /// Initial contents of an allocation made by `allocate_host_memory`.
    pub fn allocation_contents(&self, id: AllocationId) -> Option<Vec<u8>> {
        lock(&self.state).contents.get(&id).cloned()
    }

    pub fn freed_allocations(&self) -> Vec<AllocationId> {
        lock(&self.state).freed.clone()
    }

    pub fn live_host_ptr_allocations(&self) -> usize {
        lock(&self.state).host_ptr_live.len()
    }

    /// The device's instance of `builtin`, for inspecting bound arguments.
    pub fn sim_builtin(&self, builtin: Builtin) -> Arc<Mutex<SimKernel>> {
        lock(&self.builtins)
            .entry(builtin)
            .or_insert_with(|| {
                Arc::new(Mutex::new(SimKernel::new(
                    builtin as u32 + 1,
                    self.config.simd_size,
                    self.config.max_work_group_size,
                )))
            })
            .clone()
    }
}

impl Device for SimDevice {
    fn hw_family(&self) -> HwFamily {
        self.config.family
    }

    fn builtin_kernel(&self, builtin: Builtin) -> Result<KernelRef, DeviceError> {
        let kernel: KernelRef = self.sim_builtin(builtin);
        Ok(kernel)
    }

    fn allocate_from_host_ptr(&self, ptr: u64, size: u64) -> Result<AllocationRef, DeviceError> {
        if self.fail_host_ptr.load(Ordering::Relaxed) {
            return Err(DeviceError::OutOfMemory { size });
        }
        let mut state = lock(&self.state);
        let id = state.next_id();
        let alloc = Arc::new(GraphicsAllocation {
            id,
            gpu_address: ptr,
            size,
            memory_type: MemoryType::HostPtr,
            allocation_type: AllocationType::HostPtr,
        });
        state.host_ptr_live.insert(id, alloc.clone());
        Ok(alloc)
    }

    fn find_allocation_for_range(&self, ptr: u64, size: u64) -> Option<AllocationRef> {
        let state = lock(&self.state);
        let (_, alloc) = state.allocations.range(..=ptr).next_back()?;
        alloc.contains(ptr, size).then(|| alloc.clone())
    }

    fn allocate_host_memory(&self, data: &[u8]) -> Result<AllocationRef, DeviceError> {
        let alloc = self.allocate(data.len() as u64, MemoryType::Host, AllocationType::Temporary);
        lock(&self.state).contents.insert(alloc.id, data.to_vec());
        Ok(alloc)
    }

    fn free_allocation(&self, alloc: AllocationRef) {
        let mut state = lock(&self.state);
        if alloc.memory_type == MemoryType::HostPtr {
            state.host_ptr_live.remove(&alloc.id);
        } else if state
            .allocations
            .get(&alloc.gpu_address)
            .is_some_and(|a| a.id == alloc.id)
        {
            state.allocations.remove(&alloc.gpu_address);
        }
        state.contents.remove(&alloc.id);
        state.freed.push(alloc.id);
    }
}

/// Kernel that records its arguments.
///
/// Group size suggestions pick, per axis, the largest divisor of the extent
/// that keeps the group within the work-group limit.
#[derive(Debug, Clone)]
pub struct SimKernel {
    id: u32,
    simd_size: u32,
    max_work_group_size: u32,
    args: BTreeMap<u32, Vec<u8>>,
    buffers: BTreeMap<u32, AllocationRef>,
    group_size: [u32; 3],
    forced_group_size: Option<[u32; 3]>,
}

impl SimKernel {
    pub fn new(id: u32, simd_size: u32, max_work_group_size: u32) -> Self {
        Self {
            id,
            simd_size,
            max_work_group_size,
            args: BTreeMap::new(),
            buffers: BTreeMap::new(),
            group_size: [1, 1, 1],
            forced_group_size: None,
        }
    }

    /// Override what `suggest_group_size` returns.
    pub fn force_group_size(&mut self, size: Option<[u32; 3]>) {
        self.forced_group_size = size;
    }

    pub fn argument(&self, index: u32) -> Option<&[u8]> {
        self.args.get(&index).map(Vec::as_slice)
    }

    pub fn argument_u32(&self, index: u32) -> Option<u32> {
        let bytes = self.args.get(&index)?;
        Some(bytemuck::pod_read_unaligned(bytes.get(..4)?))
    }

    pub fn argument_u64(&self, index: u32) -> Option<u64> {
        let bytes = self.args.get(&index)?;
        Some(bytemuck::pod_read_unaligned(bytes.get(..8)?))
    }

    fn check_index(index: u32) -> Result<(), KernelError> {
        if index >= SIM_MAX_KERNEL_ARGS {
            return Err(KernelError::InvalidArgumentIndex(index));
        }
        Ok(())
    }
}

fn largest_divisor_at_most(n: u32, limit: u32) -> u32 {
    if n == 0 {
        return 1;
    }
    (1..=limit.min(n)).rev().find(|d| n % d == 0).unwrap_or(1)
}

impl Kernel for SimKernel {
    fn kernel_id(&self) -> u32 {
        self.id
    }

    fn simd_size(&self) -> u32 {
        self.simd_size
    }

    fn set_argument_value(&mut self, index: u32, bytes: &[u8]) -> Result<(), KernelError> {
        Self::check_index(index)?;
        self.buffers.remove(&index);
        self.args.insert(index, bytes.to_vec());
        Ok(())
    }

    fn set_arg_buffer_with_alloc(
        &mut self,
        index: u32,
        address: u64,
        alloc: &AllocationRef,
    ) -> Result<(), KernelError> {
        Self::check_index(index)?;
        self.args.insert(index, address.to_le_bytes().to_vec());
        self.buffers.insert(index, alloc.clone());
        Ok(())
    }

    fn set_arg_image(&mut self, index: u32, image: &Image) -> Result<(), KernelError> {
        self.set_arg_buffer_with_alloc(index, image.gpu_address(), image.allocation())
    }

    fn suggest_group_size(&self, extent: [u32; 3]) -> Result<[u32; 3], KernelError> {
        if let Some(forced) = self.forced_group_size {
            return Ok(forced);
        }
        let x = largest_divisor_at_most(extent[0], self.max_work_group_size);
        let y = largest_divisor_at_most(extent[1], self.max_work_group_size / x);
        let z = largest_divisor_at_most(extent[2], self.max_work_group_size / (x * y));
        Ok([x, y, z])
    }

    fn set_group_size(&mut self, size: [u32; 3]) -> Result<(), KernelError> {
        let total = size.iter().try_fold(1u32, |acc, v| acc.checked_mul(*v));
        match total {
            Some(total) if total > 0 && total <= self.max_work_group_size => {
                self.group_size = size;
                Ok(())
            }
            _ => Err(KernelError::InvalidGroupSize { size }),
        }
    }

    fn group_size(&self) -> [u32; 3] {
        self.group_size
    }

    fn cross_thread_data(&self) -> Vec<u8> {
        let mut data = Vec::new();
        for bytes in self.args.values() {
            data.extend_from_slice(bytes);
            data.resize(data.len().next_multiple_of(4), 0);
        }
        data
    }

    fn residency(&self) -> Vec<AllocationRef> {
        self.buffers.values().cloned().collect()
    }
}

/// A submission as seen by [`SimQueue`].
#[derive(Debug, Clone)]
pub struct SimSubmission {
    pub commands: Vec<HwCmd>,
    pub residency: Vec<AllocationId>,
    pub copy_only: bool,
}

#[derive(Debug, Default)]
struct SimQueueState {
    submissions: Vec<SimSubmission>,
    pending: usize,
    completed: usize,
    fail_next: Option<QueueError>,
}

/// Queue that decodes every submission and completes it on synchronize.
///
/// Clones share state, so a test can keep one handle while the command
/// list owns another.
#[derive(Debug, Clone, Default)]
pub struct SimQueue {
    state: Arc<Mutex<SimQueueState>>,
}

impl SimQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submissions(&self) -> Vec<SimSubmission> {
        lock(&self.state).submissions.clone()
    }

    pub fn completed(&self) -> usize {
        lock(&self.state).completed
    }

    /// Make the next `execute` fail with `err`.
    pub fn fail_next(&self, err: QueueError) {
        lock(&self.state).fail_next = Some(err);
    }
}

impl CommandQueue for SimQueue {
    fn execute(&mut self, submission: Submission) -> Result<(), QueueError> {
        let mut state = lock(&self.state);
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }

        let commands = parse_cmd_stream(&submission.commands)
            .map_err(|err| QueueError::Rejected(err.to_string()))?;
        if commands.last() != Some(&HwCmd::BatchBufferEnd) {
            return Err(QueueError::Rejected(
                "batch buffer is not terminated".to_string(),
            ));
        }
        tracing::debug!(
            commands = commands.len(),
            residency = submission.residency.len(),
            "sim queue execute"
        );

        state.submissions.push(SimSubmission {
            commands,
            residency: submission.residency.iter().map(|a| a.id).collect(),
            copy_only: submission.copy_only,
        });
        state.pending += 1;
        Ok(())
    }

    fn synchronize(&mut self, _timeout: Option<Duration>) -> Result<(), QueueError> {
        let mut state = lock(&self.state);
        state.completed += state.pending;
        state.pending = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_lookup_finds_containing_allocation() {
        let device = SimDevice::new(SimDeviceConfig::default());
        let a = device.allocate(0x100, MemoryType::Device, AllocationType::Buffer);
        let b = device.allocate(0x2000, MemoryType::Shared, AllocationType::Buffer);

        assert_eq!(device.find_allocation_for_range(a.gpu_address + 0x10, 0x10).unwrap().id, a.id);
        assert_eq!(device.find_allocation_for_range(b.gpu_address + 0x1FFF, 1).unwrap().id, b.id);
        assert!(device.find_allocation_for_range(a.gpu_address + 0xF0, 0x20).is_none());
        assert!(device.find_allocation_for_range(0x1000, 4).is_none());
    }

    #[test]
    fn host_ptr_shadows_are_identity_mapped_and_unregistered() {
        let device = SimDevice::new(SimDeviceConfig::default());
        let shadow = device.allocate_from_host_ptr(0x7000_1234, 64).unwrap();
        assert_eq!(shadow.gpu_address, 0x7000_1234);
        assert!(device.find_allocation_for_range(0x7000_1234, 1).is_none());
        assert_eq!(device.live_host_ptr_allocations(), 1);

        device.free_allocation(shadow.clone());
        assert_eq!(device.live_host_ptr_allocations(), 0);
        assert_eq!(device.freed_allocations(), vec![shadow.id]);
    }

    #[test]
    fn suggested_group_divides_extent() {
        let kernel = SimKernel::new(1, 32, 256);
        assert_eq!(kernel.suggest_group_size([1024, 1, 1]).unwrap(), [256, 1, 1]);
        assert_eq!(kernel.suggest_group_size([24, 20, 1]).unwrap(), [24, 10, 1]);
        assert_eq!(kernel.suggest_group_size([7, 3, 2]).unwrap(), [7, 3, 2]);
    }

    #[test]
    fn group_size_limit() {
        let mut kernel = SimKernel::new(1, 32, 256);
        assert!(kernel.set_group_size([256, 1, 1]).is_ok());
        assert_eq!(
            kernel.set_group_size([16, 32, 1]),
            Err(KernelError::InvalidGroupSize { size: [16, 32, 1] })
        );
        assert!(kernel.set_group_size([0, 1, 1]).is_err());
    }
}
