#![allow(dead_code)]

use std::sync::Arc;

use gpucmd_cmdlist::sim::{SimDevice, SimDeviceConfig, SimQueue};
use gpucmd_cmdlist::{
    AllocationRef, AllocationType, CommandList, CommandListDesc, EventPool, MemoryType,
};
use gpucmd_hw::cmd::{HwCmd, WalkerArgs};
use gpucmd_hw::{parse_cmd_stream, HwFamily};

pub const HOST_PTR: u64 = 0x7F00_0000_1000;

pub struct Fixture {
    pub device: Arc<SimDevice>,
    pub queue: SimQueue,
}

impl Fixture {
    pub fn new(family: HwFamily) -> Self {
        Self::with_config(SimDeviceConfig::for_family(family))
    }

    pub fn with_config(config: SimDeviceConfig) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        Self {
            device: Arc::new(SimDevice::new(config)),
            queue: SimQueue::new(),
        }
    }

    pub fn list(&self, desc: CommandListDesc) -> CommandList {
        CommandList::create(self.device.clone(), Some(Box::new(self.queue.clone())), desc)
            .expect("create command list")
    }

    pub fn buffer(&self, size: u64) -> AllocationRef {
        self.device
            .allocate(size, MemoryType::Device, AllocationType::Buffer)
    }

    pub fn events(&self, count: u32) -> EventPool {
        let alloc = self
            .device
            .allocate(64 * u64::from(count), MemoryType::Host, AllocationType::Event);
        EventPool::new(alloc, count).expect("event pool")
    }
}

pub fn decode(list: &CommandList) -> Vec<HwCmd> {
    parse_cmd_stream(list.command_stream().as_bytes()).expect("decode command stream")
}

pub fn walkers(cmds: &[HwCmd]) -> Vec<&WalkerArgs> {
    cmds.iter().filter_map(HwCmd::as_walker).collect()
}

/// Little-endian `u32` at `offset` in a walker's cross-thread payload.
pub fn payload_u32(walker: &WalkerArgs, offset: usize) -> u32 {
    bytemuck::pod_read_unaligned(&walker.payload[offset..offset + 4])
}

pub fn payload_u64(walker: &WalkerArgs, offset: usize) -> u64 {
    bytemuck::pod_read_unaligned(&walker.payload[offset..offset + 8])
}
