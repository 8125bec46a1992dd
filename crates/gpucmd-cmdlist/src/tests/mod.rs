use std::sync::Arc;

use gpucmd_hw::cmd::{HwCmd, PostSync};
use gpucmd_hw::{parse_cmd_stream, HwFamily};
use pretty_assertions::assert_eq;

use crate::sim::{SimDevice, SimDeviceConfig, SimKernel, SimQueue};
use crate::{
    AllocationRef, AllocationType, CmdListError, CommandList, CommandListDesc, CommandListState,
    EventArgs, EventDesc, EventPool, EventScope, GroupCount, MemoryType, ResultCode,
};

const HOST_PTR: u64 = 0x7F12_3456_0000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct Fixture {
    device: Arc<SimDevice>,
    queue: SimQueue,
}

impl Fixture {
    fn new(family: HwFamily) -> Self {
        init_tracing();
        Self {
            device: Arc::new(SimDevice::new(SimDeviceConfig::for_family(family))),
            queue: SimQueue::new(),
        }
    }

    fn list(&self, desc: CommandListDesc) -> CommandList {
        CommandList::create(self.device.clone(), Some(Box::new(self.queue.clone())), desc)
            .unwrap()
    }

    fn buffer(&self, size: u64) -> AllocationRef {
        self.device
            .allocate(size, MemoryType::Device, AllocationType::Buffer)
    }

    fn event_pool(&self, count: u32) -> EventPool {
        let alloc = self
            .device
            .allocate(64 * u64::from(count), MemoryType::Host, AllocationType::Event);
        EventPool::new(alloc, count).unwrap()
    }
}

fn decode(list: &CommandList) -> Vec<HwCmd> {
    parse_cmd_stream(list.command_stream().as_bytes()).unwrap()
}

/// GPU addresses the decoded commands read or write directly.
fn referenced_addresses(cmds: &[HwCmd]) -> Vec<u64> {
    let mut out = Vec::new();
    for cmd in cmds {
        match cmd {
            HwCmd::PipeControl {
                post_sync: PostSync::WriteImmediate { address, .. },
                ..
            }
            | HwCmd::MiFlushDw {
                post_sync: PostSync::WriteImmediate { address, .. },
            }
            | HwCmd::SemaphoreWait { address, .. }
            | HwCmd::StoreRegisterMem { address, .. }
            | HwCmd::LoadRegisterMem { address, .. }
            | HwCmd::PredicateGreaterThan { address, .. } => out.push(*address),
            HwCmd::XyCopyBlt(blt) => {
                out.push(blt.dst_address);
                out.push(blt.src_address);
            }
            HwCmd::XyColorBlt(blt) => out.push(blt.dst_address),
            _ => {}
        }
    }
    out
}

fn assert_all_resident(list: &CommandList) {
    let cmds = decode(list);
    for address in referenced_addresses(&cmds) {
        assert!(
            list.residency().iter().any(|a| a.contains(address, 1)),
            "address {address:#x} is not covered by the residency set"
        );
    }
}

#[test]
fn failed_append_leaves_stream_and_residency_untouched() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let dst = fx.buffer(0x1000);
    let pool = fx.event_pool(1);
    let wait = pool.event(0, EventDesc::default()).unwrap();

    list.append_memory_copy(dst.gpu_address, dst.gpu_address + 0x800, 0x100, EventArgs::none())
        .unwrap();
    let before_bytes = list.command_stream().as_bytes().to_vec();
    let before_residency: Vec<_> = list.residency().iter().map(|a| a.id).collect();

    fx.device.set_fail_host_ptr_allocations(true);
    let waits = [&wait];
    let result = list.append_memory_copy(
        dst.gpu_address,
        HOST_PTR,
        0x100,
        EventArgs::wait(&waits),
    );
    assert_eq!(ResultCode::from(&result), ResultCode::OutOfResources);

    assert_eq!(list.command_stream().as_bytes(), before_bytes.as_slice());
    let after_residency: Vec<_> = list.residency().iter().map(|a| a.id).collect();
    assert_eq!(after_residency, before_residency);
    assert_eq!(fx.device.live_host_ptr_allocations(), 0);
}

#[test]
fn every_referenced_address_is_resident() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let buf = fx.buffer(0x4000);
    let args = fx.buffer(0x100);
    let pool = fx.event_pool(3);
    let signal = pool
        .event(
            0,
            EventDesc {
                signal_scope: EventScope::HOST,
                ..Default::default()
            },
        )
        .unwrap();
    let timestamp = pool
        .event(
            1,
            EventDesc {
                timestamp: true,
                ..Default::default()
            },
        )
        .unwrap();
    let wait = pool.event(2, EventDesc::default()).unwrap();
    let waits = [&wait];

    list.append_memory_copy(
        buf.gpu_address + 3,
        HOST_PTR,
        5000,
        EventArgs::wait(&waits).with_signal(&signal),
    )
    .unwrap();
    list.append_memory_fill(buf.gpu_address, &[1, 2, 3, 4], 1000, EventArgs::signal(&timestamp))
        .unwrap();
    let kernel = SimKernel::new(99, 16, 256);
    list.append_launch_kernel_indirect(&kernel, args.gpu_address, EventArgs::none())
        .unwrap();
    list.append_event_reset(&signal).unwrap();
    list.close().unwrap();

    assert_all_resident(&list);
}

#[test]
fn copy_only_blits_are_resident() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::copy_only());
    let buf = fx.buffer(0x4000);
    let pool = fx.event_pool(1);
    let signal = pool.event(0, EventDesc::default()).unwrap();

    list.append_memory_copy(buf.gpu_address + 7, HOST_PTR + 1, 300, EventArgs::signal(&signal))
        .unwrap();
    list.append_memory_fill(buf.gpu_address, &[0xAB; 4], 256, EventArgs::none())
        .unwrap();
    list.close().unwrap();

    assert_all_resident(&list);
}

#[test]
fn host_pointer_shadow_is_reused_until_reset() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let dst = fx.buffer(0x2000);

    list.append_memory_copy(dst.gpu_address, HOST_PTR, 0x400, EventArgs::none())
        .unwrap();
    list.append_memory_copy(dst.gpu_address + 0x400, HOST_PTR, 0x200, EventArgs::none())
        .unwrap();
    assert_eq!(list.host_ptr_allocations().count(), 1);
    assert_eq!(fx.device.live_host_ptr_allocations(), 1);

    // A larger range at the same pointer needs a new shadow; the old one is
    // released with the list.
    list.append_memory_copy(dst.gpu_address, HOST_PTR, 0x800, EventArgs::none())
        .unwrap();
    let shadows: Vec<_> = list.host_ptr_allocations().map(|(_, a)| a.size).collect();
    assert_eq!(shadows, vec![0x800]);
    assert_eq!(list.deallocations().len(), 1);

    list.reset().unwrap();
    assert_eq!(list.host_ptr_allocations().count(), 0);
    assert_eq!(fx.device.live_host_ptr_allocations(), 0);
    assert_eq!(fx.device.freed_allocations().len(), 2);
}

#[test]
fn host_pointer_copy_flushes_destination() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let src = fx.buffer(0x1000);

    list.append_memory_copy(HOST_PTR, src.gpu_address, 128, EventArgs::none())
        .unwrap();
    let cmds = decode(&list);
    assert!(cmds.last().unwrap().is_dc_flush());

    let mut list = fx.list(CommandListDesc::default());
    let dst = fx.buffer(0x1000);
    list.append_memory_copy(dst.gpu_address, src.gpu_address, 128, EventArgs::none())
        .unwrap();
    assert!(!decode(&list).iter().any(HwCmd::is_dc_flush));
}

#[test]
fn kernel_launch_on_copy_only_list_is_unsupported() {
    let fx = Fixture::new(HwFamily::Gen9);
    let mut list = fx.list(CommandListDesc::copy_only());
    let kernel = SimKernel::new(1, 8, 256);

    let result = list.append_launch_kernel(&kernel, GroupCount::new(1, 1, 1), EventArgs::none());
    assert_eq!(ResultCode::from(&result), ResultCode::UnsupportedFeature);
    assert!(list.command_stream().is_empty());
}

#[test]
fn immediate_list_submits_each_append() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::immediate());
    let buf = fx.buffer(0x1000);

    list.append_memory_fill(buf.gpu_address, &[0x5A], 64, EventArgs::none())
        .unwrap();
    list.append_barrier(EventArgs::none()).unwrap();

    let submissions = fx.queue.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(fx.queue.completed(), 2);
    for submission in &submissions {
        assert!(matches!(
            submission.commands.first(),
            Some(HwCmd::StateBaseAddress(_))
        ));
        assert_eq!(submission.commands.last(), Some(&HwCmd::BatchBufferEnd));
    }
    assert!(submissions[0].residency.contains(&buf.id));
    assert_eq!(list.state(), CommandListState::Recording);
}

#[test]
fn immediate_list_resets_after_failed_submission() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::immediate());

    fx.queue.fail_next(crate::QueueError::DeviceLost);
    let result = list.append_barrier(EventArgs::none());
    assert!(matches!(result, Err(CmdListError::Queue(_))));
    assert_eq!(list.state(), CommandListState::Recording);
    assert!(matches!(decode(&list).as_slice(), [HwCmd::StateBaseAddress(_)]));
}

#[test]
fn immediate_list_requires_a_queue() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let result = CommandList::create(fx.device.clone(), None, CommandListDesc::immediate());
    assert_eq!(ResultCode::from(&result), ResultCode::InvalidArgument);
}
