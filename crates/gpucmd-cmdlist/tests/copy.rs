mod common;

use common::{decode, payload_u32, payload_u64, walkers, Fixture, HOST_PTR};
use gpucmd_cmdlist::{Builtin, CommandListDesc, CopyRegion, EventArgs, ResultCode};
use gpucmd_hw::cmd::HwCmd;
use gpucmd_hw::HwFamily;
use pretty_assertions::assert_eq;

const SIDE_KERNEL: u32 = Builtin::CopyBufferToBufferSide as u32 + 1;
const MIDDLE_KERNEL: u32 = Builtin::CopyBufferToBufferMiddle as u32 + 1;

#[test]
fn unaligned_source_folds_middle_into_left() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let dst = fx.buffer(0x2000);
    let src = fx.buffer(0x2000);

    // dst + 61 reaches a cache line, but src + 61 is not dword aligned.
    list.append_memory_copy(dst.gpu_address + 3, src.gpu_address, 5000, EventArgs::none())
        .unwrap();

    let cmds = decode(&list);
    let launches = walkers(&cmds);
    let shape: Vec<_> = launches
        .iter()
        .map(|w| (w.kernel_id, payload_u32(w, 16), payload_u32(w, 20), payload_u32(w, 24)))
        .collect();
    assert_eq!(
        shape,
        vec![(SIDE_KERNEL, 3, 0, 4989), (SIDE_KERNEL, 3 + 4989, 4989, 11)]
    );
    assert_eq!(launches[0].group_count, [156, 1, 1]);
    assert_eq!(launches[1].group_count, [1, 1, 1]);
    for w in &launches {
        assert_eq!(payload_u64(w, 0), dst.gpu_address);
        assert_eq!(payload_u64(w, 8), src.gpu_address);
    }
}

#[test]
fn cache_line_middle_uses_wide_kernel() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let dst = fx.buffer(0x2000);
    let src = fx.buffer(0x2000);

    list.append_memory_copy(dst.gpu_address + 3, src.gpu_address + 3, 5000, EventArgs::none())
        .unwrap();

    let cmds = decode(&list);
    let launches = walkers(&cmds);
    let shape: Vec<_> = launches
        .iter()
        .map(|w| (w.kernel_id, payload_u32(w, 24)))
        .collect();
    // 61 + 4928 + 11 bytes; the middle kernel moves 16 bytes per lane.
    assert_eq!(
        shape,
        vec![(SIDE_KERNEL, 61), (MIDDLE_KERNEL, 4928 / 16), (SIDE_KERNEL, 11)]
    );
    assert_eq!(launches[1].group_count, [10, 1, 1]);
    let residency: Vec<_> = list.residency().iter().map(|a| a.id).collect();
    assert!(residency.contains(&dst.id) && residency.contains(&src.id));
}

#[test]
fn aligned_copy_is_a_single_wide_launch() {
    let fx = Fixture::new(HwFamily::Gen9);
    let mut list = fx.list(CommandListDesc::default());
    let dst = fx.buffer(0x1000);
    let src = fx.buffer(0x1000);

    list.append_memory_copy(dst.gpu_address, src.gpu_address, 0x1000, EventArgs::none())
        .unwrap();

    let cmds = decode(&list);
    let ids: Vec<_> = walkers(&cmds).iter().map(|w| w.kernel_id).collect();
    assert_eq!(ids, vec![MIDDLE_KERNEL]);
}

#[test]
fn zero_sized_copy_encodes_nothing() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let before = list.command_stream().used();

    list.append_memory_copy(HOST_PTR, HOST_PTR + 0x100, 0, EventArgs::none())
        .unwrap();
    assert_eq!(list.command_stream().used(), before);
    assert_eq!(list.host_ptr_allocations().count(), 0);
}

#[test]
fn copy_only_copy_blits_each_segment() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::copy_only());
    let dst = fx.buffer(0x2000);
    let src = fx.buffer(0x2000);

    list.append_memory_copy(dst.gpu_address + 3, src.gpu_address + 3, 5000, EventArgs::none())
        .unwrap();

    let cmds = decode(&list);
    assert!(walkers(&cmds).is_empty());
    let blits: Vec<_> = cmds
        .iter()
        .filter_map(|cmd| match cmd {
            HwCmd::XyCopyBlt(blt) => Some(blt),
            _ => None,
        })
        .collect();
    let copied: u64 = blits
        .iter()
        .map(|b| u64::from(b.width) * u64::from(b.height))
        .sum();
    assert_eq!(copied, 5000);
    assert_eq!(blits[0].dst_address, dst.gpu_address + 3);
    assert_eq!(blits[0].src_address, src.gpu_address + 3);
    assert!(!cmds.iter().any(HwCmd::is_dc_flush));
}

#[test]
fn region_copy_binds_origins_and_pitches() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let dst = fx.buffer(0x4000);
    let src = fx.buffer(0x4000);
    let region = CopyRegion {
        origin_x: 4,
        origin_y: 2,
        origin_z: 0,
        width: 64,
        height: 8,
        depth: 1,
    };

    list.append_memory_copy_region(
        dst.gpu_address,
        &region,
        256,
        0,
        src.gpu_address,
        &region,
        128,
        0,
        EventArgs::none(),
    )
    .unwrap();

    let cmds = decode(&list);
    let launches = walkers(&cmds);
    assert_eq!(launches.len(), 1);
    let w = launches[0];
    assert_eq!(w.kernel_id, Builtin::CopyBufferRectBytes2d as u32 + 1);
    let product: u32 = w
        .group_count
        .iter()
        .zip(w.group_size.iter())
        .map(|(c, s)| c * s)
        .product();
    assert_eq!(product, 64 * 8);

    let kernel = fx.device.sim_builtin(Builtin::CopyBufferRectBytes2d);
    let kernel = kernel.lock().unwrap();
    assert_eq!(kernel.argument(2), Some(bytemuck::bytes_of(&[4u32, 2])));
    assert_eq!(kernel.argument(3), Some(bytemuck::bytes_of(&[4u32, 2])));
    assert_eq!(kernel.argument_u32(4), Some(128));
    assert_eq!(kernel.argument_u32(5), Some(256));
}

#[test]
fn region_copy_with_mismatched_extents_is_rejected() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let buf = fx.buffer(0x4000);
    let a = CopyRegion {
        width: 16,
        height: 4,
        depth: 1,
        ..Default::default()
    };
    let b = CopyRegion { height: 5, ..a };
    let before = list.command_stream().used();

    let result = list.append_memory_copy_region(
        buf.gpu_address,
        &a,
        64,
        0,
        buf.gpu_address + 0x2000,
        &b,
        64,
        0,
        EventArgs::none(),
    );
    assert_eq!(ResultCode::from(&result), ResultCode::InvalidArgument);
    assert_eq!(list.command_stream().used(), before);
}

#[test]
fn region_copy_with_overflowing_extent_is_rejected() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let buf = fx.buffer(0x4000);
    let region = CopyRegion {
        origin_y: u32::MAX,
        origin_z: u32::MAX,
        width: 16,
        height: 4,
        depth: 2,
        ..Default::default()
    };
    let before = list.command_stream().used();

    let result = list.append_memory_copy_region(
        buf.gpu_address,
        &region,
        u32::MAX,
        u32::MAX,
        buf.gpu_address + 0x2000,
        &region,
        u32::MAX,
        u32::MAX,
        EventArgs::none(),
    );
    assert_eq!(ResultCode::from(&result), ResultCode::InvalidArgument);
    assert_eq!(list.command_stream().used(), before);
    assert_eq!(list.host_ptr_allocations().count(), 0);
}

#[test]
fn region_not_divisible_by_group_size_is_unknown() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let buf = fx.buffer(0x4000);
    fx.device
        .sim_builtin(Builtin::CopyBufferRectBytes3d)
        .lock()
        .unwrap()
        .force_group_size(Some([8, 1, 1]));
    let region = CopyRegion {
        width: 12,
        height: 2,
        depth: 2,
        ..Default::default()
    };
    let before = list.command_stream().used();

    let result = list.append_memory_copy_region(
        buf.gpu_address,
        &region,
        16,
        64,
        buf.gpu_address + 0x2000,
        &region,
        16,
        64,
        EventArgs::none(),
    );
    assert_eq!(ResultCode::from(&result), ResultCode::Unknown);
    assert_eq!(list.command_stream().used(), before);
    assert!(list.residency().is_empty());
}

#[test]
fn page_fault_copy_flushes_for_host() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let dst = fx.buffer(0x1000);
    let src = fx.buffer(0x1000);

    list.append_page_fault_copy(&dst, &src, 0x1000, true).unwrap();
    let cmds = decode(&list);
    let launches = walkers(&cmds);
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].kernel_id, Builtin::PageFaultCopy as u32 + 1);
    assert_eq!(launches[0].group_count, [0x1000 / 32, 1, 1]);
    assert!(cmds.last().unwrap().is_dc_flush());

    let result = list.append_page_fault_copy(&dst, &src, 0x2000, false);
    assert_eq!(ResultCode::from(&result), ResultCode::InvalidArgument);
}
