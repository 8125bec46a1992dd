mod common;

use common::{decode, walkers, Fixture, HOST_PTR};
use gpucmd_cmdlist::{
    AllocationType, Builtin, CommandListDesc, EventArgs, Image, ImageDesc, ImageRegion, ImageType,
    MemoryType, ResultCode,
};
use gpucmd_hw::cmd::HwCmd;
use gpucmd_hw::{HwFamily, Vec3};
use pretty_assertions::assert_eq;

fn image(fx: &Fixture, image_type: ImageType, extent: (u32, u32, u32), bpp: u32) -> Image {
    let (width, height, depth) = extent;
    let size = u64::from(width * height.max(1) * depth.max(1) * bpp);
    let alloc = fx
        .device
        .allocate(size, MemoryType::Device, AllocationType::Image);
    Image::new(
        alloc,
        ImageDesc {
            image_type,
            width,
            height,
            depth,
            bytes_per_pixel: bpp,
        },
    )
}

fn dispatched_items(cmds: &[HwCmd]) -> Vec<u32> {
    walkers(cmds)
        .iter()
        .map(|w| {
            w.group_count
                .iter()
                .zip(w.group_size.iter())
                .map(|(c, s)| c * s)
                .product()
        })
        .collect()
}

#[test]
fn upload_binds_packed_pitches() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let img = image(&fx, ImageType::Image2D, (16, 8, 1), 4);

    list.append_image_copy_from_memory(&img, HOST_PTR, None, EventArgs::none())
        .unwrap();

    let cmds = decode(&list);
    assert_eq!(dispatched_items(&cmds), vec![16 * 8]);
    assert_eq!(
        walkers(&cmds)[0].kernel_id,
        Builtin::CopyBufferToImage3d4Bytes as u32 + 1
    );
    assert!(!cmds.iter().any(HwCmd::is_dc_flush));

    let shadows: Vec<_> = list.host_ptr_allocations().map(|(p, a)| (p, a.size)).collect();
    assert_eq!(shadows, vec![(HOST_PTR, 16 * 8 * 4)]);
    assert!(list.residency().iter().any(|a| a.id == img.allocation().id));

    let kernel = fx.device.sim_builtin(Builtin::CopyBufferToImage3d4Bytes);
    let kernel = kernel.lock().unwrap();
    assert_eq!(kernel.argument(4), Some(bytemuck::bytes_of(&[64u32, 512])));
}

#[test]
fn one_dimensional_array_layers_step_by_row_pitch() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let img = image(&fx, ImageType::Image1DArray, (16, 4, 1), 4);

    list.append_image_copy_from_memory(&img, HOST_PTR, None, EventArgs::none())
        .unwrap();

    let shadows: Vec<_> = list.host_ptr_allocations().map(|(_, a)| a.size).collect();
    assert_eq!(shadows, vec![16 * 4 * 4]);
    let kernel = fx.device.sim_builtin(Builtin::CopyBufferToImage3d4Bytes);
    let kernel = kernel.lock().unwrap();
    assert_eq!(kernel.argument(4), Some(bytemuck::bytes_of(&[64u32, 64])));
}

#[test]
fn download_to_host_memory_flushes() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let img = image(&fx, ImageType::Image3D, (8, 4, 2), 2);
    let region = ImageRegion {
        origin: Vec3::new(2, 1, 1),
        extent: Vec3::new(4, 2, 1),
    };

    list.append_image_copy_to_memory(HOST_PTR, &img, Some(&region), EventArgs::none())
        .unwrap();

    let cmds = decode(&list);
    assert_eq!(dispatched_items(&cmds), vec![4 * 2]);
    assert!(cmds.last().unwrap().is_dc_flush());

    let kernel = fx.device.sim_builtin(Builtin::CopyImage3dToBuffer2Bytes);
    let kernel = kernel.lock().unwrap();
    assert_eq!(kernel.argument(2), Some(bytemuck::bytes_of(&[2u32, 1, 1])));
}

#[test]
fn unsupported_element_size_is_rejected() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let img = image(&fx, ImageType::Image2D, (4, 4, 1), 3);

    let result = list.append_image_copy_from_memory(&img, HOST_PTR, None, EventArgs::none());
    assert_eq!(ResultCode::from(&result), ResultCode::InvalidArgument);
    assert_eq!(list.host_ptr_allocations().count(), 0);
}

#[test]
fn out_of_bounds_region_is_rejected() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let img = image(&fx, ImageType::Image2D, (4, 4, 1), 4);
    let region = ImageRegion {
        origin: Vec3::new(2, 0, 0),
        extent: Vec3::new(4, 1, 1),
    };

    let result = list.append_image_copy_to_memory(HOST_PTR, &img, Some(&region), EventArgs::none());
    assert_eq!(ResultCode::from(&result), ResultCode::InvalidArgument);
}

#[test]
fn image_to_image_copy_binds_origins() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let src = image(&fx, ImageType::Image2D, (32, 32, 1), 4);
    let dst = image(&fx, ImageType::Image2D, (64, 64, 1), 4);
    let src_region = ImageRegion {
        origin: Vec3::new(0, 16, 0),
        extent: Vec3::new(16, 16, 1),
    };
    let dst_region = ImageRegion {
        origin: Vec3::new(8, 8, 0),
        extent: Vec3::new(16, 16, 1),
    };

    list.append_image_copy_region(
        &dst,
        &src,
        Some(&dst_region),
        Some(&src_region),
        EventArgs::none(),
    )
    .unwrap();

    let cmds = decode(&list);
    assert_eq!(dispatched_items(&cmds), vec![16 * 16]);
    let kernel = fx.device.sim_builtin(Builtin::CopyImageRegion);
    let kernel = kernel.lock().unwrap();
    assert_eq!(kernel.argument_u64(0), Some(src.gpu_address()));
    assert_eq!(kernel.argument_u64(1), Some(dst.gpu_address()));
    assert_eq!(kernel.argument(2), Some(bytemuck::bytes_of(&[0u32, 16, 0])));
    assert_eq!(kernel.argument(3), Some(bytemuck::bytes_of(&[8u32, 8, 0])));
}

#[test]
fn image_copy_requires_matching_shapes() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::default());
    let a = image(&fx, ImageType::Image2D, (16, 16, 1), 4);
    let b = image(&fx, ImageType::Image2D, (8, 8, 1), 4);
    let c = image(&fx, ImageType::Image2D, (16, 16, 1), 8);

    let result = list.append_image_copy(&a, &b, EventArgs::none());
    assert_eq!(ResultCode::from(&result), ResultCode::InvalidArgument);
    let result = list.append_image_copy(&a, &c, EventArgs::none());
    assert_eq!(ResultCode::from(&result), ResultCode::InvalidArgument);
}

#[test]
fn copy_only_image_copy_blits_each_slice() {
    let fx = Fixture::new(HwFamily::Gen12Lp);
    let mut list = fx.list(CommandListDesc::copy_only());
    let src = image(&fx, ImageType::Image3D, (8, 8, 3), 4);
    let dst = image(&fx, ImageType::Image3D, (8, 8, 3), 4);

    list.append_image_copy(&dst, &src, EventArgs::none()).unwrap();

    let cmds = decode(&list);
    let blits: Vec<_> = cmds
        .iter()
        .filter_map(|c| match c {
            HwCmd::XyCopyBlt(blt) => Some((blt.color_depth, blt.dst_address, blt.src_address)),
            _ => None,
        })
        .collect();
    let slice = 8 * 8 * 4;
    assert_eq!(
        blits,
        (0..3)
            .map(|z| (4, dst.gpu_address() + z * slice, src.gpu_address() + z * slice))
            .collect::<Vec<_>>()
    );
}
