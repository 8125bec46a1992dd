//! Batch buffer packet layouts.
//!
//! Every packet starts with a [`CmdHdr`] whose `size_bytes` covers the header
//! plus payload and is always a multiple of 4. All fields are little-endian.
//! Packets are plain `#[repr(C)]` structs so they can be appended to and read
//! back from a byte stream with `bytemuck`.

use core::mem::size_of;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

/// `MI_STORE_REGISTER_MEM` source for the global GPU timestamp (low dword).
pub const REG_GLOBAL_TIMESTAMP_LDW: u32 = 0x2358;
/// Per-context thread time register (low dword).
pub const GP_THREAD_TIME_REG_ADDRESS_OFFSET_LOW: u32 = 0x23A8;

pub const GPGPU_DISPATCHDIMX: u32 = 0x2500;
pub const GPGPU_DISPATCHDIMY: u32 = 0x2504;
pub const GPGPU_DISPATCHDIMZ: u32 = 0x2508;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdHdr {
    pub opcode: u32,
    pub size_bytes: u32,
}

impl CmdHdr {
    pub const SIZE_BYTES: usize = 8;

    pub(crate) fn for_packet<T>(opcode: CmdOpcode) -> Self {
        Self {
            opcode: opcode as u32,
            size_bytes: size_of::<T>() as u32,
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmdOpcode {
    Noop = 0,

    StateBaseAddress = 0x100,

    PipeControl = 0x200,
    MiFlushDw = 0x201,
    SemaphoreWait = 0x202,

    StoreRegisterMem = 0x300,
    LoadRegisterMem = 0x301,
    PredicateGreaterThan = 0x302,

    Walker = 0x400,

    XyCopyBlt = 0x500,
    XyColorBlt = 0x501,

    BatchBufferEnd = 0xA00,
}

impl CmdOpcode {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Noop),
            0x100 => Some(Self::StateBaseAddress),
            0x200 => Some(Self::PipeControl),
            0x201 => Some(Self::MiFlushDw),
            0x202 => Some(Self::SemaphoreWait),
            0x300 => Some(Self::StoreRegisterMem),
            0x301 => Some(Self::LoadRegisterMem),
            0x302 => Some(Self::PredicateGreaterThan),
            0x400 => Some(Self::Walker),
            0x500 => Some(Self::XyCopyBlt),
            0x501 => Some(Self::XyColorBlt),
            0xA00 => Some(Self::BatchBufferEnd),
            _ => None,
        }
    }
}

bitflags! {
    /// Pipe control flush/stall bits.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PipeControlFlags: u32 {
        const CS_STALL = 1 << 0;
        const DC_FLUSH = 1 << 1;
        /// Gen12+ only: flush the HDC pipeline alongside the data cache.
        const HDC_PIPELINE_FLUSH = 1 << 2;
        /// Empty stall emitted ahead of a post-sync operation on parts that need it.
        const WORKAROUND = 1 << 3;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct WalkerFlags: u32 {
        /// Group counts come from the `GPGPU_DISPATCHDIM*` registers.
        const INDIRECT = 1 << 0;
        /// Walker only executes when the predicate register is set.
        const PREDICATED = 1 << 1;
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostSyncOp {
    None = 0,
    WriteImmediate = 1,
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    SadGreaterThanSdd = 0,
    SadGreaterThanOrEqualSdd = 1,
    SadLessThanSdd = 2,
    SadLessThanOrEqualSdd = 3,
    SadEqualSdd = 4,
    SadNotEqualSdd = 5,
}

impl CompareOp {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::SadGreaterThanSdd),
            1 => Some(Self::SadGreaterThanOrEqualSdd),
            2 => Some(Self::SadLessThanSdd),
            3 => Some(Self::SadLessThanOrEqualSdd),
            4 => Some(Self::SadEqualSdd),
            5 => Some(Self::SadNotEqualSdd),
            _ => None,
        }
    }
}

/* ------------------------------- State ---------------------------------- */

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CmdStateBaseAddress {
    pub hdr: CmdHdr,
    pub general_state_base: u64,
    pub surface_state_base: u64,
    pub dynamic_state_base: u64,
    pub indirect_object_base: u64,
    pub instruction_base: u64,
}

/* --------------------------- Synchronization ---------------------------- */

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CmdPipeControl {
    pub hdr: CmdHdr,
    pub flags: u32,
    pub post_sync_op: u32,
    pub address: u64,
    pub immediate_data: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CmdMiFlushDw {
    pub hdr: CmdHdr,
    pub reserved0: u32,
    pub post_sync_op: u32,
    pub address: u64,
    pub immediate_data: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CmdSemaphoreWait {
    pub hdr: CmdHdr,
    pub compare_op: u32,
    pub semaphore_data: u32,
    pub address: u64,
}

/* ------------------------------ Registers ------------------------------- */

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CmdStoreRegisterMem {
    pub hdr: CmdHdr,
    pub register: u32,
    pub reserved0: u32,
    pub address: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CmdLoadRegisterMem {
    pub hdr: CmdHdr,
    pub register: u32,
    pub reserved0: u32,
    pub address: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CmdPredicateGreaterThan {
    pub hdr: CmdHdr,
    pub value: u32,
    pub reserved0: u32,
    pub address: u64,
}

/* ------------------------------- Compute -------------------------------- */

/// Fixed part of a walker packet. Followed by `payload_size_bytes` of
/// cross-thread data, padded to 4 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CmdWalker {
    pub hdr: CmdHdr,
    pub kernel_id: u32,
    pub flags: u32,
    pub group_count: [u32; 3],
    pub group_size: [u32; 3],
    pub simd_size: u32,
    pub payload_size_bytes: u32,
}

/* ----------------------------- Copy engine ------------------------------ */

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CmdXyCopyBlt {
    pub hdr: CmdHdr,
    /// Bytes per pixel.
    pub color_depth: u32,
    pub reserved0: u32,
    pub dst_address: u64,
    pub src_address: u64,
    pub dst_x: u32,
    pub dst_y: u32,
    pub src_x: u32,
    pub src_y: u32,
    pub width: u32,
    pub height: u32,
    pub dst_pitch: u32,
    pub src_pitch: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CmdXyColorBlt {
    pub hdr: CmdHdr,
    pub color_depth: u32,
    pub reserved0: u32,
    pub dst_address: u64,
    pub width: u32,
    pub height: u32,
    pub dst_pitch: u32,
    pub reserved1: u32,
    pub pattern: [u32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CmdBatchBufferEnd {
    pub hdr: CmdHdr,
    pub reserved0: u32,
    pub reserved1: u32,
}

/* ------------------------- Decoded representation ------------------------ */

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BaseAddresses {
    pub general_state: u64,
    pub surface_state: u64,
    pub dynamic_state: u64,
    pub indirect_object: u64,
    pub instruction: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostSync {
    None,
    WriteImmediate { address: u64, data: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalkerArgs {
    pub kernel_id: u32,
    pub flags: WalkerFlags,
    pub group_count: [u32; 3],
    pub group_size: [u32; 3],
    pub simd_size: u32,
    pub payload: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyBlt {
    pub color_depth: u32,
    pub dst_address: u64,
    pub src_address: u64,
    pub dst_x: u32,
    pub dst_y: u32,
    pub src_x: u32,
    pub src_y: u32,
    pub width: u32,
    pub height: u32,
    pub dst_pitch: u32,
    pub src_pitch: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorBlt {
    pub color_depth: u32,
    pub dst_address: u64,
    pub width: u32,
    pub height: u32,
    pub dst_pitch: u32,
    pub pattern: [u32; 4],
}

/// A decoded batch buffer command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HwCmd {
    Noop,
    StateBaseAddress(BaseAddresses),
    PipeControl {
        flags: PipeControlFlags,
        post_sync: PostSync,
    },
    MiFlushDw {
        post_sync: PostSync,
    },
    SemaphoreWait {
        address: u64,
        value: u32,
        compare: CompareOp,
    },
    StoreRegisterMem {
        register: u32,
        address: u64,
    },
    LoadRegisterMem {
        register: u32,
        address: u64,
    },
    PredicateGreaterThan {
        address: u64,
        value: u32,
    },
    Walker(WalkerArgs),
    XyCopyBlt(CopyBlt),
    XyColorBlt(ColorBlt),
    BatchBufferEnd,
}

impl HwCmd {
    pub fn opcode(&self) -> CmdOpcode {
        match self {
            HwCmd::Noop => CmdOpcode::Noop,
            HwCmd::StateBaseAddress(_) => CmdOpcode::StateBaseAddress,
            HwCmd::PipeControl { .. } => CmdOpcode::PipeControl,
            HwCmd::MiFlushDw { .. } => CmdOpcode::MiFlushDw,
            HwCmd::SemaphoreWait { .. } => CmdOpcode::SemaphoreWait,
            HwCmd::StoreRegisterMem { .. } => CmdOpcode::StoreRegisterMem,
            HwCmd::LoadRegisterMem { .. } => CmdOpcode::LoadRegisterMem,
            HwCmd::PredicateGreaterThan { .. } => CmdOpcode::PredicateGreaterThan,
            HwCmd::Walker(_) => CmdOpcode::Walker,
            HwCmd::XyCopyBlt(_) => CmdOpcode::XyCopyBlt,
            HwCmd::XyColorBlt(_) => CmdOpcode::XyColorBlt,
            HwCmd::BatchBufferEnd => CmdOpcode::BatchBufferEnd,
        }
    }

    /// Whether this command flushes the data cache.
    pub fn is_dc_flush(&self) -> bool {
        matches!(self, HwCmd::PipeControl { flags, .. } if flags.contains(PipeControlFlags::DC_FLUSH))
    }

    pub fn as_walker(&self) -> Option<&WalkerArgs> {
        match self {
            HwCmd::Walker(args) => Some(args),
            _ => None,
        }
    }
}

/* -------------------------------- Decode -------------------------------- */

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CmdDecodeError {
    #[error("buffer too small")]
    BufferTooSmall,
    #[error("bad packet size_bytes {found}")]
    BadSizeBytes { found: u32 },
    #[error("packet size_bytes {found} is not 4-byte aligned")]
    SizeNotAligned { found: u32 },
    #[error("packet at offset {offset} (size {packet_size_bytes}) overruns stream of {stream_size_bytes} bytes")]
    PacketOverrunsStream {
        offset: usize,
        packet_size_bytes: u32,
        stream_size_bytes: usize,
    },
    #[error("unknown opcode 0x{found:X}")]
    UnknownOpcode { found: u32 },
    #[error("unknown compare op {found}")]
    UnknownCompareOp { found: u32 },
    #[error("payload size mismatch: expected {expected}, found {found}")]
    PayloadSizeMismatch { expected: usize, found: usize },
}

pub fn decode_cmd_hdr_le(buf: &[u8]) -> Result<CmdHdr, CmdDecodeError> {
    if buf.len() < CmdHdr::SIZE_BYTES {
        return Err(CmdDecodeError::BufferTooSmall);
    }

    let hdr: CmdHdr = bytemuck::pod_read_unaligned(&buf[..CmdHdr::SIZE_BYTES]);
    if hdr.size_bytes < CmdHdr::SIZE_BYTES as u32 {
        return Err(CmdDecodeError::BadSizeBytes {
            found: hdr.size_bytes,
        });
    }
    if hdr.size_bytes % 4 != 0 {
        return Err(CmdDecodeError::SizeNotAligned {
            found: hdr.size_bytes,
        });
    }

    Ok(hdr)
}

fn read_packet<T: Pod>(packet: &[u8]) -> Result<T, CmdDecodeError> {
    if packet.len() != size_of::<T>() {
        return Err(CmdDecodeError::PayloadSizeMismatch {
            expected: size_of::<T>(),
            found: packet.len(),
        });
    }
    Ok(bytemuck::pod_read_unaligned(packet))
}

fn decode_post_sync(op: u32, address: u64, data: u64) -> PostSync {
    if op == PostSyncOp::WriteImmediate as u32 {
        PostSync::WriteImmediate { address, data }
    } else {
        PostSync::None
    }
}

fn decode_packet(opcode: CmdOpcode, packet: &[u8]) -> Result<HwCmd, CmdDecodeError> {
    let cmd = match opcode {
        CmdOpcode::Noop => HwCmd::Noop,
        CmdOpcode::StateBaseAddress => {
            let p: CmdStateBaseAddress = read_packet(packet)?;
            HwCmd::StateBaseAddress(BaseAddresses {
                general_state: p.general_state_base,
                surface_state: p.surface_state_base,
                dynamic_state: p.dynamic_state_base,
                indirect_object: p.indirect_object_base,
                instruction: p.instruction_base,
            })
        }
        CmdOpcode::PipeControl => {
            let p: CmdPipeControl = read_packet(packet)?;
            HwCmd::PipeControl {
                flags: PipeControlFlags::from_bits_retain(p.flags),
                post_sync: decode_post_sync(p.post_sync_op, p.address, p.immediate_data),
            }
        }
        CmdOpcode::MiFlushDw => {
            let p: CmdMiFlushDw = read_packet(packet)?;
            HwCmd::MiFlushDw {
                post_sync: decode_post_sync(p.post_sync_op, p.address, p.immediate_data),
            }
        }
        CmdOpcode::SemaphoreWait => {
            let p: CmdSemaphoreWait = read_packet(packet)?;
            let compare = CompareOp::from_u32(p.compare_op)
                .ok_or(CmdDecodeError::UnknownCompareOp { found: p.compare_op })?;
            HwCmd::SemaphoreWait {
                address: p.address,
                value: p.semaphore_data,
                compare,
            }
        }
        CmdOpcode::StoreRegisterMem => {
            let p: CmdStoreRegisterMem = read_packet(packet)?;
            HwCmd::StoreRegisterMem {
                register: p.register,
                address: p.address,
            }
        }
        CmdOpcode::LoadRegisterMem => {
            let p: CmdLoadRegisterMem = read_packet(packet)?;
            HwCmd::LoadRegisterMem {
                register: p.register,
                address: p.address,
            }
        }
        CmdOpcode::PredicateGreaterThan => {
            let p: CmdPredicateGreaterThan = read_packet(packet)?;
            HwCmd::PredicateGreaterThan {
                address: p.address,
                value: p.value,
            }
        }
        CmdOpcode::Walker => {
            let fixed = size_of::<CmdWalker>();
            if packet.len() < fixed {
                return Err(CmdDecodeError::BufferTooSmall);
            }
            let p: CmdWalker = bytemuck::pod_read_unaligned(&packet[..fixed]);
            let payload_len = p.payload_size_bytes as usize;
            let payload = packet
                .get(fixed..fixed + payload_len)
                .ok_or(CmdDecodeError::PayloadSizeMismatch {
                    expected: fixed + payload_len,
                    found: packet.len(),
                })?;
            HwCmd::Walker(WalkerArgs {
                kernel_id: p.kernel_id,
                flags: WalkerFlags::from_bits_retain(p.flags),
                group_count: p.group_count,
                group_size: p.group_size,
                simd_size: p.simd_size,
                payload: payload.to_vec(),
            })
        }
        CmdOpcode::XyCopyBlt => {
            let p: CmdXyCopyBlt = read_packet(packet)?;
            HwCmd::XyCopyBlt(CopyBlt {
                color_depth: p.color_depth,
                dst_address: p.dst_address,
                src_address: p.src_address,
                dst_x: p.dst_x,
                dst_y: p.dst_y,
                src_x: p.src_x,
                src_y: p.src_y,
                width: p.width,
                height: p.height,
                dst_pitch: p.dst_pitch,
                src_pitch: p.src_pitch,
            })
        }
        CmdOpcode::XyColorBlt => {
            let p: CmdXyColorBlt = read_packet(packet)?;
            HwCmd::XyColorBlt(ColorBlt {
                color_depth: p.color_depth,
                dst_address: p.dst_address,
                width: p.width,
                height: p.height,
                dst_pitch: p.dst_pitch,
                pattern: p.pattern,
            })
        }
        CmdOpcode::BatchBufferEnd => {
            let _: CmdBatchBufferEnd = read_packet(packet)?;
            HwCmd::BatchBufferEnd
        }
    };
    Ok(cmd)
}

/// Decode a whole batch buffer into typed commands.
pub fn parse_cmd_stream(buf: &[u8]) -> Result<Vec<HwCmd>, CmdDecodeError> {
    let mut cmds = Vec::new();
    let mut offset = 0usize;
    while offset < buf.len() {
        let hdr = decode_cmd_hdr_le(&buf[offset..])?;
        let end = offset
            .checked_add(hdr.size_bytes as usize)
            .filter(|&end| end <= buf.len())
            .ok_or(CmdDecodeError::PacketOverrunsStream {
                offset,
                packet_size_bytes: hdr.size_bytes,
                stream_size_bytes: buf.len(),
            })?;
        let opcode =
            CmdOpcode::from_u32(hdr.opcode).ok_or(CmdDecodeError::UnknownOpcode { found: hdr.opcode })?;
        cmds.push(decode_packet(opcode, &buf[offset..end])?);
        offset = end;
    }
    Ok(cmds)
}
