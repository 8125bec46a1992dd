//! Growable batch buffer with one writer method per packet.

use core::mem::size_of;

use bytemuck::Pod;

use crate::cmd::{
    BaseAddresses, CmdBatchBufferEnd, CmdHdr, CmdLoadRegisterMem, CmdMiFlushDw, CmdOpcode,
    CmdPipeControl, CmdPredicateGreaterThan, CmdSemaphoreWait, CmdStateBaseAddress,
    CmdStoreRegisterMem, CmdWalker, CmdXyColorBlt, CmdXyCopyBlt, ColorBlt, CompareOp, CopyBlt,
    PipeControlFlags, PostSync, PostSyncOp, WalkerArgs,
};

pub const DEFAULT_COMMAND_BUFFER_SIZE: usize = 64 * 1024;

fn align_up(v: usize, a: usize) -> usize {
    debug_assert!(a.is_power_of_two());
    (v + (a - 1)) & !(a - 1)
}

fn post_sync_fields(post_sync: PostSync) -> (u32, u64, u64) {
    match post_sync {
        PostSync::None => (PostSyncOp::None as u32, 0, 0),
        PostSync::WriteImmediate { address, data } => {
            (PostSyncOp::WriteImmediate as u32, address, data)
        }
    }
}

/// Command buffer backing a command list.
///
/// Packet writers always grow the buffer. `capacity` is the soft limit used by
/// [`CommandStream::get_space`], which hands raw bytes to callers that encode
/// directly.
#[derive(Debug, Clone)]
pub struct CommandStream {
    buf: Vec<u8>,
    capacity: usize,
}

impl Default for CommandStream {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_COMMAND_BUFFER_SIZE)
    }
}

impl CommandStream {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn available_space(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Drop everything encoded after `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    /// Reserve `n` zeroed bytes at the end of the stream.
    ///
    /// Returns `None` without touching the stream when fewer than `n` bytes
    /// remain before the soft capacity.
    pub fn get_space(&mut self, n: usize) -> Option<&mut [u8]> {
        if n > self.available_space() {
            return None;
        }
        let offset = self.buf.len();
        self.buf.resize(offset + n, 0);
        Some(&mut self.buf[offset..])
    }

    fn append_packet<T: Pod>(&mut self, packet: &T) {
        let offset = self.buf.len();
        self.buf.extend_from_slice(bytemuck::bytes_of(packet));
        tracing::trace!(offset, size_bytes = size_of::<T>(), "packet");
    }

    pub fn noop(&mut self) {
        self.append_packet(&CmdHdr::for_packet::<CmdHdr>(CmdOpcode::Noop));
    }

    pub fn state_base_address(&mut self, bases: &BaseAddresses) {
        self.append_packet(&CmdStateBaseAddress {
            hdr: CmdHdr::for_packet::<CmdStateBaseAddress>(CmdOpcode::StateBaseAddress),
            general_state_base: bases.general_state,
            surface_state_base: bases.surface_state,
            dynamic_state_base: bases.dynamic_state,
            indirect_object_base: bases.indirect_object,
            instruction_base: bases.instruction,
        });
    }

    pub fn pipe_control(&mut self, flags: PipeControlFlags, post_sync: PostSync) {
        let (post_sync_op, address, immediate_data) = post_sync_fields(post_sync);
        self.append_packet(&CmdPipeControl {
            hdr: CmdHdr::for_packet::<CmdPipeControl>(CmdOpcode::PipeControl),
            flags: flags.bits(),
            post_sync_op,
            address,
            immediate_data,
        });
    }

    pub fn mi_flush_dw(&mut self, post_sync: PostSync) {
        let (post_sync_op, address, immediate_data) = post_sync_fields(post_sync);
        self.append_packet(&CmdMiFlushDw {
            hdr: CmdHdr::for_packet::<CmdMiFlushDw>(CmdOpcode::MiFlushDw),
            reserved0: 0,
            post_sync_op,
            address,
            immediate_data,
        });
    }

    pub fn semaphore_wait(&mut self, address: u64, value: u32, compare: CompareOp) {
        self.append_packet(&CmdSemaphoreWait {
            hdr: CmdHdr::for_packet::<CmdSemaphoreWait>(CmdOpcode::SemaphoreWait),
            compare_op: compare as u32,
            semaphore_data: value,
            address,
        });
    }

    pub fn store_register_mem(&mut self, register: u32, address: u64) {
        self.append_packet(&CmdStoreRegisterMem {
            hdr: CmdHdr::for_packet::<CmdStoreRegisterMem>(CmdOpcode::StoreRegisterMem),
            register,
            reserved0: 0,
            address,
        });
    }

    pub fn load_register_mem(&mut self, register: u32, address: u64) {
        self.append_packet(&CmdLoadRegisterMem {
            hdr: CmdHdr::for_packet::<CmdLoadRegisterMem>(CmdOpcode::LoadRegisterMem),
            register,
            reserved0: 0,
            address,
        });
    }

    pub fn predicate_greater_than(&mut self, address: u64, value: u32) {
        self.append_packet(&CmdPredicateGreaterThan {
            hdr: CmdHdr::for_packet::<CmdPredicateGreaterThan>(CmdOpcode::PredicateGreaterThan),
            value,
            reserved0: 0,
            address,
        });
    }

    pub fn walker(&mut self, args: &WalkerArgs) {
        let fixed = size_of::<CmdWalker>();
        let total = align_up(fixed + args.payload.len(), 4);
        let packet = CmdWalker {
            hdr: CmdHdr {
                opcode: CmdOpcode::Walker as u32,
                size_bytes: total as u32,
            },
            kernel_id: args.kernel_id,
            flags: args.flags.bits(),
            group_count: args.group_count,
            group_size: args.group_size,
            simd_size: args.simd_size,
            payload_size_bytes: args.payload.len() as u32,
        };

        let offset = self.buf.len();
        self.buf.extend_from_slice(bytemuck::bytes_of(&packet));
        self.buf.extend_from_slice(&args.payload);
        self.buf.resize(offset + total, 0);
        tracing::trace!(
            offset,
            size_bytes = total,
            kernel_id = args.kernel_id,
            group_count = ?args.group_count,
            "walker"
        );
    }

    pub fn xy_copy_blt(&mut self, blt: &CopyBlt) {
        self.append_packet(&CmdXyCopyBlt {
            hdr: CmdHdr::for_packet::<CmdXyCopyBlt>(CmdOpcode::XyCopyBlt),
            color_depth: blt.color_depth,
            reserved0: 0,
            dst_address: blt.dst_address,
            src_address: blt.src_address,
            dst_x: blt.dst_x,
            dst_y: blt.dst_y,
            src_x: blt.src_x,
            src_y: blt.src_y,
            width: blt.width,
            height: blt.height,
            dst_pitch: blt.dst_pitch,
            src_pitch: blt.src_pitch,
        });
    }

    pub fn xy_color_blt(&mut self, blt: &ColorBlt) {
        self.append_packet(&CmdXyColorBlt {
            hdr: CmdHdr::for_packet::<CmdXyColorBlt>(CmdOpcode::XyColorBlt),
            color_depth: blt.color_depth,
            reserved0: 0,
            dst_address: blt.dst_address,
            width: blt.width,
            height: blt.height,
            dst_pitch: blt.dst_pitch,
            reserved1: 0,
            pattern: blt.pattern,
        });
    }

    pub fn batch_buffer_end(&mut self) {
        self.append_packet(&CmdBatchBufferEnd {
            hdr: CmdHdr::for_packet::<CmdBatchBufferEnd>(CmdOpcode::BatchBufferEnd),
            reserved0: 0,
            reserved1: 0,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_space_respects_soft_capacity() {
        let mut stream = CommandStream::with_capacity(32);
        stream.noop();
        assert_eq!(stream.available_space(), 24);

        assert!(stream.get_space(25).is_none());
        assert_eq!(stream.used(), 8);

        let space = stream.get_space(24).expect("space");
        assert_eq!(space.len(), 24);
        assert!(space.iter().all(|b| *b == 0));
        assert_eq!(stream.available_space(), 0);
    }

    #[test]
    fn walker_payload_is_padded_to_dword() {
        let mut stream = CommandStream::default();
        stream.walker(&WalkerArgs {
            kernel_id: 7,
            flags: Default::default(),
            group_count: [1, 1, 1],
            group_size: [32, 1, 1],
            simd_size: 32,
            payload: vec![1, 2, 3],
        });
        assert_eq!(stream.used(), size_of::<CmdWalker>() + 4);
    }
}
