//! Shared-memory layouts mapped by the kernel and read by the scheduler
//!
//! The Control Space and the Inter-Chip Space live in memory visible to
//! both the host and the device. Programs reference their fields by
//! absolute device address, so these layouts are ABI.

use super::sys::{WireStruct, DQS_MAX_QUEUE_NUM};

/// Handles cached per input queue by batch dequeue.
pub const MBUF_CACHE_DEPTH: usize = 7;

/// Handle lists carry two spare words so 64-bit loads stay in bounds.
pub const MBUF_LIST_LEN: usize = DQS_MAX_QUEUE_NUM + 2;

/// Groups in one Inter-Chip Space.
pub const DQS_INTER_CHIP_GROUP_MAX: usize = 16;

/// Handle cache of one input queue.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputMbufCache {
    /// Ring of recently dequeued handles.
    pub handles: [u32; MBUF_CACHE_DEPTH],
    /// Next write position in `handles`.
    pub cnt: u32,
}

/// Per-stream Control Space (1600 bytes).
#[repr(C, align(64))]
#[derive(Debug, Clone, Copy)]
pub struct StarsDqsCtrlSpace {
    /// Bound input queues.
    pub input_queue_num: u8,
    /// Bound output queues.
    pub output_queue_num: u8,
    /// Raw scheduling type.
    pub sched_type: u8,
    /// Frame-alignment verdict, written by hardware.
    pub align_res: u8,
    /// Frame-alignment mode.
    pub frame_align_mode: u8,
    /// Frame-alignment timeout handling.
    pub frame_align_timeout_mode: u8,
    /// Reserved.
    pub rsv0: [u8; 2],
    /// Frame-alignment timeout threshold.
    pub frame_align_timeout_threshold: u32,
    /// Reserved.
    pub rsv1: u32,
    /// Input queue ids, zero-padded.
    pub input_queue_ids: [u16; DQS_MAX_QUEUE_NUM],
    /// Output queue ids, zero-padded.
    pub output_queue_ids: [u16; DQS_MAX_QUEUE_NUM],
    /// Reserved.
    pub rsv2: [u8; 8],

    /// GQM dequeue register per input.
    pub input_queue_gqm_base_addrs: [u64; DQS_MAX_QUEUE_NUM],
    /// Handles dequeued this round.
    pub input_mbuf_list: [u32; MBUF_LIST_LEN],
    /// Pool free register per input.
    pub input_mbuf_free_addrs: [u64; DQS_MAX_QUEUE_NUM],
    /// Head pool base per input.
    pub input_head_pool_base_addrs: [u64; DQS_MAX_QUEUE_NUM],
    /// Head pool block size per input.
    pub input_head_pool_block_size_list: [u32; DQS_MAX_QUEUE_NUM],
    /// Data pool block size per input.
    pub input_data_pool_block_size_list: [u32; DQS_MAX_QUEUE_NUM],
    /// Data pool base per input.
    pub input_data_pool_base_addrs: [u64; DQS_MAX_QUEUE_NUM],
    /// Batch dequeue cache per input.
    pub input_mbuf_cache_list: [InputMbufCache; DQS_MAX_QUEUE_NUM],
    /// Substitute addresses for timed-out frames.
    pub input_default_addrs: [u64; DQS_MAX_QUEUE_NUM],

    /// Pool each output allocates from.
    pub output_mbuf_pool_ids: [u32; DQS_MAX_QUEUE_NUM],
    /// Head pool block size per output.
    pub output_head_pool_block_size_list: [u32; DQS_MAX_QUEUE_NUM],
    /// Data pool block size per output.
    pub output_data_pool_block_size_list: [u32; DQS_MAX_QUEUE_NUM],
    /// Handles allocated for this round.
    pub output_mbuf_list: [u32; MBUF_LIST_LEN],
    /// Enqueue register per output.
    pub output_qmngr_enqueue_addrs: [u64; DQS_MAX_QUEUE_NUM],
    /// Overwrite register per output.
    pub output_qmngr_ow_addrs: [u64; DQS_MAX_QUEUE_NUM],
    /// Pool alloc register per output.
    pub output_mbuf_alloc_addrs: [u64; DQS_MAX_QUEUE_NUM],
    /// Pool free register per output.
    pub output_mbuf_free_addrs: [u64; DQS_MAX_QUEUE_NUM],
    /// Head pool base per output.
    pub output_head_pool_base_addrs: [u64; DQS_MAX_QUEUE_NUM],
    /// Data pool base per output.
    pub output_data_pool_base_addrs: [u64; DQS_MAX_QUEUE_NUM],
    /// Reserved.
    pub rsv3: [u8; 40],
}

/// SDMA descriptor fetched by pointer (64 bytes).
#[repr(C, align(64))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StarsSdmaPtrDescriptor {
    /// SDMA operation.
    pub opcode: u8,
    /// Interrupt enable.
    pub ie: u8,
    /// Source substream valid.
    pub sssv: u8,
    /// Destination substream valid.
    pub dssv: u8,
    /// Source non-secure.
    pub sns: u8,
    /// Destination non-secure.
    pub dns: u8,
    /// Quality of service.
    pub qos: u8,
    /// Reserved.
    pub rsv0: u8,
    /// Bytes to transfer.
    pub length: u32,
    /// Source stream id.
    pub src_stream_id: u16,
    /// Source substream id.
    pub src_sub_stream_id: u16,
    /// Destination stream id.
    pub dst_stream_id: u16,
    /// Destination substream id.
    pub dst_sub_stream_id: u16,
    /// Reserved.
    pub rsv1: u32,
    /// Source address.
    pub src_addr: u64,
    /// Patched by the pre-processing program.
    pub dst_addr: u64,
    /// Reserved.
    pub rsv2: [u32; 6],
}

/// One transfer group of the Inter-Chip Space (256 bytes).
#[repr(C, align(64))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StarsDqsInterChipGroup {
    /// Local mbuf being sent.
    pub src_mbuf_handle: u32,
    /// Remote mbuf, allocated by pre-processing.
    pub dst_mbuf_handle: u32,
    /// Local pool id.
    pub src_pool_id: u32,
    /// Remote pool id.
    pub dst_pool_id: u32,
    /// Chip receiving the mbuf.
    pub remote_chip_id: u32,
    /// Producer queue on the remote chip.
    pub remote_prodq_id: u32,
    /// Local head block size.
    pub src_head_block_size: u32,
    /// Local data block size.
    pub src_data_block_size: u32,
    /// Remote head block size.
    pub dst_head_block_size: u32,
    /// Remote data block size.
    pub dst_data_block_size: u32,
    /// Local head offset.
    pub src_head_offset: u32,
    /// Local data offset.
    pub src_data_offset: u32,
    /// Remote head offset.
    pub dst_head_offset: u32,
    /// Remote data offset.
    pub dst_data_offset: u32,
    /// Local head pool base.
    pub src_head_base_addr: u64,
    /// Local data pool base.
    pub src_data_base_addr: u64,
    /// Remote head pool base.
    pub dst_head_base_addr: u64,
    /// Remote data pool base.
    pub dst_data_base_addr: u64,
    /// Free register of the local pool.
    pub src_mbuf_free_addr: u64,
    /// Alloc register of the remote pool.
    pub dst_mbuf_alloc_addr: u64,
    /// Free register of the remote pool.
    pub dst_mbuf_free_addr: u64,
    /// Enqueue register of the remote queue.
    pub dst_qmngr_enqueue_addr: u64,
    /// Overwrite register of the remote queue.
    pub dst_qmngr_ow_addr: u64,
    /// Head copy descriptor.
    pub mbuf_head_memcpy_sqe: StarsSdmaPtrDescriptor,
    /// Data copy descriptor.
    pub mbuf_data_memcpy_sqe: StarsSdmaPtrDescriptor,
}

/// The whole Inter-Chip Space.
pub type StarsDqsInterChipSpace = [StarsDqsInterChipGroup; DQS_INTER_CHIP_GROUP_MAX];

// SAFETY: repr(C) integer-only structs, all bit patterns valid.
unsafe impl WireStruct for StarsDqsCtrlSpace {}
// SAFETY: as above.
unsafe impl WireStruct for StarsDqsInterChipGroup {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, offset_of, size_of};

    #[test]
    fn test_ctrl_space_size() {
        assert_eq!(size_of::<StarsDqsCtrlSpace>(), 1600);
        assert_eq!(align_of::<StarsDqsCtrlSpace>(), 64);
    }

    #[test]
    fn test_ctrl_space_offsets() {
        assert_eq!(offset_of!(StarsDqsCtrlSpace, frame_align_timeout_threshold), 8);
        assert_eq!(offset_of!(StarsDqsCtrlSpace, input_queue_ids), 16);
        assert_eq!(offset_of!(StarsDqsCtrlSpace, output_queue_ids), 36);
        assert_eq!(offset_of!(StarsDqsCtrlSpace, input_queue_gqm_base_addrs), 64);
        assert_eq!(offset_of!(StarsDqsCtrlSpace, input_mbuf_list), 144);
        assert_eq!(offset_of!(StarsDqsCtrlSpace, input_mbuf_free_addrs), 192);
        assert_eq!(offset_of!(StarsDqsCtrlSpace, input_data_pool_base_addrs), 432);
        assert_eq!(offset_of!(StarsDqsCtrlSpace, input_mbuf_cache_list), 512);
        assert_eq!(offset_of!(StarsDqsCtrlSpace, input_default_addrs), 832);
        assert_eq!(offset_of!(StarsDqsCtrlSpace, output_mbuf_pool_ids), 912);
        assert_eq!(offset_of!(StarsDqsCtrlSpace, output_mbuf_list), 1032);
        assert_eq!(offset_of!(StarsDqsCtrlSpace, output_qmngr_enqueue_addrs), 1080);
        assert_eq!(offset_of!(StarsDqsCtrlSpace, output_data_pool_base_addrs), 1480);
        assert_eq!(offset_of!(StarsDqsCtrlSpace, rsv3), 1560);
    }

    #[test]
    fn test_mbuf_cache_layout() {
        assert_eq!(size_of::<InputMbufCache>(), 32);
        assert_eq!(offset_of!(InputMbufCache, cnt), 28);
    }

    #[test]
    fn test_sdma_descriptor_layout() {
        assert_eq!(size_of::<StarsSdmaPtrDescriptor>(), 64);
        assert_eq!(offset_of!(StarsSdmaPtrDescriptor, length), 8);
        assert_eq!(offset_of!(StarsSdmaPtrDescriptor, src_addr), 24);
        assert_eq!(offset_of!(StarsSdmaPtrDescriptor, dst_addr), 32);
    }

    #[test]
    fn test_inter_chip_group_layout() {
        assert_eq!(size_of::<StarsDqsInterChipGroup>(), 256);
        assert_eq!(offset_of!(StarsDqsInterChipGroup, src_mbuf_handle), 0);
        assert_eq!(offset_of!(StarsDqsInterChipGroup, src_head_base_addr), 56);
        assert_eq!(offset_of!(StarsDqsInterChipGroup, dst_qmngr_ow_addr), 120);
        assert_eq!(offset_of!(StarsDqsInterChipGroup, mbuf_head_memcpy_sqe), 128);
        assert_eq!(offset_of!(StarsDqsInterChipGroup, mbuf_data_memcpy_sqe), 192);
        assert_eq!(size_of::<StarsDqsInterChipSpace>(), 256 * DQS_INTER_CHIP_GROUP_MAX);
    }

    #[test]
    fn test_zeroed_ctrl_space() {
        let space = StarsDqsCtrlSpace::zeroed();
        assert_eq!(space.input_queue_num, 0);
        assert!(space.output_qmngr_ow_addrs.iter().all(|&a| a == 0));
    }
}
