//! Raw STARS control-node interface definitions
//!
//! Every command travels as one `_IOWR('S', nr, StarsIoctlCmdArgs)` ioctl.
//! The envelope carries pointers to a fixed-size input struct and a
//! fixed-size output struct; both are plain `#[repr(C)]` data.

use std::mem::size_of;

// ============================================================================
// ioctl encoding helpers
// ============================================================================

const STARS_MAGIC: u32 = b'S' as u32;

const fn _iowr(ty: u32, nr: u32, sz: usize) -> u32 {
    (3 << 30) | ((sz as u32) << 16) | (ty << 8) | nr
}

// ============================================================================
// Limits
// ============================================================================

/// Maximum input or output queues bound to one stream.
pub const DQS_MAX_QUEUE_NUM: usize = 10;

/// Maximum destinations in one queue bind request.
pub const QUEUE_BIND_MAX: usize = 128;

/// Mask extracting the mbuf pool id from an mbuf handle.
pub const DQS_POOL_ID_MASK: u32 = 0x3FF;

// ============================================================================
// Commands
// ============================================================================

/// Control commands understood by the STARS node.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StarsCmd {
    /// Bind a source queue to destinations.
    QueueBind = 0x01,
    /// Remove queue bindings.
    QueueUnbind = 0x02,
    /// Destinations of one source queue.
    QueueQuery = 0x03,
    /// Every queue binding.
    QueueAllQuery = 0x04,
    /// Bind queues to mbuf pools.
    MbufPoolBind = 0x05,
    /// Release mbuf pool bindings.
    MbufPoolUnbind = 0x06,
    /// Read mbuf pool bindings back.
    MbufPoolQuery = 0x07,
    /// Register frame alignment.
    FrameAlignBind = 0x08,
    /// Drop frame alignment.
    FrameAlignUnbind = 0x09,
    /// Publish updated frame-align info.
    FrameAlignUpdate = 0x0A,
    /// Create or remove accelerator subscriptions.
    AccSubscribe = 0x0B,
    /// Create or destroy a Control Space.
    CtrlSpace = 0x0C,
    /// Map the Inter-Chip Space of a stream.
    InterChipSpaceQuery = 0x0D,
}

impl StarsCmd {
    /// Every command, in wire order.
    pub const ALL: [Self; 13] = [
        Self::QueueBind,
        Self::QueueUnbind,
        Self::QueueQuery,
        Self::QueueAllQuery,
        Self::MbufPoolBind,
        Self::MbufPoolUnbind,
        Self::MbufPoolQuery,
        Self::FrameAlignBind,
        Self::FrameAlignUnbind,
        Self::FrameAlignUpdate,
        Self::AccSubscribe,
        Self::CtrlSpace,
        Self::InterChipSpaceQuery,
    ];

    /// ioctl request number.
    pub const fn request(self) -> u32 {
        _iowr(STARS_MAGIC, self as u32, size_of::<StarsIoctlCmdArgs>())
    }

    /// Inverse of [`StarsCmd::request`].
    pub fn from_request(request: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.request() == request)
    }

    /// Name used in logs and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::QueueBind => "QueueBind",
            Self::QueueUnbind => "QueueUnbind",
            Self::QueueQuery => "QueueQuery",
            Self::QueueAllQuery => "QueueAllQuery",
            Self::MbufPoolBind => "MbufPoolBind",
            Self::MbufPoolUnbind => "MbufPoolUnbind",
            Self::MbufPoolQuery => "MbufPoolQuery",
            Self::FrameAlignBind => "FrameAlignBind",
            Self::FrameAlignUnbind => "FrameAlignUnbind",
            Self::FrameAlignUpdate => "FrameAlignUpdate",
            Self::AccSubscribe => "AccSubscribe",
            Self::CtrlSpace => "CtrlSpace",
            Self::InterChipSpaceQuery => "InterChipSpaceQuery",
        }
    }
}

// ============================================================================
// Wire marker
// ============================================================================

/// Plain data exchanged with the kernel by pointer.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, contain no pointers or references,
/// and accept every bit pattern (the kernel writes outputs in place).
pub unsafe trait WireStruct: Copy + 'static {
    /// All-zero value.
    fn zeroed() -> Self {
        // SAFETY: the trait contract guarantees all-zero is a valid value.
        unsafe { std::mem::zeroed() }
    }
}

// SAFETY: zero-sized, no bytes to interpret.
unsafe impl WireStruct for () {}

macro_rules! wire_structs {
    ($($ty:ty),* $(,)?) => {
        $(
            // SAFETY: repr(C) integer-only struct, all bit patterns valid.
            unsafe impl WireStruct for $ty {}
        )*
    };
}

// ============================================================================
// Kernel Structures
// ============================================================================

/// ioctl envelope (32 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct StarsIoctlCmdArgs {
    /// Host address of the request.
    pub input_ptr: u64,
    /// Request size in bytes.
    pub input_len: u32,
    /// Reserved.
    pub rsv0: u32,
    /// Host address of the response buffer.
    pub output_ptr: u64,
    /// Response buffer size in bytes.
    pub output_len: u32,
    /// Reserved.
    pub rsv1: u32,
}

/// Bind one source queue to up to 128 destinations.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct QueueBindParam {
    /// Valid entries in the trailing array.
    pub count: u32,
    /// Source queue.
    pub src_qid: u32,
    /// Destination queues; `count` are valid.
    pub dst_qids: [u32; QUEUE_BIND_MAX],
}

/// Per-destination bind status; zero is success.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct QueueBindResult {
    /// Status per destination.
    pub results: [i32; QUEUE_BIND_MAX],
}

/// Selector for [`QueueUnbindParam::unbind_type`].
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnbindType {
    /// Every binding of the source.
    BySrc = 0,
    /// Every binding of the listed destinations.
    ByDst = 1,
    /// Only the listed source to destination bindings.
    ByBoth = 2,
}

/// Remove bindings selected by [`UnbindType`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct QueueUnbindParam {
    /// Raw [`UnbindType`].
    pub unbind_type: u32,
    /// Source queue.
    pub src_qid: u32,
    /// Valid entries in the trailing array.
    pub count: u32,
    /// Reserved.
    pub rsv: u32,
    /// Destination queues; `count` are valid.
    pub dst_qids: [u32; QUEUE_BIND_MAX],
}

/// Ask for the destinations of one source queue.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueQueryParam {
    /// Source queue.
    pub src_qid: u32,
    /// Reserved.
    pub rsv: u32,
}

/// Destinations bound to the queried source.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct QueueQueryResult {
    /// Valid entries in the trailing array.
    pub count: u32,
    /// Reserved.
    pub rsv: u32,
    /// Destination queues; `count` are valid.
    pub dst_qids: [u32; QUEUE_BIND_MAX],
}

/// One source to destination binding.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueBindPair {
    /// Source queue.
    pub src_qid: u32,
    /// Destination queue.
    pub dst_qid: u32,
}

/// Every binding known to the node.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct QueueAllQueryResult {
    /// Valid entries in the trailing array.
    pub count: u32,
    /// Reserved.
    pub rsv: u32,
    /// Bindings; `count` are valid.
    pub pairs: [QueueBindPair; QUEUE_BIND_MAX],
}

/// Mbuf pool bound to one queue (56 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MbufPoolBindItem {
    /// Queue the item applies to.
    pub queue_id: u32,
    /// Mbuf pool.
    pub pool_id: u32,
    /// Head block size.
    pub head_block_size: u32,
    /// Data block size.
    pub data_block_size: u32,
    /// Head offset inside a head block.
    pub head_offset: u32,
    /// Payload offset inside a data block.
    pub data_offset: u32,
    /// Head pool base.
    pub head_base_addr: u64,
    /// Data pool base.
    pub data_base_addr: u64,
    /// Alloc register.
    pub alloc_addr: u64,
    /// Free register.
    pub free_addr: u64,
}

/// Bind request and query response share this shape.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MbufPoolList {
    /// Valid entries in the trailing array.
    pub count: u32,
    /// Reserved.
    pub rsv: u32,
    /// Items; `count` are valid.
    pub items: [MbufPoolBindItem; DQS_MAX_QUEUE_NUM],
}

/// Unbind and query requests share this shape.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueIdList {
    /// Valid entries in the trailing array.
    pub count: u32,
    /// Reserved.
    pub rsv: u32,
    /// Queues; `count` are valid.
    pub queue_ids: [u32; DQS_MAX_QUEUE_NUM],
}

/// Frame-alignment setting of one input queue.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameAlignItem {
    /// Queue the item applies to.
    pub queue_id: u32,
    /// Alignment mode.
    pub mode: u8,
    /// Timeout handling.
    pub timeout_mode: u8,
    /// Reserved.
    pub rsv0: u16,
    /// Timeout threshold.
    pub timeout_threshold: u32,
    /// Reserved.
    pub rsv1: u32,
    /// Substitute address for a timed-out frame.
    pub default_input_addr: u64,
}

/// Frame-alignment bind request for one stream.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameAlignParam {
    /// Target stream.
    pub stream_id: u32,
    /// Task scheduler of the stream.
    pub ts_id: u32,
    /// Valid entries in the trailing array.
    pub count: u32,
    /// Reserved.
    pub rsv: u32,
    /// Items; `count` are valid.
    pub items: [FrameAlignItem; DQS_MAX_QUEUE_NUM],
}

/// Per-item frame-align bind status; zero is success.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameAlignResult {
    /// Status per item.
    pub results: [i32; DQS_MAX_QUEUE_NUM],
}

/// Stream addressed by frame-align unbind/update and inter-chip query.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamRef {
    /// Target stream.
    pub stream_id: u32,
    /// Task scheduler of the stream.
    pub ts_id: u32,
}

/// Accelerator queue and the notify it raises.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccNotifyPair {
    /// Accelerator queue.
    pub queue_id: u16,
    /// Notify raised by the queue.
    pub notify_id: u16,
}

/// `op_type` value creating a subscription.
pub const ACC_SUBSCRIBE_CREATE: u32 = 0;
/// `op_type` value removing a subscription.
pub const ACC_SUBSCRIBE_DESTROY: u32 = 1;

/// Create or remove accelerator subscriptions of a stream.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccSubscribeParam {
    /// [`ACC_SUBSCRIBE_CREATE`] or [`ACC_SUBSCRIBE_DESTROY`].
    pub op_type: u32,
    /// Task scheduler of the stream.
    pub ts_id: u32,
    /// Target stream.
    pub stream_id: u32,
    /// Valid entries in the trailing array.
    pub count: u32,
    /// Pairs to subscribe; `count` are valid.
    pub notify_list: [AccNotifyPair; DQS_MAX_QUEUE_NUM],
}

/// Bit 0 of [`CtrlSpaceParam::op_type`]: set to destroy.
pub const CTRL_SPACE_OP_DESTROY: u32 = 1;

/// Create or destroy the Control Space of a stream.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CtrlSpaceParam {
    /// Target stream.
    pub stream_id: u32,
    /// Task scheduler of the stream.
    pub ts_id: u32,
    /// See [`CTRL_SPACE_OP_DESTROY`].
    pub op_type: u32,
    /// Reserved.
    pub rsv: u32,
}

/// Kernel answer to [`CtrlSpaceParam`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CtrlSpaceResult {
    /// Kernel status; zero is success.
    pub status: u32,
    /// Reserved.
    pub reserved: u32,
    /// Mapped address of the space.
    pub ctrl_space_va: u64,
}

/// Kernel answer to an inter-chip space query.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct InterChipQueryResult {
    /// Mapped address of the space.
    pub inter_chip_space_va: u64,
}

wire_structs!(
    StarsIoctlCmdArgs,
    QueueBindParam,
    QueueBindResult,
    QueueUnbindParam,
    QueueQueryParam,
    QueueQueryResult,
    QueueAllQueryResult,
    MbufPoolList,
    QueueIdList,
    FrameAlignParam,
    FrameAlignResult,
    StreamRef,
    AccSubscribeParam,
    CtrlSpaceParam,
    CtrlSpaceResult,
    InterChipQueryResult,
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, offset_of};

    #[test]
    fn test_envelope_layout() {
        assert_eq!(size_of::<StarsIoctlCmdArgs>(), 32);
        assert_eq!(offset_of!(StarsIoctlCmdArgs, input_len), 8);
        assert_eq!(offset_of!(StarsIoctlCmdArgs, output_ptr), 16);
        assert_eq!(offset_of!(StarsIoctlCmdArgs, output_len), 24);
    }

    #[test]
    fn test_queue_struct_sizes() {
        assert_eq!(size_of::<QueueBindParam>(), 8 + 4 * QUEUE_BIND_MAX);
        assert_eq!(size_of::<QueueBindResult>(), 4 * QUEUE_BIND_MAX);
        assert_eq!(size_of::<QueueUnbindParam>(), 16 + 4 * QUEUE_BIND_MAX);
        assert_eq!(size_of::<QueueAllQueryResult>(), 8 + 8 * QUEUE_BIND_MAX);
    }

    #[test]
    fn test_pool_struct_layout() {
        assert_eq!(size_of::<MbufPoolBindItem>(), 56);
        assert_eq!(offset_of!(MbufPoolBindItem, head_base_addr), 24);
        assert_eq!(size_of::<MbufPoolList>(), 8 + 56 * DQS_MAX_QUEUE_NUM);
        assert_eq!(size_of::<QueueIdList>(), 48);
    }

    #[test]
    fn test_frame_align_layout() {
        assert_eq!(size_of::<FrameAlignItem>(), 24);
        assert_eq!(offset_of!(FrameAlignItem, default_input_addr), 16);
        assert_eq!(size_of::<FrameAlignParam>(), 16 + 24 * DQS_MAX_QUEUE_NUM);
    }

    #[test]
    fn test_subscribe_and_space_layout() {
        assert_eq!(size_of::<AccNotifyPair>(), 4);
        assert_eq!(size_of::<AccSubscribeParam>(), 56);
        assert_eq!(size_of::<CtrlSpaceParam>(), 16);
        assert_eq!(size_of::<CtrlSpaceResult>(), 16);
        assert_eq!(offset_of!(CtrlSpaceResult, ctrl_space_va), 8);
        assert_eq!(align_of::<CtrlSpaceResult>(), 8);
        assert_eq!(size_of::<InterChipQueryResult>(), 8);
    }

    #[test]
    fn test_request_encoding() {
        let req = StarsCmd::QueueBind.request();
        assert_eq!(req >> 30, 3, "read/write direction");
        assert_eq!((req >> 16) & 0x3FFF, 32, "envelope size");
        assert_eq!((req >> 8) & 0xFF, u32::from(b'S'));
        assert_eq!(req & 0xFF, 0x01);
    }

    #[test]
    fn test_request_roundtrip_is_unique() {
        for cmd in StarsCmd::ALL {
            assert_eq!(StarsCmd::from_request(cmd.request()), Some(cmd));
        }
        assert_eq!(StarsCmd::from_request(0xDEAD_BEEF), None);
    }

    #[test]
    fn test_zeroed_wire_struct() {
        let p = QueueBindParam::zeroed();
        assert_eq!(p.count, 0);
        assert!(p.dst_qids.iter().all(|&q| q == 0));
    }
}
