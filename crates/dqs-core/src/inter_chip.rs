//! Per-stream Inter-Chip Space and field addressing inside one group.

use std::mem::{offset_of, size_of};
use std::ptr::NonNull;

use tracing::info;

use crate::error::{DqsError, Result};
use crate::kernel::layout::{StarsDqsInterChipGroup, StarsDqsInterChipSpace, StarsSdmaPtrDescriptor};
use crate::kernel::sys::{InterChipQueryResult, StreamRef};
use crate::kernel::{KernelChannel, StarsCmd, DQS_INTER_CHIP_GROUP_MAX};

/// Which pre-built copy descriptor of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemcpyPart {
    /// Mbuf head metadata.
    Head,
    /// Mbuf data payload.
    Data,
}

/// Window onto a kernel-mapped Inter-Chip Space.
#[derive(Debug)]
pub struct InterChipSpaceView {
    ptr: NonNull<StarsDqsInterChipSpace>,
}

// SAFETY: see `ControlSpaceView`; same ownership rules.
unsafe impl Send for InterChipSpaceView {}

impl InterChipSpaceView {
    /// # Safety
    ///
    /// `va` must point to a live `StarsDqsInterChipSpace` that outlives the
    /// view.
    pub unsafe fn from_va(va: u64) -> Option<Self> {
        NonNull::new(va as *mut StarsDqsInterChipSpace).map(|ptr| Self { ptr })
    }

    /// Host address of the mapped space.
    pub fn base(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    /// Field addresses of group `idx`.
    pub fn group(&self, idx: usize) -> Result<InterChipGroupAddrs> {
        if idx >= DQS_INTER_CHIP_GROUP_MAX {
            return Err(DqsError::invalid(format!(
                "inter-chip group {idx} out of range (max {DQS_INTER_CHIP_GROUP_MAX})"
            )));
        }
        Ok(InterChipGroupAddrs {
            base: self.base() + (idx * size_of::<StarsDqsInterChipGroup>()) as u64,
        })
    }

    /// Copy of group `idx`.
    pub fn read_group(&self, idx: usize) -> Option<StarsDqsInterChipGroup> {
        if idx >= DQS_INTER_CHIP_GROUP_MAX {
            return None;
        }
        // SAFETY: live per `from_va`, idx in bounds; the device may write concurrently.
        Some(unsafe { std::ptr::addr_of!((*self.ptr.as_ptr())[idx]).read_volatile() })
    }
}

/// Device addresses of the fields of one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterChipGroupAddrs {
    base: u64,
}

macro_rules! group_field {
    ($($name:ident),* $(,)?) => {
        $(
            #[doc = concat!("Device address of `", stringify!($name), "`.")]
            pub fn $name(&self) -> u64 {
                self.base + offset_of!(StarsDqsInterChipGroup, $name) as u64
            }
        )*
    };
}

impl InterChipGroupAddrs {
    /// Device address of the group itself.
    pub fn base(&self) -> u64 {
        self.base
    }

    group_field! {
        src_mbuf_handle,
        dst_mbuf_handle,
        dst_head_block_size,
        dst_data_block_size,
        dst_head_base_addr,
        dst_data_base_addr,
        src_mbuf_free_addr,
        dst_mbuf_alloc_addr,
        dst_mbuf_free_addr,
        dst_qmngr_enqueue_addr,
        dst_qmngr_ow_addr,
    }

    /// Start of the pre-built copy descriptor for `part`.
    pub fn descriptor(&self, part: MemcpyPart) -> u64 {
        self.base
            + match part {
                MemcpyPart::Head => offset_of!(StarsDqsInterChipGroup, mbuf_head_memcpy_sqe),
                MemcpyPart::Data => offset_of!(StarsDqsInterChipGroup, mbuf_data_memcpy_sqe),
            } as u64
    }

    /// `dst_addr` field of the descriptor for `part`.
    pub fn descriptor_dst(&self, part: MemcpyPart) -> u64 {
        self.descriptor(part) + offset_of!(StarsSdmaPtrDescriptor, dst_addr) as u64
    }
}

/// Obtains a stream's Inter-Chip Space from the kernel.
pub struct InterChipSpaceManager<'a> {
    channel: &'a KernelChannel,
}

impl<'a> InterChipSpaceManager<'a> {
    /// Manager issuing its queries on `channel`.
    pub fn new(channel: &'a KernelChannel) -> Self {
        Self { channel }
    }

    /// Query the space of `stream` and map it.
    pub fn create(&self, stream: StreamRef) -> Result<InterChipSpaceView> {
        let mut result = InterChipQueryResult::default();
        self.channel.issue(StarsCmd::InterChipSpaceQuery, &stream, &mut result)?;
        // SAFETY: the kernel keeps the space mapped for the stream's lifetime.
        let view = unsafe { InterChipSpaceView::from_va(result.inter_chip_space_va) }.ok_or_else(|| {
            DqsError::MalformedResponse {
                cmd: StarsCmd::InterChipSpaceQuery.name(),
                detail: "null inter-chip space".to_string(),
            }
        })?;
        info!(stream_id = stream.stream_id, va = format_args!("{:#x}", view.base()), "inter-chip space created");
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimPlatform;

    #[test]
    fn test_create_and_group_addresses() {
        let platform = SimPlatform::new();
        let mgr = InterChipSpaceManager::new(&platform.context.channel);
        let view = mgr.create(StreamRef { stream_id: 2, ts_id: 0 }).unwrap();
        let g0 = view.group(0).unwrap();
        let g3 = view.group(3).unwrap();
        assert_eq!(g0.base(), view.base());
        assert_eq!(g3.base() - g0.base(), 3 * 256);
        assert_eq!(g3.src_mbuf_handle(), g3.base());
        assert_eq!(g3.dst_qmngr_ow_addr(), g3.base() + 120);
        assert_eq!(g3.descriptor(MemcpyPart::Head), g3.base() + 128);
        assert_eq!(g3.descriptor_dst(MemcpyPart::Data), g3.base() + 192 + 32);
    }

    #[test]
    fn test_group_out_of_range() {
        let platform = SimPlatform::new();
        let view = InterChipSpaceManager::new(&platform.context.channel)
            .create(StreamRef::default())
            .unwrap();
        assert!(view.group(DQS_INTER_CHIP_GROUP_MAX).is_err());
        assert!(view.read_group(DQS_INTER_CHIP_GROUP_MAX).is_none());
        assert_eq!(view.read_group(0), Some(StarsDqsInterChipGroup::default()));
    }

    #[test]
    fn test_null_space_is_driver_io() {
        let platform = SimPlatform::new();
        platform.kernel.set_null_spaces(true);
        let err = InterChipSpaceManager::new(&platform.context.channel)
            .create(StreamRef::default())
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::DriverIo);
    }
}
