//! Device driver seam: memory, copies, queue and pool lookups, notifies.

use serde::Serialize;

use crate::error::{DqsError, Result};

/// Kind of entity backing a hardware queue.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueueEntityType {
    /// Software-managed queue.
    Soft = 0,
    /// Queue manager; supports enqueue with overwrite detection.
    Qmngr = 1,
    /// Global queue manager; supports hardware pop.
    Gqm = 2,
}

impl QueueEntityType {
    /// Decode the driver's raw type value.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Soft),
            1 => Some(Self::Qmngr),
            2 => Some(Self::Gqm),
            _ => None,
        }
    }
}

/// Register addresses of one hardware queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DqsQueueInfo {
    /// Queue id as known to the driver.
    pub queue_id: u32,
    /// Raw entity type, see [`QueueEntityType`].
    pub que_type: u32,
    /// Enqueue register.
    pub enqueue_op_addr: u64,
    /// Dequeue register.
    pub dequeue_op_addr: u64,
    /// Producer overwrite register.
    pub prodq_ow_addr: u64,
    /// Producer status register.
    pub prodq_stat_addr: u64,
}

impl DqsQueueInfo {
    /// Fail unless the queue is backed by `expected`.
    pub fn require_type(&self, expected: QueueEntityType) -> Result<()> {
        if self.que_type == expected as u32 {
            Ok(())
        } else {
            Err(DqsError::QueueTypeMismatch {
                queue_id: self.queue_id,
                actual: self.que_type,
                expected: expected as u32,
            })
        }
    }
}

/// Mbuf pool descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DqsPoolInfo {
    /// Pool id; only the low bits are significant.
    pub pool_id: u32,
    /// Data pool base.
    pub data_pool_base_addr: u64,
    /// Data block size.
    pub data_pool_blk_size: u32,
    /// Data object size.
    pub data_pool_obj_size: u32,
    /// Offset of the payload inside a data block.
    pub data_pool_offset: u32,
    /// Head pool base.
    pub head_pool_base_addr: u64,
    /// Head block size.
    pub head_pool_blk_size: u32,
    /// Head object size.
    pub head_pool_obj_size: u32,
    /// Offset of the head inside a head block.
    pub head_pool_offset: u32,
    /// Mbuf alloc register.
    pub alloc_op_addr: u64,
    /// Mbuf free register.
    pub free_op_addr: u64,
    /// Mbuf copy-ref register.
    pub copy_ref_op_addr: u64,
}

/// Direction of a synchronous copy into device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemcpyKind {
    /// Source is host memory.
    HostToDevice,
    /// Source is device-visible memory (SVM).
    DeviceToDevice,
}

/// Notify object flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyKind {
    /// Single-shot event.
    Notify,
    /// Counter compared against a threshold.
    CountNotify,
}

/// Driver calls the task layer depends on.
pub trait DeviceDriver: Send + Sync {
    /// Logical device id.
    fn device_id(&self) -> u32;

    /// Task scheduler id.
    fn ts_id(&self) -> u32;

    /// Allocate device memory; the returned address is not necessarily aligned.
    fn mem_alloc(&self, size: u64) -> Result<u64>;

    /// Release memory obtained from [`DeviceDriver::mem_alloc`].
    fn mem_free(&self, addr: u64) -> Result<()>;

    /// Synchronous copy of `src` to device address `dst`.
    fn copy_to_device(&self, dst: u64, src: &[u8], kind: MemcpyKind) -> Result<()>;

    /// Synchronous read of `dst.len()` bytes from device address `src`.
    fn copy_from_device(&self, dst: &mut [u8], src: u64) -> Result<()>;

    /// Register addresses and entity type of a queue.
    fn queue_info(&self, queue_id: u32) -> Result<DqsQueueInfo>;

    /// Descriptor of an mbuf pool.
    fn mbuf_pool_info(&self, pool_id: u32) -> Result<DqsPoolInfo>;

    /// Physical chip id of this device.
    fn chip_id(&self) -> Result<u32>;

    /// Create a notify object and return its id.
    fn notify_create(&self, kind: NotifyKind) -> Result<u32>;

    /// Destroy a notify object.
    fn notify_destroy(&self, kind: NotifyKind, id: u32) -> Result<()>;
}

/// Write little-endian words to device memory.
pub fn write_words(
    driver: &dyn DeviceDriver,
    dst: u64,
    words: &[u32],
    kind: MemcpyKind,
) -> Result<()> {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    driver.copy_to_device(dst, &bytes, kind)
}

/// Write little-endian 64-bit values to device memory.
pub fn write_u64s(
    driver: &dyn DeviceDriver,
    dst: u64,
    values: &[u64],
    kind: MemcpyKind,
) -> Result<()> {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    driver.copy_to_device(dst, &bytes, kind)
}

/// Read `count` little-endian words from device memory.
pub fn read_words(driver: &dyn DeviceDriver, src: u64, count: usize) -> Result<Vec<u32>> {
    let mut bytes = vec![0u8; count * 4];
    driver.copy_from_device(&mut bytes, src)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_decode() {
        assert_eq!(QueueEntityType::from_raw(1), Some(QueueEntityType::Qmngr));
        assert_eq!(QueueEntityType::from_raw(2), Some(QueueEntityType::Gqm));
        assert_eq!(QueueEntityType::from_raw(9), None);
    }

    #[test]
    fn test_require_type() {
        let info = DqsQueueInfo {
            queue_id: 513,
            que_type: QueueEntityType::Gqm as u32,
            ..Default::default()
        };
        assert!(info.require_type(QueueEntityType::Gqm).is_ok());
        let err = info.require_type(QueueEntityType::Qmngr).unwrap_err();
        assert!(matches!(
            err,
            DqsError::QueueTypeMismatch { queue_id: 513, actual: 2, expected: 1 }
        ));
    }
}
