//! Queue, mbuf-pool, frame-align and subscription control calls.

use tracing::{debug, warn};

use crate::driver::{DeviceDriver, DqsQueueInfo, QueueEntityType};
use crate::error::{DqsError, Result};
use crate::kernel::sys::{
    AccNotifyPair, AccSubscribeParam, FrameAlignItem, FrameAlignParam, FrameAlignResult,
    MbufPoolBindItem, MbufPoolList, QueueAllQueryResult, QueueBindPair, QueueBindParam,
    QueueBindResult, QueueIdList, QueueQueryParam, QueueQueryResult, QueueUnbindParam, StreamRef,
    UnbindType, ACC_SUBSCRIBE_CREATE, ACC_SUBSCRIBE_DESTROY,
};
use crate::kernel::{KernelChannel, StarsCmd, WireStruct, DQS_MAX_QUEUE_NUM, QUEUE_BIND_MAX};

/// Thin wrapper over the control channel and the driver's queue lookups.
pub struct QueueBindingService<'a> {
    channel: &'a KernelChannel,
    driver: &'a dyn DeviceDriver,
}

fn check_count(what: &str, count: usize, max: usize) -> Result<u32> {
    if count == 0 || count > max {
        return Err(DqsError::invalid(format!("{what} count {count} not in 1..={max}")));
    }
    Ok(count as u32)
}

impl<'a> QueueBindingService<'a> {
    /// Service issuing commands on `channel` and resolving queues through `driver`.
    pub fn new(channel: &'a KernelChannel, driver: &'a dyn DeviceDriver) -> Self {
        Self { channel, driver }
    }

    /// Bind `src` to every queue in `dsts`; returns the per-destination status.
    pub fn bind(&self, src: u32, dsts: &[u32]) -> Result<Vec<i32>> {
        let count = check_count("queue bind", dsts.len(), QUEUE_BIND_MAX)?;
        let mut param = QueueBindParam::zeroed();
        param.count = count;
        param.src_qid = src;
        param.dst_qids[..dsts.len()].copy_from_slice(dsts);
        let mut result = QueueBindResult::zeroed();
        self.channel.issue(StarsCmd::QueueBind, &param, &mut result)?;
        let results = result.results[..dsts.len()].to_vec();
        for (dst, code) in dsts.iter().zip(&results).filter(|(_, c)| **c != 0) {
            warn!(src, dst, code, "queue bind rejected");
        }
        Ok(results)
    }

    /// Undo a [`bind`](Self::bind) of `dsts` to `src`.
    ///
    /// At most [`QUEUE_BIND_MAX`] destinations per call.
    pub fn unbind(&self, unbind_type: UnbindType, src: u32, dsts: &[u32]) -> Result<()> {
        if dsts.len() > QUEUE_BIND_MAX {
            return Err(DqsError::invalid(format!(
                "queue unbind count {} exceeds {QUEUE_BIND_MAX}",
                dsts.len()
            )));
        }
        let mut param = QueueUnbindParam::zeroed();
        param.unbind_type = unbind_type as u32;
        param.src_qid = src;
        param.count = dsts.len() as u32;
        param.dst_qids[..dsts.len()].copy_from_slice(dsts);
        self.channel.issue(StarsCmd::QueueUnbind, &param, &mut ())?;
        Ok(())
    }

    /// Destinations bound to `src`.
    pub fn query(&self, src: u32) -> Result<Vec<u32>> {
        let mut result = QueueQueryResult::zeroed();
        self.channel.issue(
            StarsCmd::QueueQuery,
            &QueueQueryParam { src_qid: src, rsv: 0 },
            &mut result,
        )?;
        let count = result.count as usize;
        if count > QUEUE_BIND_MAX {
            return Err(DqsError::MalformedResponse {
                cmd: StarsCmd::QueueQuery.name(),
                detail: format!("count {count} exceeds {QUEUE_BIND_MAX}"),
            });
        }
        Ok(result.dst_qids[..count].to_vec())
    }

    /// Every binding known to the kernel.
    pub fn query_all(&self) -> Result<Vec<QueueBindPair>> {
        let mut result = QueueAllQueryResult::zeroed();
        self.channel.issue(StarsCmd::QueueAllQuery, &(), &mut result)?;
        let count = result.count as usize;
        if count > QUEUE_BIND_MAX {
            return Err(DqsError::MalformedResponse {
                cmd: StarsCmd::QueueAllQuery.name(),
                detail: format!("count {count} exceeds {QUEUE_BIND_MAX}"),
            });
        }
        Ok(result.pairs[..count].to_vec())
    }

    /// Bind each output queue to the mbuf pool it allocates from.
    pub fn bind_mbuf_pools(&self, items: &[MbufPoolBindItem]) -> Result<()> {
        let count = check_count("mbuf pool bind", items.len(), DQS_MAX_QUEUE_NUM)?;
        let mut param = MbufPoolList {
            count,
            ..Default::default()
        };
        param.items[..items.len()].copy_from_slice(items);
        self.channel.issue(StarsCmd::MbufPoolBind, &param, &mut ())?;
        Ok(())
    }

    /// Release the pool bindings of `queue_ids`.
    pub fn unbind_mbuf_pools(&self, queue_ids: &[u32]) -> Result<()> {
        let param = queue_id_list("mbuf pool unbind", queue_ids)?;
        self.channel.issue(StarsCmd::MbufPoolUnbind, &param, &mut ())?;
        Ok(())
    }

    /// Pool descriptors of `queue_ids`, in request order.
    pub fn lookup_mbuf_pool_info(&self, queue_ids: &[u32]) -> Result<Vec<MbufPoolBindItem>> {
        let param = queue_id_list("mbuf pool query", queue_ids)?;
        let mut result = MbufPoolList::default();
        self.channel.issue(StarsCmd::MbufPoolQuery, &param, &mut result)?;
        let returned = result.count as usize;
        if returned == 0 || returned > queue_ids.len() {
            return Err(DqsError::MalformedResponse {
                cmd: StarsCmd::MbufPoolQuery.name(),
                detail: format!("{returned} descriptors for {} queues", queue_ids.len()),
            });
        }
        queue_ids
            .iter()
            .map(|qid| {
                result.items[..returned]
                    .iter()
                    .find(|item| item.queue_id == *qid)
                    .copied()
                    .ok_or_else(|| DqsError::MalformedResponse {
                        cmd: StarsCmd::MbufPoolQuery.name(),
                        detail: format!("no pool descriptor for queue {qid}"),
                    })
            })
            .collect()
    }

    /// Register frame alignment for `stream`; returns the per-item kernel status.
    pub fn bind_frame_align(&self, stream: StreamRef, items: &[FrameAlignItem]) -> Result<Vec<i32>> {
        let count = check_count("frame align bind", items.len(), DQS_MAX_QUEUE_NUM)?;
        let mut param = FrameAlignParam {
            stream_id: stream.stream_id,
            ts_id: stream.ts_id,
            count,
            ..Default::default()
        };
        param.items[..items.len()].copy_from_slice(items);
        let mut result = FrameAlignResult::default();
        self.channel.issue(StarsCmd::FrameAlignBind, &param, &mut result)?;
        Ok(result.results[..items.len()].to_vec())
    }

    /// Drop every frame-align binding of `stream`.
    pub fn unbind_frame_align(&self, stream: StreamRef) -> Result<()> {
        self.channel.issue(StarsCmd::FrameAlignUnbind, &stream, &mut ())?;
        Ok(())
    }

    /// Tell the kernel the input-queue list of `stream` changed.
    ///
    /// Frame alignment only applies to fan-in, so one input is a no-op.
    pub fn update_frame_align_info(&self, stream: StreamRef, input_queue_num: u8) -> Result<()> {
        if input_queue_num <= 1 {
            return Ok(());
        }
        self.channel.issue(StarsCmd::FrameAlignUpdate, &stream, &mut ())?;
        debug!(stream_id = stream.stream_id, input_queue_num, "frame align info updated");
        Ok(())
    }

    /// Make hardware bump `notify_id` whenever one of `queue_ids` is enqueued.
    ///
    /// A plain notify only tracks the first queue.
    pub fn subscribe_acc(
        &self,
        stream: StreamRef,
        notify_id: u32,
        queue_ids: &[u16],
        use_count_notify: bool,
    ) -> Result<AccSubscribeParam> {
        check_count("acc subscribe", queue_ids.len(), DQS_MAX_QUEUE_NUM)?;
        let notify_id = u16::try_from(notify_id)
            .map_err(|_| DqsError::invalid(format!("notify id {notify_id} exceeds 16 bits")))?;
        let subscribed = if use_count_notify { queue_ids } else { &queue_ids[..1] };
        let mut param = AccSubscribeParam {
            op_type: ACC_SUBSCRIBE_CREATE,
            ts_id: stream.ts_id,
            stream_id: stream.stream_id,
            count: subscribed.len() as u32,
            ..Default::default()
        };
        for (pair, &queue_id) in param.notify_list.iter_mut().zip(subscribed) {
            *pair = AccNotifyPair { queue_id, notify_id };
        }
        self.channel.issue(StarsCmd::AccSubscribe, &param, &mut ())?;
        debug!(stream_id = stream.stream_id, notify_id, count = param.count, "acc queues subscribed");
        Ok(param)
    }

    /// Cancel a subscription made by [`subscribe_acc`](Self::subscribe_acc).
    pub fn unsubscribe_acc(&self, subscription: &AccSubscribeParam) -> Result<()> {
        let param = AccSubscribeParam {
            op_type: ACC_SUBSCRIBE_DESTROY,
            ..*subscription
        };
        self.channel.issue(StarsCmd::AccSubscribe, &param, &mut ())?;
        Ok(())
    }

    /// Resolve `queue_id` and require it to be backed by `expected`.
    pub fn lookup_queue_info(&self, queue_id: u32, expected: QueueEntityType) -> Result<DqsQueueInfo> {
        let info = self.driver.queue_info(queue_id)?;
        info.require_type(expected).inspect_err(|e| {
            warn!(queue_id, device_id = self.driver.device_id(), error = %e, "queue type mismatch");
        })?;
        Ok(info)
    }
}

fn queue_id_list(what: &str, queue_ids: &[u32]) -> Result<QueueIdList> {
    let count = check_count(what, queue_ids.len(), DQS_MAX_QUEUE_NUM)?;
    let mut list = QueueIdList {
        count,
        ..Default::default()
    };
    list.queue_ids[..queue_ids.len()].copy_from_slice(queue_ids);
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimPlatform;

    fn stream_ref() -> StreamRef {
        StreamRef {
            stream_id: 3,
            ts_id: 0,
        }
    }

    #[test]
    fn test_bind_and_query() {
        let platform = SimPlatform::new();
        let svc = platform.queue_service();
        let results = svc.bind(1, &[2, 3]).unwrap();
        assert_eq!(results, vec![0, 0]);
        assert_eq!(svc.query(1).unwrap(), vec![2, 3]);
        let all = svc.query_all().unwrap();
        assert_eq!(all.len(), 2);
        svc.unbind(UnbindType::ByDst, 1, &[2]).unwrap();
        assert_eq!(svc.query(1).unwrap(), vec![3]);
        svc.unbind(UnbindType::BySrc, 1, &[]).unwrap();
        assert!(svc.query(1).unwrap().is_empty());
    }

    #[test]
    fn test_bind_rejects_bad_counts() {
        let platform = SimPlatform::new();
        let svc = platform.queue_service();
        assert!(svc.bind(1, &[]).is_err());
        let too_many: Vec<u32> = (0..129).collect();
        assert!(svc.bind(1, &too_many).is_err());
        assert!(platform.kernel.commands().is_empty());
    }

    #[test]
    fn test_lookup_mbuf_pool_info_orders_results() {
        let platform = SimPlatform::new();
        platform.add_output_queue(0, 7);
        platform.add_output_queue(1, 8);
        let svc = platform.queue_service();
        let pools = svc.lookup_mbuf_pool_info(&[1, 0]).unwrap();
        assert_eq!(pools[0].pool_id, 8);
        assert_eq!(pools[1].pool_id, 7);
    }

    #[test]
    fn test_lookup_mbuf_pool_info_missing_pool() {
        let platform = SimPlatform::new();
        platform.add_output_queue(0, 7);
        let svc = platform.queue_service();
        let err = svc.lookup_mbuf_pool_info(&[0, 5]).unwrap_err();
        assert!(matches!(err, DqsError::MalformedResponse { .. }));
        let err = svc.lookup_mbuf_pool_info(&[5]).unwrap_err();
        assert!(err.to_string().contains("0 descriptors"));
    }

    #[test]
    fn test_update_frame_align_skips_single_input() {
        let platform = SimPlatform::new();
        let svc = platform.queue_service();
        svc.update_frame_align_info(stream_ref(), 1).unwrap();
        assert_eq!(platform.kernel.count_of(StarsCmd::FrameAlignUpdate), 0);
        svc.update_frame_align_info(stream_ref(), 2).unwrap();
        assert_eq!(platform.kernel.count_of(StarsCmd::FrameAlignUpdate), 1);
    }

    #[test]
    fn test_frame_align_bind_unbind() {
        let platform = SimPlatform::new();
        let svc = platform.queue_service();
        let item = FrameAlignItem {
            queue_id: 513,
            mode: 1,
            timeout_threshold: 100,
            ..Default::default()
        };
        assert_eq!(svc.bind_frame_align(stream_ref(), &[item]).unwrap(), vec![0]);
        svc.unbind_frame_align(stream_ref()).unwrap();
    }

    #[test]
    fn test_subscribe_plain_notify_uses_first_queue() {
        let platform = SimPlatform::new();
        let svc = platform.queue_service();
        let sub = svc.subscribe_acc(stream_ref(), 9, &[513, 514], false).unwrap();
        assert_eq!(sub.count, 1);
        assert_eq!(sub.notify_list[0], AccNotifyPair { queue_id: 513, notify_id: 9 });

        let sub = svc.subscribe_acc(stream_ref(), 9, &[513, 514], true).unwrap();
        assert_eq!(sub.count, 2);
        assert_eq!(sub.notify_list[1].queue_id, 514);

        svc.unsubscribe_acc(&sub).unwrap();
        let last = platform.kernel.last_subscription().unwrap();
        assert_eq!(last.op_type, ACC_SUBSCRIBE_DESTROY);
    }

    #[test]
    fn test_lookup_queue_info_type_check() {
        let platform = SimPlatform::new();
        platform.add_input_queue(513);
        let svc = platform.queue_service();
        assert!(svc.lookup_queue_info(513, QueueEntityType::Gqm).is_ok());
        let err = svc.lookup_queue_info(513, QueueEntityType::Qmngr).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidValue);
    }

    #[test]
    fn test_pool_bind_unbind() {
        let platform = SimPlatform::new();
        let svc = platform.queue_service();
        let item = MbufPoolBindItem {
            queue_id: 4,
            pool_id: 11,
            ..Default::default()
        };
        svc.bind_mbuf_pools(&[item]).unwrap();
        assert_eq!(svc.lookup_mbuf_pool_info(&[4]).unwrap()[0].pool_id, 11);
        svc.unbind_mbuf_pools(&[4]).unwrap();
        assert!(svc.lookup_mbuf_pool_info(&[4]).is_err());
    }
}
