//! End-to-end task scenarios against the simulated kernel and device.
//!
//! Run with: cargo test -p dqs-core --test dqs_scenarios

use dqs_core::driver::{DeviceDriver, NotifyKind};
use dqs_core::isa::{disassemble, Opcode};
use dqs_core::kernel::{StarsCmd, DQS_INTER_CHIP_GROUP_MAX};
use dqs_core::notify::CountNotifyRegs;
use dqs_core::sim::{SimPlatform, SimRing};
use dqs_core::sqe::{DqsSubType, Sqe, SqeType};
use dqs_core::task::{AdspcConfig, ConditionCopyConfig, SchedConfig, SchedType, ZeroCopyConfig};
use dqs_core::{DqsTaskRequest, ErrorKind, LaunchOutcome, StreamWithDqs, TaskKind, TaskStatus};
use proptest::prelude::*;
use std::sync::Arc;

/// Platform with GQM inputs 513/514 and QMNGR outputs 0/1 on pools 3/4.
fn platform() -> SimPlatform {
    let platform = SimPlatform::new();
    platform.add_input_queue(513);
    platform.add_input_queue(514);
    platform.add_input_queue(515);
    platform.add_output_queue(0, 3);
    platform.add_output_queue(1, 4);
    platform
}

fn sched(sched_type: SchedType, inputs: &[u16], outputs: &[u16]) -> DqsTaskRequest {
    DqsTaskRequest::SchedConfig(SchedConfig {
        sched_type: sched_type as u32,
        input_queue_ids: inputs.to_vec(),
        output_queue_ids: outputs.to_vec(),
        frame_align: None,
    })
}

fn configured(platform: &SimPlatform, inputs: &[u16], outputs: &[u16]) -> (StreamWithDqs, Arc<SimRing>) {
    let (stream, ring) = platform.stream(1);
    let sched_type = if outputs.is_empty() {
        SchedType::Dss
    } else {
        SchedType::Nn
    };
    assert_eq!(
        stream.launch(sched(sched_type, inputs, outputs)).unwrap(),
        LaunchOutcome::Configured
    );
    (stream, ring)
}

fn submitted(outcome: LaunchOutcome) -> Vec<u32> {
    match outcome {
        LaunchOutcome::Submitted(slots) => slots,
        other => unreachable!("expected submitted slots, got {other:?}"),
    }
}

/// Program words a function-call entry points at.
fn program_of(platform: &SimPlatform, sqe: &Sqe) -> Vec<u32> {
    let call = disassemble(&sqe.body);
    let addr = call[0].imm | call[1].imm;
    let words = call[2].imm | call[3].imm;
    platform
        .device
        .read(addr, words as usize * 4)
        .unwrap()
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn loads_imm(words: &[u32], value: u64) -> bool {
    disassemble(words)
        .iter()
        .any(|d| d.opcode == Some(Opcode::Lwi) && d.func3 == 0 && d.imm == value)
}

fn zero_copy(copy_type: u32, queue_id: u16) -> ZeroCopyConfig {
    ZeroCopyConfig {
        copy_type,
        addr_order: 0,
        queue_id,
        count: 2,
        dest: Some(vec![0x1000, 0x1008]),
        offset: Some(vec![0, 64]),
    }
}

fn adspc(cq_depth: u32) -> AdspcConfig {
    AdspcConfig {
        queue_id: 0,
        mbuf_handle: (9 << 10) | 3,
        cqe_size: 32,
        cq_depth,
        cqe_base_addr: 0xA000,
        cqe_copy_addr: 0xB000,
        cq_head_reg_addr: 0xC000,
        cq_tail_reg_addr: 0xC008,
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_nn_stream_populates_control_space() {
    let platform = platform();
    let (stream, _ring) = configured(&platform, &[513, 514], &[0, 1]);

    let (inputs, outputs, sched_type, pools) = stream
        .with_control_space(|view| {
            (
                view.input_queue_ids().to_vec(),
                view.output_queue_ids().to_vec(),
                view.sched_type(),
                [view.output_mbuf_pool_id(0), view.output_mbuf_pool_id(1)],
            )
        })
        .unwrap();
    assert_eq!(inputs, vec![513, 514]);
    assert_eq!(outputs, vec![0, 1]);
    assert_eq!(sched_type, SchedType::Nn as u8);
    assert_eq!(pools, [Some(3), Some(4)]);
    assert_eq!(platform.kernel.count_of(StarsCmd::CtrlSpace), 1);
    assert_eq!(platform.kernel.count_of(StarsCmd::FrameAlignUpdate), 1);
}

#[test]
fn test_reconfigure_rewrites_queue_lists() {
    let platform = platform();
    let (stream, _ring) = configured(&platform, &[513, 514], &[0, 1]);
    stream.launch(sched(SchedType::Vpc, &[515], &[1])).unwrap();

    let (inputs, outputs) = stream
        .with_control_space(|view| (view.input_queue_ids().to_vec(), view.output_queue_ids().to_vec()))
        .unwrap();
    assert_eq!(inputs, vec![515]);
    assert_eq!(outputs, vec![1]);
    assert_eq!(platform.kernel.live_ctrl_spaces(), 1);
}

#[test]
fn test_failed_reconfigure_keeps_control_space() {
    let platform = platform();
    let (stream, _ring) = configured(&platform, &[513, 514], &[0]);
    let before = stream.with_control_space(|view| view.to_bytes()).unwrap();

    let err = stream.launch(sched(SchedType::Nn, &[515, 0], &[1])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
    assert_eq!(stream.with_control_space(|view| view.to_bytes()).unwrap(), before);

    // A dequeue still runs against the old queues.
    stream.launch(DqsTaskRequest::NotifyWait).unwrap();
    stream.launch(DqsTaskRequest::Dequeue).unwrap();
    let gqm = stream.with_control_space(|view| view.input_gqm_addr(1)).unwrap();
    assert_eq!(gqm, platform.device.queue(514).map(|q| q.dequeue_op_addr));
}

#[test]
fn test_invalid_sched_config_creates_nothing() {
    let platform = platform();
    let (stream, _ring) = platform.stream(1);

    let err = stream.launch(sched(SchedType::Dss, &[513], &[0])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
    let err = stream
        .launch(DqsTaskRequest::SchedConfig(SchedConfig {
            sched_type: 9,
            input_queue_ids: vec![513],
            output_queue_ids: vec![0],
            frame_align: None,
        }))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
    assert!(!stream.has_control_space());
    assert_eq!(platform.kernel.count_of(StarsCmd::CtrlSpace), 0);
}

#[test]
fn test_output_queue_as_input_is_rejected() {
    let platform = platform();
    let (stream, _ring) = platform.stream(1);
    let err = stream.launch(sched(SchedType::Nn, &[0], &[1])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
}

// ============================================================================
// Dequeue and notify
// ============================================================================

#[test]
fn test_single_input_dequeue() {
    let platform = platform();
    let (stream, ring) = configured(&platform, &[513], &[0]);

    let slots = submitted(stream.launch(DqsTaskRequest::Dequeue).unwrap());
    assert_eq!(slots.len(), 1);
    let (slot, sqe) = ring.submitted()[0];
    assert_eq!(slot, slots[0]);
    assert_eq!(sqe.header.sqe_type, SqeType::Cond as u8);
    assert_eq!(sqe.header.sub_type, DqsSubType::Dequeue as u8);
    assert_eq!(u32::from(sqe.header.stream_id), stream.stream_id());
}

#[test]
fn test_multi_input_dequeue_is_batched() {
    let platform = platform();
    platform.device.set_chip_id(2);
    let (stream, ring) = configured(&platform, &[513, 514, 515], &[0]);
    stream.launch(DqsTaskRequest::NotifyWait).unwrap();

    stream.launch(DqsTaskRequest::Dequeue).unwrap();
    let (_, sqe) = ring.submitted()[0];
    assert_eq!(sqe.header.sub_type, DqsSubType::BatchDequeue as u8);

    let notify_id = stream.notify_id(NotifyKind::CountNotify).unwrap();
    let regs = CountNotifyRegs::compute(platform.device.ts_id(), 2, notify_id);
    let program = program_of(&platform, &sqe);
    assert!(loads_imm(&program, regs.read));
    assert!(loads_imm(&program, regs.clear));
}

#[test]
fn test_batch_dequeue_needs_count_notify() {
    let platform = platform();
    let (stream, ring) = configured(&platform, &[513, 514], &[0]);

    let err = stream.launch(DqsTaskRequest::Dequeue).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SyncFailure);
    assert_eq!(platform.device.live_allocations(), 0);
    assert_eq!(ring.outstanding(), 0);
    assert_eq!(stream.in_flight_count(), 0);
}

#[test]
fn test_notify_reused_across_waits() {
    let platform = platform();
    let (stream, ring) = configured(&platform, &[513], &[0]);

    for _ in 0..3 {
        assert!(matches!(
            stream.launch(DqsTaskRequest::NotifyWait).unwrap(),
            LaunchOutcome::Waiting(_)
        ));
    }
    assert!(stream.notify_id(NotifyKind::Notify).is_some());
    assert_eq!(stream.notify_id(NotifyKind::CountNotify), None);
    assert_eq!(platform.device.live_notifies(), 1);
    assert_eq!(platform.kernel.count_of(StarsCmd::AccSubscribe), 1);
    assert_eq!(stream.subscription_count(), 1);
    assert_eq!(ring.waits().len(), 1);
}

// ============================================================================
// Data-plane tasks
// ============================================================================

#[test]
fn test_pipeline_tasks_submit_in_order() {
    let platform = platform();
    let (stream, ring) = configured(&platform, &[513], &[0, 1]);

    for request in [
        DqsTaskRequest::Dequeue,
        DqsTaskRequest::Prepare,
        DqsTaskRequest::Enqueue,
        DqsTaskRequest::MbufFree,
        DqsTaskRequest::SchedEnd,
    ] {
        stream.launch(request).unwrap();
    }
    let subs: Vec<u8> = ring.submitted().iter().map(|(_, sqe)| sqe.header.sub_type).collect();
    assert_eq!(
        subs,
        vec![
            DqsSubType::Dequeue as u8,
            DqsSubType::Prepare as u8,
            DqsSubType::Enqueue as u8,
            DqsSubType::MbufFree as u8,
            DqsSubType::SchedEnd as u8,
        ]
    );
    let slots: Vec<u32> = ring.submitted().iter().map(|(slot, _)| *slot).collect();
    assert_eq!(slots, vec![0, 1, 2, 3, 4]);
    assert_eq!(stream.in_flight_count(), 5);
}

#[test]
fn test_mbuf_free_program_loaded_and_released() {
    let platform = platform();
    let (stream, _ring) = configured(&platform, &[513, 514], &[0]);

    let slot = submitted(stream.launch(DqsTaskRequest::MbufFree).unwrap())[0];
    assert_eq!(platform.device.live_allocations(), 1);
    assert_eq!(stream.complete_task(slot, TaskStatus::Success).unwrap(), TaskKind::MbufFree);
    assert_eq!(platform.device.live_allocations(), 0);
    assert_eq!(stream.in_flight_count(), 0);
}

#[test]
fn test_zero_copy_owns_three_allocations() {
    let platform = platform();
    let (stream, _ring) = configured(&platform, &[513], &[0]);

    let slot = submitted(stream.launch(DqsTaskRequest::ZeroCopy(zero_copy(0, 513))).unwrap())[0];
    assert_eq!(platform.device.live_allocations(), 3);
    stream.complete_task(slot, TaskStatus::Success).unwrap();
    assert_eq!(platform.device.live_allocations(), 0);
}

#[test]
fn test_zero_copy_bad_type_allocates_nothing() {
    let platform = platform();
    let (stream, ring) = configured(&platform, &[513], &[0]);

    let err = stream
        .launch(DqsTaskRequest::ZeroCopy(zero_copy(2, 513)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
    assert_eq!(platform.device.alloc_count(), 0);
    assert!(ring.rollbacks().is_empty());
}

#[test]
fn test_zero_copy_unbound_queue_rolls_back() {
    let platform = platform();
    let (stream, ring) = configured(&platform, &[513], &[0]);

    let err = stream
        .launch(DqsTaskRequest::ZeroCopy(zero_copy(1, 513)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
    assert_eq!(ring.rollbacks(), vec![0]);
    assert_eq!(platform.device.live_allocations(), 0);
}

#[test]
fn test_zero_copy_table_copy_failure_frees_table() {
    let platform = platform();
    let (stream, ring) = configured(&platform, &[513], &[0]);
    platform.device.set_fail_copy(true);

    let err = stream
        .launch(DqsTaskRequest::ZeroCopy(zero_copy(0, 513)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DriverIo);
    assert_eq!(platform.device.live_allocations(), 0);
    assert_eq!(ring.outstanding(), 0);
    platform.device.set_fail_copy(false);
}

#[test]
fn test_condition_copy_limits() {
    let platform = platform();
    let (stream, _ring) = configured(&platform, &[513], &[0]);
    let mut config = ConditionCopyConfig {
        condition_addr: 0x2000,
        dst_addr: 0x3000,
        dst_max: 64,
        src_addr: 0x4000,
        count_bytes: 64,
    };
    stream.launch(DqsTaskRequest::ConditionCopy(config)).unwrap();

    config.count_bytes = 72;
    let err = stream.launch(DqsTaskRequest::ConditionCopy(config)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
    assert_eq!(stream.in_flight_count(), 1);
}

#[test]
fn test_adspc_bad_depth_allocates_nothing() {
    let platform = platform();
    let (stream, ring) = configured(&platform, &[513], &[0]);

    let err = stream.launch(DqsTaskRequest::Adspc(adspc(7))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
    assert_eq!(platform.device.alloc_count(), 0);
    assert!(ring.submitted().is_empty());
}

#[test]
fn test_adspc_forwards_to_output_queue() {
    let platform = platform();
    let (stream, ring) = configured(&platform, &[513], &[0]);

    stream.launch(DqsTaskRequest::Adspc(adspc(8))).unwrap();
    let (_, sqe) = ring.submitted()[0];
    assert_eq!(sqe.header.sub_type, DqsSubType::Adspc as u8);
}

#[test]
fn test_failed_task_dumps_and_releases() {
    let platform = platform();
    let (stream, _ring) = configured(&platform, &[513], &[0]);

    let slot = submitted(stream.launch(DqsTaskRequest::Prepare).unwrap())[0];
    assert_eq!(stream.complete_task(slot, TaskStatus::Failed).unwrap(), TaskKind::Prepare);
    assert_eq!(platform.device.live_allocations(), 0);
    assert!(stream.complete_task(slot, TaskStatus::Failed).is_err());
}

// ============================================================================
// Inter-chip
// ============================================================================

#[test]
fn test_inter_chip_init_launches_four_tasks_per_group() {
    let platform = platform();
    let (stream, ring) = platform.stream(1);

    let slots = submitted(stream.launch(DqsTaskRequest::InterChipInit).unwrap());
    assert_eq!(slots.len(), 4 * DQS_INTER_CHIP_GROUP_MAX);
    assert_eq!(platform.device.live_allocations(), 2 * DQS_INTER_CHIP_GROUP_MAX);
    assert!(stream.has_inter_chip_space());

    let types: Vec<(u8, u8)> = ring
        .submitted()
        .iter()
        .take(4)
        .map(|(_, sqe)| (sqe.header.sqe_type, sqe.header.sub_type))
        .collect();
    assert_eq!(
        types,
        vec![
            (SqeType::Cond as u8, DqsSubType::InterChipPreProc as u8),
            (SqeType::SdmaPtr as u8, 0),
            (SqeType::SdmaPtr as u8, 0),
            (SqeType::Cond as u8, DqsSubType::InterChipPostProc as u8),
        ]
    );
    assert_eq!(platform.kernel.count_of(StarsCmd::InterChipSpaceQuery), 1);
}

#[test]
fn test_inter_chip_space_query_failure_launches_nothing() {
    let platform = platform();
    platform.kernel.fail_command(StarsCmd::InterChipSpaceQuery, nix::libc::EIO);
    let (stream, ring) = platform.stream(1);
    let err = stream.launch(DqsTaskRequest::InterChipInit).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DriverIo);
    assert!(!stream.has_inter_chip_space());
    assert!(ring.submitted().is_empty());
    assert_eq!(platform.device.live_allocations(), 0);
}

// ============================================================================
// Teardown and leaks
// ============================================================================

#[test]
fn test_teardown_then_reconfigure() {
    let platform = platform();
    let (stream, _ring) = configured(&platform, &[513], &[0]);
    stream.launch(DqsTaskRequest::NotifyWait).unwrap();
    stream.launch(DqsTaskRequest::Enqueue).unwrap();
    stream.teardown().unwrap();

    assert_eq!(platform.kernel.count_of(StarsCmd::AccSubscribe), 2);
    assert_eq!(platform.kernel.live_ctrl_spaces(), 0);
    assert_eq!(platform.device.live_allocations(), 0);

    stream.launch(sched(SchedType::Nn, &[513], &[0])).unwrap();
    assert_eq!(platform.kernel.live_ctrl_spaces(), 1);
    stream.teardown().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A launch that fails part way leaves no device memory behind and
    /// keeps the stream's notify objects.
    #[test]
    fn prop_failed_launch_leaks_nothing(allocs in 0usize..4, request_idx in 0usize..4) {
        let platform = platform();
        let (stream, ring) = configured(&platform, &[513, 514], &[0]);
        stream.launch(DqsTaskRequest::NotifyWait).unwrap();
        let request = match request_idx {
            0 => DqsTaskRequest::ZeroCopy(zero_copy(0, 514)),
            1 => DqsTaskRequest::Dequeue,
            2 => DqsTaskRequest::Adspc(adspc(8)),
            _ => DqsTaskRequest::Prepare,
        };
        platform.device.fail_alloc_after(allocs);

        match stream.launch(request) {
            Ok(_) => {
                prop_assert_eq!(stream.in_flight_count(), 1);
            }
            Err(e) => {
                prop_assert!(e.is_resource_error());
                prop_assert_eq!(platform.device.live_allocations(), 0);
                prop_assert_eq!(stream.in_flight_count(), 0);
                prop_assert_eq!(ring.outstanding(), 0);
            }
        }
        prop_assert!(stream.notify_id(NotifyKind::CountNotify).is_some());
        prop_assert_eq!(platform.device.live_notifies(), 1);
        prop_assert_eq!(stream.subscription_count(), 1);

        platform.device.clear_alloc_failure();
        stream.teardown().unwrap();
        prop_assert_eq!(platform.device.live_allocations(), 0);
        prop_assert_eq!(platform.device.live_notifies(), 0);
    }

    /// An inter-chip init cut short by allocation failure keeps the groups
    /// already on the ring and nothing of the failed task.
    #[test]
    fn prop_failed_inter_chip_init_keeps_only_submitted(allocs in 0usize..(2 * DQS_INTER_CHIP_GROUP_MAX)) {
        let platform = platform();
        let (stream, ring) = configured(&platform, &[513], &[0]);
        stream.launch(DqsTaskRequest::NotifyWait).unwrap();
        platform.device.fail_alloc_after(allocs);

        let err = stream.launch(DqsTaskRequest::InterChipInit).unwrap_err();
        prop_assert!(err.is_resource_error());

        // Each group is pre-proc (blob), two copies, post-proc (blob).
        let on_ring = 4 * (allocs / 2) + 3 * (allocs % 2);
        prop_assert_eq!(stream.in_flight_count(), on_ring);
        prop_assert_eq!(ring.outstanding(), on_ring);
        prop_assert_eq!(platform.device.live_allocations(), allocs);
        prop_assert_eq!(platform.device.live_notifies(), 1);
        prop_assert!(stream.has_inter_chip_space());

        platform.device.clear_alloc_failure();
        stream.teardown().unwrap();
        prop_assert_eq!(platform.device.live_allocations(), 0);
        prop_assert_eq!(platform.device.live_notifies(), 0);
    }
}
