//! One scheduling round of a DQS stream on the in-memory simulator.

use clap::{Args, ValueEnum};
use dqs_core::sim::SimPlatform;
use dqs_core::sqe::Sqe;
use dqs_core::task::{SchedConfig, SchedType};
use dqs_core::{DqsTaskRequest, RuntimeConfig, TaskStatus};
use serde::Serialize;
use tracing::info;

use crate::output::{print_rows, OutputFormat, Row};

/// First input queue id handed out by the simulator.
const FIRST_INPUT_QUEUE: u16 = 513;

/// Scheduler type as spelled on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SchedArg {
    /// Neural-network pipeline.
    Nn,
    /// Video pre-processing.
    Vpc,
    /// Input-only.
    Dss,
}

impl From<SchedArg> for SchedType {
    fn from(arg: SchedArg) -> Self {
        match arg {
            SchedArg::Nn => Self::Nn,
            SchedArg::Vpc => Self::Vpc,
            SchedArg::Dss => Self::Dss,
        }
    }
}

/// Arguments for simulate command.
#[derive(Args)]
pub struct SimulateArgs {
    /// Number of GQM input queues
    #[arg(long, default_value_t = 1)]
    pub input_queues: u16,

    /// Number of QMNGR output queues (must be 0 for dss)
    #[arg(long, default_value_t = 1)]
    pub output_queues: u16,

    /// Scheduler type
    #[arg(long, value_enum, default_value = "nn")]
    pub sched_type: SchedArg,

    /// Stream id
    #[arg(long, default_value_t = 1)]
    pub stream: u32,
}

#[derive(Debug, Serialize)]
struct SqeRow {
    slot: u32,
    task: &'static str,
    sqe_type: u8,
    sub_type: u8,
    stream_id: u16,
    task_id: u16,
    wr_cqe: bool,
    pre_p: bool,
    wire: String,
}

impl SqeRow {
    fn new(slot: u32, task: &'static str, sqe: &Sqe) -> Self {
        Self {
            slot,
            task,
            sqe_type: sqe.header.sqe_type,
            sub_type: sqe.header.sub_type,
            stream_id: sqe.header.stream_id,
            task_id: sqe.header.task_id,
            wr_cqe: sqe.wr_cqe(),
            pre_p: sqe.pre_p(),
            wire: sqe.to_bytes().iter().map(|b| format!("{b:02x}")).collect(),
        }
    }
}

impl Row for SqeRow {
    const HEADERS: &'static [&'static str] = &["SLOT", "TASK", "TYPE", "SUB", "STREAM", "TASK_ID", "FLAGS"];

    fn cells(&self) -> Vec<String> {
        let flags = match (self.wr_cqe, self.pre_p) {
            (true, true) => "cqe,pre",
            (true, false) => "cqe",
            (false, true) => "pre",
            (false, false) => "-",
        };
        vec![
            self.slot.to_string(),
            self.task.to_string(),
            format!("{:#04x}", self.sqe_type),
            format!("{:#04x}", self.sub_type),
            self.stream_id.to_string(),
            self.task_id.to_string(),
            flags.to_string(),
        ]
    }
}

/// Requests of one round, in launch order.
fn round(sched_type: SchedType) -> Vec<DqsTaskRequest> {
    let mut requests = vec![DqsTaskRequest::NotifyWait, DqsTaskRequest::Dequeue];
    if sched_type != SchedType::Dss {
        requests.extend([DqsTaskRequest::Prepare, DqsTaskRequest::Enqueue]);
    }
    requests.extend([DqsTaskRequest::MbufFree, DqsTaskRequest::SchedEnd]);
    requests
}

/// Configure a simulated stream, run one round and print every entry it submitted.
pub fn simulate(args: &SimulateArgs, config: RuntimeConfig, format: OutputFormat) -> anyhow::Result<()> {
    let platform = SimPlatform::with_config(config);
    let inputs: Vec<u16> = (0..args.input_queues).map(|i| FIRST_INPUT_QUEUE + i).collect();
    let outputs: Vec<u16> = (0..args.output_queues).collect();
    for &q in &inputs {
        platform.add_input_queue(u32::from(q));
    }
    for &q in &outputs {
        platform.add_output_queue(u32::from(q), u32::from(q) + 1);
    }

    let (stream, ring) = platform.stream(args.stream);
    let sched_type = SchedType::from(args.sched_type);
    stream.launch(DqsTaskRequest::SchedConfig(SchedConfig {
        sched_type: sched_type as u32,
        input_queue_ids: inputs,
        output_queue_ids: outputs,
        frame_align: None,
    }))?;
    for request in round(sched_type) {
        stream.launch(request)?;
    }

    let mut rows = Vec::new();
    for (slot, sqe) in ring.submitted() {
        let kind = stream.complete_task(slot, TaskStatus::Success)?;
        ring.retire(slot);
        rows.push(SqeRow::new(slot, kind.name(), &sqe));
    }
    stream.teardown()?;
    info!(
        stream_id = args.stream,
        entries = rows.len(),
        live_allocations = platform.device.live_allocations(),
        "simulated round complete"
    );

    if matches!(format, OutputFormat::Raw) {
        for row in &rows {
            println!("{}", row.wire);
        }
        return Ok(());
    }
    print_rows(format, &rows)
}
