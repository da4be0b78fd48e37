//! Host-side runtime for the STARS data queue scheduler (DQS).
//!
//! This crate builds the tasks a stream submits to drive hardware queues
//! without host involvement: dequeue and enqueue of mbuf handles, mbuf
//! release, output-buffer preparation, frame alignment, zero copy,
//! condition copy, ADSPC completion forwarding and inter-chip transfer.
//! Most tasks carry a small program for the scheduler's micro-engine,
//! assembled by [`fc`] and loaded into device memory.
//!
//! Per-stream state lives in a kernel-mapped Control Space (see
//! [`ctrl_space`]); kernel calls go through [`kernel::KernelChannel`].
//!
//! # Example
//!
//! ```
//! use dqs_core::sim::SimPlatform;
//! use dqs_core::task::{DqsTaskRequest, SchedConfig, SchedType};
//! use dqs_core::LaunchOutcome;
//!
//! let platform = SimPlatform::new();
//! platform.add_input_queue(513);
//! platform.add_output_queue(0, 3);
//! let (stream, _ring) = platform.stream(1);
//!
//! stream
//!     .launch(DqsTaskRequest::SchedConfig(SchedConfig {
//!         sched_type: SchedType::Nn as u32,
//!         input_queue_ids: vec![513],
//!         output_queue_ids: vec![0],
//!         frame_align: None,
//!     }))
//!     .unwrap();
//! let outcome = stream.launch(DqsTaskRequest::Dequeue).unwrap();
//! assert!(matches!(outcome, LaunchOutcome::Submitted(ref slots) if slots.len() == 1));
//! stream.teardown().unwrap();
//! ```

#![deny(missing_docs)]
#![deny(clippy::panic)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod ctrl_space;
pub mod driver;
mod error;
pub mod fc;
pub mod func_call;
pub mod inter_chip;
pub mod isa;
pub mod kernel;
pub mod notify;
pub mod queue;
pub mod sim;
pub mod sqe;
pub mod stream;
pub mod task;

pub use config::RuntimeConfig;
pub use error::{DqsError, ErrorKind, Result};
pub use stream::{launch_task, teardown_stream, DqsContext, LaunchOutcome, Stream, StreamRing, StreamWithDqs};
pub use task::{DqsTaskRequest, TaskKind, TaskStatus};
