//! Control Space create and destroy.

use clap::Subcommand;
use dqs_core::ctrl_space::ControlSpaceManager;
use dqs_core::driver::DeviceDriver;
use dqs_core::kernel::sys::StreamRef;
use dqs_core::DqsContext;
use serde::Serialize;

use crate::output::{hex, print_rows, OutputFormat, Row};

/// Control Space commands.
#[derive(Subcommand)]
pub enum CtrlSpaceCommand {
    /// Have the kernel map a Control Space for a stream
    Create {
        /// Stream id
        #[arg(long)]
        stream: u32,
        /// Task scheduler id (default: configured ts_id)
        #[arg(long)]
        ts: Option<u32>,
    },

    /// Release the Control Space of a stream
    Destroy {
        /// Stream id
        #[arg(long)]
        stream: u32,
        /// Task scheduler id (default: configured ts_id)
        #[arg(long)]
        ts: Option<u32>,
    },
}

#[derive(Debug, Serialize)]
struct CtrlSpaceRow {
    stream_id: u32,
    ts_id: u32,
    va: String,
}

impl Row for CtrlSpaceRow {
    const HEADERS: &'static [&'static str] = &["STREAM", "TS", "VA"];

    fn cells(&self) -> Vec<String> {
        vec![self.stream_id.to_string(), self.ts_id.to_string(), self.va.clone()]
    }
}

/// Run a Control Space command.
pub fn ctrl_space(cmd: &CtrlSpaceCommand, context: &DqsContext, format: OutputFormat) -> anyhow::Result<()> {
    let mgr = ControlSpaceManager::new(&context.channel);
    let stream_ref = |stream: u32, ts: Option<u32>| StreamRef {
        stream_id: stream,
        ts_id: ts.unwrap_or_else(|| context.driver.ts_id()),
    };
    match *cmd {
        CtrlSpaceCommand::Create { stream, ts } => {
            let stream = stream_ref(stream, ts);
            let view = mgr.create(stream)?;
            print_rows(
                format,
                &[CtrlSpaceRow {
                    stream_id: stream.stream_id,
                    ts_id: stream.ts_id,
                    va: hex(view.base()),
                }],
            )
        }
        CtrlSpaceCommand::Destroy { stream, ts } => {
            let stream = stream_ref(stream, ts);
            mgr.destroy_detached(stream)?;
            println!("Destroyed control space of stream {} on ts {}", stream.stream_id, stream.ts_id);
            Ok(())
        }
    }
}
