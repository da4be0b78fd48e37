//! Queue binding commands.

use clap::{Subcommand, ValueEnum};
use dqs_core::kernel::sys::UnbindType;
use dqs_core::DqsContext;
use serde::Serialize;

use crate::output::{print_rows, OutputFormat, Row};

/// Which side of a binding an unbind matches on.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum UnbindBy {
    /// Every binding of the source queue.
    Src,
    /// Bindings to the listed destinations.
    Dst,
    /// Only the listed source/destination pairs.
    Both,
}

impl From<UnbindBy> for UnbindType {
    fn from(by: UnbindBy) -> Self {
        match by {
            UnbindBy::Src => Self::BySrc,
            UnbindBy::Dst => Self::ByDst,
            UnbindBy::Both => Self::ByBoth,
        }
    }
}

/// Queue binding commands.
#[derive(Subcommand)]
pub enum QueueCommand {
    /// Bind a source queue to destination queues
    Bind {
        /// Source queue id
        src: u32,
        /// Destination queue ids (at most 128)
        #[arg(required = true)]
        dsts: Vec<u32>,
    },

    /// Remove bindings
    Unbind {
        /// Match bindings by source, destination or both
        #[arg(long, value_enum, default_value = "both")]
        by: UnbindBy,
        /// Source queue id
        src: u32,
        /// Destination queue ids
        dsts: Vec<u32>,
    },

    /// Show the destinations of one source queue
    Query {
        /// Source queue id
        src: u32,
    },

    /// Show every binding
    All,
}

#[derive(Debug, Serialize)]
struct BindingRow {
    src: u32,
    dst: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<i32>,
}

impl Row for BindingRow {
    const HEADERS: &'static [&'static str] = &["SRC", "DST", "STATUS"];

    fn cells(&self) -> Vec<String> {
        let status = self.status.map_or_else(|| "-".to_string(), |s| s.to_string());
        vec![self.src.to_string(), self.dst.to_string(), status]
    }
}

fn pairs(src: u32, dsts: &[u32]) -> Vec<BindingRow> {
    dsts.iter()
        .map(|&dst| BindingRow { src, dst, status: None })
        .collect()
}

/// Run a queue command.
pub fn queue(cmd: &QueueCommand, context: &DqsContext, format: OutputFormat) -> anyhow::Result<()> {
    let queues = context.queues();
    match cmd {
        QueueCommand::Bind { src, dsts } => {
            let results = queues.bind(*src, dsts)?;
            let rows: Vec<BindingRow> = dsts
                .iter()
                .zip(results)
                .map(|(&dst, status)| BindingRow {
                    src: *src,
                    dst,
                    status: Some(status),
                })
                .collect();
            print_rows(format, &rows)?;
            let rejected = rows.iter().filter(|r| r.status != Some(0)).count();
            if rejected > 0 {
                anyhow::bail!("{rejected} of {} bindings rejected", rows.len());
            }
            Ok(())
        }
        QueueCommand::Unbind { by, src, dsts } => {
            queues.unbind((*by).into(), *src, dsts)?;
            tracing::info!(src, count = dsts.len(), by = ?by, "queues unbound");
            Ok(())
        }
        QueueCommand::Query { src } => print_rows(format, &pairs(*src, &queues.query(*src)?)),
        QueueCommand::All => {
            let rows: Vec<BindingRow> = queues
                .query_all()?
                .iter()
                .map(|p| BindingRow {
                    src: p.src_qid,
                    dst: p.dst_qid,
                    status: None,
                })
                .collect();
            print_rows(format, &rows)
        }
    }
}
