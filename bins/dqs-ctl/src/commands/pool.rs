//! Mbuf pool queries.

use clap::Subcommand;
use dqs_core::kernel::sys::MbufPoolBindItem;
use dqs_core::DqsContext;
use serde::Serialize;

use crate::output::{hex, print_rows, OutputFormat, Row};

/// Mbuf pool commands.
#[derive(Subcommand)]
pub enum PoolCommand {
    /// Show the pools bound to queues
    Query {
        /// Queue ids (at most 10)
        #[arg(required = true)]
        queue_ids: Vec<u32>,
    },
}

#[derive(Debug, Serialize)]
struct PoolRow {
    queue_id: u32,
    pool_id: u32,
    head_block_size: u32,
    data_block_size: u32,
    head_base_addr: String,
    data_base_addr: String,
    alloc_addr: String,
    free_addr: String,
}

impl From<&MbufPoolBindItem> for PoolRow {
    fn from(item: &MbufPoolBindItem) -> Self {
        Self {
            queue_id: item.queue_id,
            pool_id: item.pool_id,
            head_block_size: item.head_block_size,
            data_block_size: item.data_block_size,
            head_base_addr: hex(item.head_base_addr + u64::from(item.head_offset)),
            data_base_addr: hex(item.data_base_addr + u64::from(item.data_offset)),
            alloc_addr: hex(item.alloc_addr),
            free_addr: hex(item.free_addr),
        }
    }
}

impl Row for PoolRow {
    const HEADERS: &'static [&'static str] =
        &["QUEUE", "POOL", "HEAD_BLK", "DATA_BLK", "HEAD_BASE", "DATA_BASE", "ALLOC", "FREE"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.queue_id.to_string(),
            self.pool_id.to_string(),
            self.head_block_size.to_string(),
            self.data_block_size.to_string(),
            self.head_base_addr.clone(),
            self.data_base_addr.clone(),
            self.alloc_addr.clone(),
            self.free_addr.clone(),
        ]
    }
}

/// Run a pool command.
pub fn pool(cmd: &PoolCommand, context: &DqsContext, format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        PoolCommand::Query { queue_ids } => {
            let items = context.queues().lookup_mbuf_pool_info(queue_ids)?;
            let rows: Vec<PoolRow> = items.iter().map(PoolRow::from).collect();
            print_rows(format, &rows)
        }
    }
}
