//! Output formatting for CLI.

use clap::ValueEnum;
use serde::Serialize;

/// Output format selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output.
    Json,
    /// Raw values (for scripting).
    Raw,
}

/// One line of command output.
pub trait Row: Serialize {
    /// Column titles for table output.
    const HEADERS: &'static [&'static str];

    /// Cell values, in [`Row::HEADERS`] order.
    fn cells(&self) -> Vec<String>;
}

/// Print `rows` in the requested format.
pub fn print_rows<R: Row>(format: OutputFormat, rows: &[R]) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            let cells: Vec<Vec<String>> = rows.iter().map(Row::cells).collect();
            for line in render_table(R::HEADERS, &cells) {
                println!("{line}");
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
        OutputFormat::Raw => {
            for row in rows {
                println!("{}", row.cells().join(" "));
            }
        }
    }
    Ok(())
}

/// Right-aligned columns sized to their widest cell.
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> Vec<String> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }
    let mut out = Vec::with_capacity(rows.len() + 1);
    out.push(render_line(headers.iter().copied(), &widths));
    for row in rows {
        out.push(render_line(row.iter().map(String::as_str), &widths));
    }
    out
}

fn render_line<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    cells
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:>width$}"))
        .collect::<Vec<_>>()
        .join("  ")
}

/// `0x`-prefixed hex, as addresses are shown everywhere.
pub fn hex(value: u64) -> String {
    format!("{value:#x}")
}
