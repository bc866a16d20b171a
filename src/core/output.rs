//! Compact output rendering helpers for CLI surfaces.

use crate::core::time;
use clap::ValueEnum;
use serde_json::Value as JsonValue;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Print a command result: the text rendering, or a JSON command envelope.
pub fn emit<F>(format: OutputFormat, cmd: &str, payload: JsonValue, text: F)
where
    F: FnOnce() -> String,
{
    match format {
        OutputFormat::Text => {
            let rendered = text();
            if !rendered.is_empty() {
                println!("{}", rendered.trim_end());
            }
        }
        OutputFormat::Json => {
            let envelope = time::command_envelope(cmd, "ok", serde_json::json!({ "result": payload }));
            println!(
                "{}",
                serde_json::to_string_pretty(&envelope).unwrap_or_else(|_| envelope.to_string())
            );
        }
    }
}

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Render rows as a fixed-width text grid. Cells are compacted to `max_cell` chars.
pub fn render_grid(headers: &[String], rows: &[Vec<String>], max_cell: usize) -> String {
    let cells: Vec<Vec<String>> = std::iter::once(headers.to_vec())
        .chain(rows.iter().cloned())
        .map(|row| row.iter().map(|c| compact_line(c, max_cell)).collect())
        .collect();

    let columns = headers.len();
    let widths: Vec<usize> = (0..columns)
        .map(|i| {
            cells
                .iter()
                .filter_map(|row| row.get(i))
                .map(|c| c.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    for (n, row) in cells.iter().enumerate() {
        let line = (0..columns)
            .map(|i| {
                let cell = row.get(i).map(String::as_str).unwrap_or("");
                format!("{:<width$}", cell, width = widths[i])
            })
            .collect::<Vec<_>>()
            .join(" | ");
        out.push_str(line.trim_end());
        out.push('\n');
        if n == 0 {
            let rule = widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("-+-");
            out.push_str(&rule);
            out.push('\n');
        }
    }
    out
}
