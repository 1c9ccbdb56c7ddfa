//! Rendering of marker views for the terminal.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, Table};
use questmap_core::{MarkerView, Notice, NoticeLevel, SyncState};

use crate::cli::OutputFormat;

/// Marker list as a table or JSON array.
pub fn format_markers(views: &[MarkerView], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(views).context("Failed to serialize markers as JSON")
        }
        OutputFormat::Table => Ok(markers_table(views)),
    }
}

fn markers_table(views: &[MarkerView]) -> String {
    if views.is_empty() {
        return "No markers".to_string();
    }

    let mut table = Table::new();
    table.set_header(vec!["#", "Id", "Lat", "Lng", "Quest"]);
    for view in views {
        let id = match &view.id {
            Some(id) => Cell::new(id),
            None => Cell::new("pending").fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(&view.label),
            id,
            Cell::new(format!("{:.5}", view.position.lat)),
            Cell::new(format!("{:.5}", view.position.lng)),
            Cell::new(&view.title),
        ]);
    }
    table.to_string()
}

pub fn format_notice(notice: &Notice) -> String {
    match notice.level {
        NoticeLevel::Info => notice.message.clone(),
        NoticeLevel::Error => format!("error: {}", notice.message),
    }
}

pub fn format_state(state: &SyncState) -> String {
    format!("[sync: {state}]")
}
