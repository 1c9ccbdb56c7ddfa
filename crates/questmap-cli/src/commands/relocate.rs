use std::io::Write;

use anyhow::Result;
use questmap_core::MarkerId;
use serde_json::json;

use crate::app::App;
use crate::cli::OutputFormat;
use crate::commands::parse_position;

/// `questmap move`
pub async fn execute(
    app: &App,
    id: &str,
    lat: f64,
    lng: f64,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<()> {
    let position = parse_position(lat, lng)?;
    let id = MarkerId::new(id);

    let mut session = app.synced_session().await?;
    let moved = app.repository().move_marker(&id, position).await;
    session.deactivate().await;
    moved?;

    match format {
        OutputFormat::Json => writeln!(out, "{}", json!({ "id": id, "position": position }))?,
        OutputFormat::Table => writeln!(out, "Moved marker {id} to {position}")?,
    }
    Ok(())
}
