use std::io::Write;

use anyhow::{bail, Result};
use questmap_core::render_markers;
use serde_json::json;

use crate::app::App;
use crate::cli::OutputFormat;
use crate::commands::parse_position;

pub async fn execute(
    app: &App,
    lat: f64,
    lng: f64,
    description: &[String],
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<()> {
    let position = parse_position(lat, lng)?;
    let description = description.join(" ").trim().to_string();
    if description.is_empty() {
        bail!("A quest description is required to place a marker");
    }

    let mut session = app.synced_session().await?;
    let placed = app
        .repository()
        .place_marker(position, Some(description))
        .await;
    let views = render_markers(&app.repository().markers());
    session.deactivate().await;

    let Some(id) = placed? else {
        bail!("Marker was not placed");
    };
    let label = views
        .iter()
        .find(|view| view.id.as_ref() == Some(&id))
        .map(|view| view.label.clone());

    match format {
        OutputFormat::Json => writeln!(
            out,
            "{}",
            json!({ "id": id, "label": label, "position": position })
        )?,
        OutputFormat::Table => match label {
            Some(label) => writeln!(out, "Placed marker {id} as #{label} at {position}")?,
            None => writeln!(out, "Placed marker {id} at {position}")?,
        },
    }
    Ok(())
}
