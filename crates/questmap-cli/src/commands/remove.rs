use std::io::Write;

use anyhow::Result;
use questmap_core::MarkerId;
use serde_json::json;

use crate::app::App;
use crate::cli::OutputFormat;

pub async fn execute(app: &App, id: &str, format: OutputFormat, out: &mut dyn Write) -> Result<()> {
    let id = MarkerId::new(id);

    let mut session = app.synced_session().await?;
    let removed = app.repository().remove_marker(&id).await;
    session.deactivate().await;
    removed?;

    match format {
        OutputFormat::Json => writeln!(out, "{}", json!({ "removed": id }))?,
        OutputFormat::Table => writeln!(out, "Removed marker {id}")?,
    }
    Ok(())
}
