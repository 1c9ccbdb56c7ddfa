use std::io::Write;

use anyhow::Result;
use serde_json::json;

use crate::app::App;
use crate::cli::OutputFormat;

pub async fn execute(app: &App, format: OutputFormat, out: &mut dyn Write) -> Result<()> {
    let mut session = app.synced_session().await?;
    let cleared = app.repository().remove_all_markers().await;
    session.deactivate().await;
    let count = cleared?;

    match format {
        OutputFormat::Json => writeln!(
            out,
            "{}",
            json!({ "deleted": count, "scope": app.repository().scope().to_string() })
        )?,
        OutputFormat::Table => writeln!(out, "Deleted {count} markers")?,
    }
    Ok(())
}
