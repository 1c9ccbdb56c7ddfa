use std::io::Write;

use anyhow::Result;
use questmap_core::render_markers;

use crate::app::App;
use crate::cli::OutputFormat;
use crate::output;

pub async fn execute(app: &App, format: OutputFormat, out: &mut dyn Write) -> Result<()> {
    let mut session = app.synced_session().await?;
    let views = render_markers(&app.repository().markers());
    session.deactivate().await;

    writeln!(out, "{}", output::format_markers(&views, format)?)?;
    Ok(())
}
