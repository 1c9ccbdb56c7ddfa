use std::future::Future;
use std::io::Write;

use anyhow::{bail, Context, Result};
use questmap_core::{render_markers, SyncState};
use tracing::info;

use crate::app::App;
use crate::cli::OutputFormat;
use crate::output;

pub async fn execute(app: &App, format: OutputFormat, out: &mut dyn Write) -> Result<()> {
    run(app, format, out, async {
        // an unusable signal handler just means we run until the feed ends
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Print every mirror change until `shutdown` completes or sync is lost.
pub async fn run<F>(app: &App, format: OutputFormat, out: &mut dyn Write, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let mut snapshots = app.repository().watch();
    let mut session = app.session();
    let mut states = session.watch_state();
    session
        .activate()
        .await
        .context("Failed to subscribe to the marker store")?;
    info!(scope = %app.repository().scope(), "Watching markers");

    tokio::pin!(shutdown);
    let outcome = loop {
        tokio::select! {
            () = &mut shutdown => break Ok(()),
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let snapshot = snapshots.borrow_and_update().clone();
                let views = render_markers(&snapshot);
                writeln!(out, "{}", output::format_markers(&views, format)?)?;
                out.flush()?;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = states.borrow_and_update().clone();
                writeln!(out, "{}", output::format_state(&state))?;
                if let SyncState::OutOfSync { reason } = state {
                    break Err(reason);
                }
            }
        }
    };

    session.deactivate().await;
    match outcome {
        Ok(()) => Ok(()),
        Err(reason) => bail!("Lost the live subscription: {reason}"),
    }
}
