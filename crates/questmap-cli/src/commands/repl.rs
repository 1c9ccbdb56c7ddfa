//! Interactive map session.
//!
//! Reads one command per line and drives a [`MapController`] the same way a
//! map screen would: type a quest description, click to place it, drag and
//! click markers to move and delete them.

use std::io::Write;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use questmap_core::{MapController, MapEvent, MarkerId, MarkerView, Position};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

use crate::app::App;
use crate::cli::OutputFormat;
use crate::output;

const HELP: &str = "\
Commands:
  describe <text>          set the quest description for the next click
  click <lat> <lng>        place the described quest at a position
  drag <#|id> <lat> <lng>  move a marker
  select <#|id>            delete a marker
  clear                    delete every marker in scope
  show                     print the current markers
  help                     show this text
  quit                     leave the session";

#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Describe(String),
    Click(Position),
    Drag { target: String, position: Position },
    Select(String),
    Clear,
    Show,
    Help,
    Quit,
}

/// Parse one input line. Blank lines and `//` comments yield `None`.
pub fn parse_command(line: &str) -> Result<Option<ReplCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("//") {
        return Ok(None);
    }

    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let args: Vec<&str> = rest.split_whitespace().collect();

    let command = match verb.to_ascii_lowercase().as_str() {
        "describe" | "d" => ReplCommand::Describe(rest.trim().to_string()),
        "click" | "c" => match args.as_slice() {
            [lat, lng] => ReplCommand::Click(position(lat, lng)?),
            _ => bail!("usage: click <lat> <lng>"),
        },
        "drag" => match args.as_slice() {
            [target, lat, lng] => ReplCommand::Drag {
                target: target.to_string(),
                position: position(lat, lng)?,
            },
            _ => bail!("usage: drag <#|id> <lat> <lng>"),
        },
        "select" | "s" => match args.as_slice() {
            [target] => ReplCommand::Select(target.to_string()),
            _ => bail!("usage: select <#|id>"),
        },
        "clear" => ReplCommand::Clear,
        "show" | "ls" => ReplCommand::Show,
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" | "q" => ReplCommand::Quit,
        other => bail!("unknown command `{other}`, try `help`"),
    };
    Ok(Some(command))
}

fn position(lat: &str, lng: &str) -> Result<Position> {
    let lat: f64 = lat.parse().with_context(|| format!("`{lat}` is not a latitude"))?;
    let lng: f64 = lng.parse().with_context(|| format!("`{lng}` is not a longitude"))?;
    Ok(Position::new(lat, lng)?)
}

/// Resolve a `#label`, bare label or marker id against the rendered views.
pub fn resolve_target(views: &[MarkerView], target: &str) -> Result<MarkerId> {
    let label = target.strip_prefix('#').unwrap_or(target);
    let Ok(index) = label.parse::<usize>() else {
        return Ok(MarkerId::new(target));
    };

    let view = index
        .checked_sub(1)
        .and_then(|i| views.get(i))
        .ok_or_else(|| anyhow!("no marker #{index}"))?;
    view.id
        .clone()
        .ok_or_else(|| anyhow!("marker #{index} is not saved yet"))
}

pub async fn execute(app: &App, format: OutputFormat, out: &mut dyn Write) -> Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    run(app, stdin, format, out).await
}

pub async fn run<R>(app: &App, input: R, format: OutputFormat, out: &mut dyn Write) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut session = app.synced_session().await?;
    let mut map = MapController::new(Arc::clone(app.repository()));
    let mut lines = input.lines();
    let mut reported_out_of_sync = false;

    writeln!(out, "questmap ({}), type `help` for commands", app.repository().scope())?;
    writeln!(out, "{}", output::format_markers(&map.render(), format)?)?;
    out.flush()?;

    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                writeln!(out, "error: {err:#}")?;
                continue;
            }
        };
        debug!(?command, "REPL command");

        let event = match command {
            ReplCommand::Quit => break,
            ReplCommand::Help => {
                writeln!(out, "{HELP}")?;
                continue;
            }
            ReplCommand::Show => {
                writeln!(out, "{}", output::format_markers(&map.render(), format)?)?;
                continue;
            }
            ReplCommand::Describe(text) => MapEvent::DescriptionChanged(text),
            ReplCommand::Click(position) => {
                if map.pending_description().is_none() {
                    writeln!(out, "Enter a quest description first (`describe <text>`)")?;
                    continue;
                }
                MapEvent::MapClicked(position)
            }
            ReplCommand::Drag { target, position } => match resolve_target(&map.render(), &target) {
                Ok(id) => MapEvent::MarkerDragged { id, position },
                Err(err) => {
                    writeln!(out, "error: {err}")?;
                    continue;
                }
            },
            ReplCommand::Select(target) => match resolve_target(&map.render(), &target) {
                Ok(id) => MapEvent::MarkerClicked(id),
                Err(err) => {
                    writeln!(out, "error: {err}")?;
                    continue;
                }
            },
            ReplCommand::Clear => MapEvent::DeleteAllClicked,
        };

        let rerender = !matches!(event, MapEvent::DescriptionChanged(_));
        // failures arrive as notices below
        let _ = map.handle(event).await;
        for notice in map.take_notices() {
            writeln!(out, "{}", output::format_notice(&notice))?;
        }
        if rerender {
            writeln!(out, "{}", output::format_markers(&map.render(), format)?)?;
        }

        let state = session.state();
        if state.is_out_of_sync() && !reported_out_of_sync {
            writeln!(out, "{}", output::format_state(&state))?;
            reported_out_of_sync = true;
        }
        out.flush()?;
    }

    session.deactivate().await;
    Ok(())
}
