//! Presentation adapter for a map screen.
//!
//! [`MapController`] turns raw map interactions into repository intents and
//! renders the mirror into [`MarkerView`]s. It holds the only piece of UI
//! state the engine cares about: the quest description the user has typed
//! but not yet placed.
//!
//! Labels are positional. They are recomputed on every render and shift when
//! markers before them are removed.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::MarkerResult;
use crate::marker::{Marker, MarkerId, Position};
use crate::repository::MarkerRepository;

/// Map center shown before any marker exists.
pub const DEFAULT_CENTER: Position = Position {
    lat: 49.842,
    lng: 24.031,
};

/// Zoom level used with [`DEFAULT_CENTER`].
pub const DEFAULT_ZOOM: u8 = 10;

/// A user interaction on the map screen.
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    /// The quest description input changed.
    DescriptionChanged(String),
    /// Empty map area clicked.
    MapClicked(Position),
    /// A marker was dropped after dragging.
    MarkerDragged { id: MarkerId, position: Position },
    /// A marker was clicked, which deletes it.
    MarkerClicked(MarkerId),
    /// The "delete all" control was pressed.
    DeleteAllClicked,
}

/// Render model for one marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerView {
    /// 1-based position in the current ordering.
    pub label: String,
    pub title: String,
    pub position: Position,
    pub id: Option<MarkerId>,
    /// Pending markers cannot be dragged or deleted until the store assigns an id.
    pub draggable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A message for the user, e.g. a toast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Build the render models for an ordered marker list.
pub fn render_markers(markers: &[Marker]) -> Vec<MarkerView> {
    markers
        .iter()
        .enumerate()
        .map(|(idx, marker)| MarkerView {
            label: (idx + 1).to_string(),
            title: marker.description.clone().unwrap_or_default(),
            position: marker.position,
            id: marker.id.clone(),
            draggable: marker.is_confirmed(),
        })
        .collect()
}

/// Map screen state machine.
pub struct MapController {
    repository: Arc<MarkerRepository>,
    pending_description: Option<String>,
    notices: Vec<Notice>,
}

impl MapController {
    pub fn new(repository: Arc<MarkerRepository>) -> Self {
        Self {
            repository,
            pending_description: None,
            notices: Vec::new(),
        }
    }

    pub fn repository(&self) -> &Arc<MarkerRepository> {
        &self.repository
    }

    pub fn pending_description(&self) -> Option<&str> {
        self.pending_description.as_deref()
    }

    /// Current render models, labels included.
    pub fn render(&self) -> Vec<MarkerView> {
        render_markers(&self.repository.markers())
    }

    /// Drain the notices produced since the last call.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Apply one interaction.
    ///
    /// Failures are returned and also queued as error notices.
    pub async fn handle(&mut self, event: MapEvent) -> MarkerResult<()> {
        match event {
            MapEvent::DescriptionChanged(text) => {
                self.pending_description = Some(text).filter(|t| !t.is_empty());
                Ok(())
            }
            MapEvent::MapClicked(position) => self.place(position).await,
            MapEvent::MarkerDragged { id, position } => {
                let result = self.repository.move_marker(&id, position).await;
                result.map_err(|err| self.report("Error updating marker", err))
            }
            MapEvent::MarkerClicked(id) => {
                let result = self.repository.remove_marker(&id).await;
                result.map_err(|err| self.report("Error deleting marker", err))
            }
            MapEvent::DeleteAllClicked => {
                let result = self.repository.remove_all_markers().await;
                match result {
                    Ok(count) => {
                        self.notices.push(Notice::info(format!("Deleted {count} markers")));
                        Ok(())
                    }
                    Err(err) => Err(self.report("Error deleting all markers", err)),
                }
            }
        }
    }

    async fn place(&mut self, position: Position) -> MarkerResult<()> {
        let Some(description) = self.pending_description.clone() else {
            debug!(%position, "Map click ignored, no quest description entered");
            return Ok(());
        };

        let result = self
            .repository
            .place_marker(position, Some(description))
            .await;
        match result {
            Ok(_) => {
                self.pending_description = None;
                Ok(())
            }
            Err(err) => Err(self.report("Error adding marker", err)),
        }
    }

    fn report<E: std::fmt::Display>(&mut self, context: &str, err: E) -> E {
        self.notices.push(Notice::error(format!("{context}: {err}")));
        err
    }
}
