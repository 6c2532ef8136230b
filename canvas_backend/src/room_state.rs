use crate::shared_types::{CommandRequest, DrawStatus, Notification, RoomView, Stroke};
use chrono::Utc;
use std::{collections::HashMap, mem};
use thiserror::Error;

// Key used for in-progress strokes when a client does not identify itself.
const ANONYMOUS_CLIENT: &str = "anonymous";

/// Why a submitted command was rejected before touching any room.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("missing command type")]
    MissingType,
    #[error("unknown command type: {0}")]
    UnknownType(String),
    #[error("unknown draw status: {0}")]
    UnknownStatus(String),
    #[error("draw command requires a line")]
    MissingLine,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    DrawInProgress { line: Stroke },
    DrawComplete { line: Stroke, lines: Option<Vec<Stroke>> },
    Undo { lines: Option<Vec<Stroke>> },
    Redo,
    Sync,
}

/// A validated command, ready to be applied to a room.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub action: Action,
    pub client_id: Option<String>,
    pub timestamp: i64,
}

impl TryFrom<CommandRequest> for Command {
    type Error = CommandError;

    fn try_from(request: CommandRequest) -> Result<Self, Self::Error> {
        let kind = request.kind.ok_or(CommandError::MissingType)?;

        let action = match kind.as_str() {
            "draw" => {
                let line = request.line.ok_or(CommandError::MissingLine)?;
                // The first version of the protocol had no status and
                // every draw was a finished stroke.
                match request.status.as_deref().unwrap_or("complete") {
                    "in-progress" => Action::DrawInProgress { line },
                    "complete" => Action::DrawComplete {
                        line,
                        lines: request.lines,
                    },
                    other => return Err(CommandError::UnknownStatus(other.to_string())),
                }
            }
            "undo" => Action::Undo {
                lines: request.lines,
            },
            "redo" => Action::Redo,
            "sync" => Action::Sync,
            _ => return Err(CommandError::UnknownType(kind)),
        };

        Ok(Command {
            action,
            client_id: request.client_id,
            timestamp: request
                .timestamp
                .unwrap_or_else(|| Utc::now().timestamp_millis()),
        })
    }
}

/// Result of applying one command: the view for the submitter and the
/// notification for every listener of the room.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub view: RoomView,
    pub notification: Notification,
}

/// Authoritative canvas state of a single room.
///
/// Commands must be applied one at a time; callers serialise access with
/// the room's lock.
#[derive(Debug, Default)]
pub struct RoomState {
    lines: Vec<Stroke>,
    undo_stack: Vec<Vec<Stroke>>,
    redo_stack: Vec<Vec<Stroke>>,
    in_progress: HashMap<String, Stroke>,
}

impl RoomState {
    pub fn view(&self) -> RoomView {
        RoomView {
            lines: self.lines.clone(),
        }
    }

    pub fn apply(&mut self, command: Command) -> Applied {
        let Command {
            action,
            client_id,
            timestamp,
        } = command;
        let client_key = client_id
            .clone()
            .unwrap_or_else(|| ANONYMOUS_CLIENT.to_string());

        let notification = match action {
            Action::DrawInProgress { line } => {
                self.in_progress.insert(client_key, line.clone());
                Notification::Draw {
                    status: DrawStatus::InProgress,
                    line,
                    lines: None,
                    timestamp,
                    client_id,
                }
            }
            Action::DrawComplete { line, lines } => {
                let next = lines.unwrap_or_else(|| {
                    let mut next = self.lines.clone();
                    next.push(line.clone());
                    next
                });
                self.undo_stack.push(mem::replace(&mut self.lines, next));
                self.redo_stack.clear();
                self.in_progress.remove(&client_key);
                Notification::Draw {
                    status: DrawStatus::Complete,
                    line,
                    lines: Some(self.lines.clone()),
                    timestamp,
                    client_id,
                }
            }
            Action::Undo { lines } => {
                if !self.lines.is_empty() {
                    let target = lines
                        .unwrap_or_else(|| self.lines[..self.lines.len() - 1].to_vec());
                    let undone = mem::replace(&mut self.lines, target);
                    // Redo only ever restores the state right before the latest undo.
                    self.redo_stack.clear();
                    self.redo_stack.push(undone);
                }
                Notification::Undo {
                    lines: self.lines.clone(),
                    timestamp,
                    client_id,
                }
            }
            Action::Redo => {
                // The replaced lines are dropped, not pushed to the undo stack.
                if let Some(snapshot) = self.redo_stack.pop() {
                    self.lines = snapshot;
                }
                Notification::Redo {
                    lines: self.lines.clone(),
                    timestamp,
                    client_id,
                }
            }
            Action::Sync => Notification::Sync {
                lines: self.lines.clone(),
                timestamp,
                client_id,
            },
        };

        Applied {
            view: self.view(),
            notification,
        }
    }
}

#[cfg(test)]
impl RoomState {
    pub(crate) fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub(crate) fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    pub(crate) fn in_progress_for(&self, client: &str) -> Option<&Stroke> {
        self.in_progress.get(client)
    }
}
