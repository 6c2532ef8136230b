use crate::{
    handlers::AppError,
    registry::RoomRegistry,
    room_state::Command,
    shared_types::{CommandRequest, RoomView},
};
use std::sync::Arc;
use tracing::debug;

/// Runs draw/undo/redo commands against rooms and fans the results out.
#[derive(Clone)]
pub struct CommandHandler {
    registry: Arc<RoomRegistry>,
}

impl CommandHandler {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    /// Current view of a room. Unknown rooms are created empty.
    pub async fn fetch(&self, room_id: &str) -> RoomView {
        let room = self.registry.get_or_create(room_id).await;
        let state = room.state.lock().await;
        state.view()
    }

    /// Validate and apply a command, returning the room's new view.
    ///
    /// Application runs on its own task: once accepted, a command is applied
    /// and broadcast even if the caller goes away before the reply.
    pub async fn execute(
        &self,
        room_id: &str,
        request: CommandRequest,
    ) -> Result<RoomView, AppError> {
        let command = Command::try_from(request)?;
        let registry = Arc::clone(&self.registry);
        let room_id = room_id.to_string();

        let view = tokio::spawn(async move { apply(&registry, &room_id, command).await }).await?;
        Ok(view)
    }
}

async fn apply(registry: &RoomRegistry, room_id: &str, command: Command) -> RoomView {
    let room = registry.get_or_create(room_id).await;
    let mut state = room.state.lock().await;

    let applied = state.apply(command);
    // Publishing under the room lock keeps broadcast order equal to apply order.
    let delivered = registry.publish(room_id, &applied.notification).await;

    debug!(
        room = %room_id,
        kind = applied.notification.kind(),
        lines = applied.view.lines.len(),
        delivered,
        "Applied command"
    );
    applied.view
}
