//! Room service — join/part, presence, lifecycle, and broadcast.
//!
//! DESIGN
//! ======
//! Rooms are keyed by a caller-supplied string and created lazily on first
//! join. Room state is reference-counted by connected clients: when the
//! last client parts, the whole room (users, log, redo stack) is evicted
//! from memory. There is no explicit delete operation.
//!
//! Display colors come from a fixed hue palette so presence markers stay
//! legible; the assignment is random per join and stable for the
//! connection's lifetime.

use rand::Rng;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::frame::Frame;
use crate::log::StrokeOp;
use crate::state::{AppState, RoomState, UserProfile};

// =============================================================================
// TYPES
// =============================================================================

/// Longest accepted room identifier, in characters.
pub const MAX_ROOM_ID_LEN: usize = 128;

/// Hues used for presence colors, rendered as `hsl(<hue> 80% 55%)`.
const HUE_PALETTE: [u16; 9] = [0, 30, 60, 120, 180, 210, 240, 270, 300];

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("invalid room id: {0:?}")]
    InvalidRoomId(String),
}

impl crate::frame::ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRoomId(_) => "E_INVALID_ROOM",
        }
    }
}

// =============================================================================
// JOIN / PART
// =============================================================================

/// Join a room, creating it on first reference. Overwrites any existing
/// profile for the connection and returns the new profile together with
/// the committed-history snapshot taken at the same instant.
///
/// # Errors
///
/// Returns `InvalidRoomId` for an empty or oversized room id.
pub async fn join_room(
    state: &AppState,
    room_id: &str,
    client_id: Uuid,
    name: Option<&str>,
    tx: mpsc::Sender<Frame>,
) -> Result<(UserProfile, Vec<StrokeOp>), RoomError> {
    if room_id.is_empty() || room_id.chars().count() > MAX_ROOM_ID_LEN {
        return Err(RoomError::InvalidRoomId(room_id.to_string()));
    }

    let profile = UserProfile {
        id: client_id,
        name: display_name(client_id, name),
        color: pick_color(),
    };

    let mut rooms = state.rooms.write().await;
    let room = rooms.entry(room_id.to_string()).or_insert_with(RoomState::new);
    room.clients.insert(client_id, tx);
    room.users.insert(client_id, profile.clone());
    let snapshot = room.log.snapshot();

    info!(%room_id, %client_id, clients = room.clients.len(), "client joined room");
    Ok((profile, snapshot))
}

/// Leave a room. Returns whether the connection was present. When the last
/// client parts, the room state is evicted from memory, implicitly
/// discarding any in-progress strokes it still held.
pub async fn part_room(state: &AppState, room_id: &str, client_id: Uuid) -> bool {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(room_id) else {
        return false;
    };

    room.clients.remove(&client_id);
    let existed = room.users.remove(&client_id).is_some();
    info!(%room_id, %client_id, remaining = room.clients.len(), "client left room");

    if room.clients.is_empty() {
        rooms.remove(room_id);
        info!(%room_id, "evicted room from memory");
    }
    existed
}

/// Present users of a room in a stable order (by name, then id).
pub async fn list_room_users(state: &AppState, room_id: &str) -> Vec<UserProfile> {
    let rooms = state.rooms.read().await;
    let Some(room) = rooms.get(room_id) else {
        return Vec::new();
    };
    let mut users: Vec<UserProfile> = room.users.values().cloned().collect();
    users.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    users
}

/// Committed-history snapshot for a room. Empty for unknown rooms.
pub async fn snapshot(state: &AppState, room_id: &str) -> Vec<StrokeOp> {
    let rooms = state.rooms.read().await;
    rooms.get(room_id).map_or_else(Vec::new, |room| room.log.snapshot())
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Broadcast a frame to all clients in a room, optionally excluding one.
pub async fn broadcast(state: &AppState, room_id: &str, frame: &Frame, exclude: Option<Uuid>) {
    let rooms = state.rooms.read().await;
    let Some(room) = rooms.get(room_id) else {
        return;
    };

    for (client_id, tx) in &room.clients {
        if exclude == Some(*client_id) {
            continue;
        }
        // Best-effort: if a client's channel is full, skip it.
        let _ = tx.try_send(frame.clone());
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Display name, falling back to a suffix of the connection id.
fn display_name(client_id: Uuid, name: Option<&str>) -> String {
    match name.map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => {
            let id = client_id.to_string();
            let suffix = &id[id.len() - 4..];
            format!("User-{suffix}")
        }
    }
}

/// Pick a presence color from the fixed hue palette.
fn pick_color() -> String {
    let hue = HUE_PALETTE[rand::rng().random_range(0..HUE_PALETTE.len())];
    format!("hsl({hue} 80% 55%)")
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
