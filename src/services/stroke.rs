//! Stroke service — drawing operations addressed through `AppState`.
//!
//! DESIGN
//! ======
//! Thin orchestration over `DrawingLog`: resolve the room, apply the log
//! operation under the write guard, and hand the outcome back for the
//! dispatch layer to broadcast. Payload parsing lives here too, so the
//! websocket handler never inspects stroke data shapes.
//!
//! ERROR HANDLING
//! ==============
//! Rejections (unknown operation, non-author) are logged at debug and
//! surface to the dispatcher as tagged outcomes; nothing extra is emitted
//! on the wire. A missing room degrades to `UnknownOperation`, which keeps
//! late messages from evicted rooms harmless.

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::frame::Data;
use crate::log::{ApplyOutcome, EndOutcome, Point, RawStrokeMeta, RejectReason, StrokeOp};
use crate::state::AppState;

// =============================================================================
// PAYLOAD PARSING
// =============================================================================

/// Extract stroke metadata from a request payload. Missing or mistyped
/// fields become `None` and fall to the log's defaults.
#[must_use]
pub fn meta_from_data(data: &Data) -> RawStrokeMeta {
    RawStrokeMeta {
        color: data
            .get("color")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        width: data.get("width").and_then(Value::as_f64),
        mode: data
            .get("mode")
            .and_then(Value::as_str)
            .map(ToString::to_string),
    }
}

/// Extract a point batch from a request payload. Entries that are not
/// objects with numeric `x` and `y` are dropped individually; order of the
/// surviving points is preserved.
#[must_use]
pub fn points_from_data(data: &Data) -> Vec<Point> {
    let Some(batch) = data.get("points").and_then(Value::as_array) else {
        return Vec::new();
    };
    batch
        .iter()
        .filter_map(|entry| {
            let x = entry.get("x").and_then(Value::as_f64)?;
            let y = entry.get("y").and_then(Value::as_f64)?;
            Some(Point { x, y })
        })
        .collect()
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Start a stroke in a room. Returns the normalized operation header with
/// its server-assigned identity, or `None` if the room is not live.
pub async fn start_stroke(state: &AppState, room_id: &str, user_id: Uuid, meta: &RawStrokeMeta) -> Option<StrokeOp> {
    let mut rooms = state.rooms.write().await;
    let room = rooms.get_mut(room_id)?;
    let op = room.log.start_stroke(user_id, meta);
    debug!(%room_id, op_id = %op.id, %user_id, "stroke started");
    Some(op)
}

/// Append a point batch to an in-progress stroke.
pub async fn append_points(
    state: &AppState,
    room_id: &str,
    user_id: Uuid,
    op_id: Uuid,
    points: &[Point],
) -> ApplyOutcome {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(room_id) else {
        return ApplyOutcome::Rejected(RejectReason::UnknownOperation);
    };
    let outcome = room.log.append_points(op_id, user_id, points);
    if let ApplyOutcome::Rejected(reason) = outcome {
        debug!(%room_id, %op_id, %user_id, ?reason, "append rejected");
    }
    outcome
}

/// End a stroke: commit it into history, or discard it if empty.
pub async fn end_stroke(state: &AppState, room_id: &str, user_id: Uuid, op_id: Uuid) -> EndOutcome {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(room_id) else {
        return EndOutcome::Rejected(RejectReason::UnknownOperation);
    };
    let outcome = room.log.end_stroke(op_id, user_id);
    match &outcome {
        EndOutcome::Committed(op) => {
            debug!(%room_id, %op_id, points = op.points.len(), "stroke committed");
        }
        EndOutcome::Discarded => debug!(%room_id, %op_id, "empty stroke discarded"),
        EndOutcome::Rejected(reason) => debug!(%room_id, %op_id, %user_id, ?reason, "end rejected"),
    }
    outcome
}

/// Undo the room's most recent commit. Global: the caller need not be the
/// author of the removed operation.
pub async fn undo(state: &AppState, room_id: &str) -> Option<StrokeOp> {
    let mut rooms = state.rooms.write().await;
    let room = rooms.get_mut(room_id)?;
    let undone = room.log.undo();
    if let Some(op) = &undone {
        debug!(%room_id, op_id = %op.id, "undo");
    }
    undone
}

/// Re-apply the room's most recently undone operation.
pub async fn redo(state: &AppState, room_id: &str) -> Option<StrokeOp> {
    let mut rooms = state.rooms.write().await;
    let room = rooms.get_mut(room_id)?;
    let redone = room.log.redo();
    if let Some(op) = &redone {
        debug!(%room_id, op_id = %op.id, "redo");
    }
    redone
}

#[cfg(test)]
#[path = "stroke_test.rs"]
mod tests;
