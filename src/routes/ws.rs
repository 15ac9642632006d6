//! WebSocket handler — bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, generates a connection id (which doubles as the user's
//! session identity) and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Broadcast frames from room peers → forward to client
//!
//! Handler functions are pure business logic — they validate, mutate state,
//! and return an `Outcome`. The dispatch layer owns all outbound concerns:
//! reply to sender and broadcast to peers.
//!
//! The stroke identity handshake lives here: `stroke:start` allocates the
//! canonical operation id and acks it to the sender before any peer can
//! observe points for it, while the start notice primes every
//! reconciliation table in the room.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id`
//! 2. Client sends frames → dispatch → handler returns Outcome
//! 3. Dispatch applies Outcome (reply / broadcast / both)
//! 4. Close → broadcast `room:leave` + refreshed `room:users` → cleanup

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::log::{ApplyOutcome, EndOutcome, StrokeOp};
use crate::services;
use crate::state::AppState;

/// Room joined when the client names none.
const DEFAULT_ROOM_ID: &str = "lobby";

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what — handlers never send frames directly (the
/// join handler's presence refresh is the one exception).
enum Outcome {
    /// Reply done+data to the sender and send the same data to all peers
    /// as a standalone request notice. The sender's copy is the correlated
    /// reply; peers never see replies to requests they did not send.
    Broadcast(Data),
    /// Broadcast data to all room peers EXCLUDING sender. No reply to
    /// sender. Used for cursor moves and point relays (ephemeral).
    BroadcastExcludeSender(Data),
    /// Send done+data to sender only.
    Reply(Data),
    /// Send empty done to sender only.
    Done,
    /// Nothing at all: silently dropped request (stale or unauthorized
    /// stroke messages are indistinguishable from lost ones by design).
    Silent,
    /// Reply to sender, notify peers (excluding sender) with a fresh
    /// request frame carrying different data.
    ReplyAndNotifyPeers { reply: Data, notify: Data },
    /// Reply to sender, notify the whole room including the sender.
    ReplyAndNotifyRoom { reply: Data, notify: Data },
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    // The connection id is the session identity: operation authorship and
    // presence both key on it.
    let client_id = Uuid::new_v4();

    // Per-connection channel for receiving broadcast frames from peers.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(256);

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("client_id", client_id.to_string())
        .with_data("user_id", client_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%client_id, "ws: client connected");

    // Track which room this client has joined.
    let mut current_room: Option<String> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        dispatch_frame(&state, &mut socket, &mut current_room, client_id, &client_tx, text.as_str()).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    // Announce departure BEFORE cleanup (part may evict the room).
    if let Some(room_id) = current_room {
        announce_part(&state, &room_id, client_id).await;
    }
    info!(%client_id, "ws: client disconnected");
}

/// Remove the client from a room and push presence updates to whoever is
/// left: a `room:leave` notice plus a refreshed `room:users` list.
async fn announce_part(state: &AppState, room_id: &str, client_id: Uuid) {
    let mut leave_data = Data::new();
    leave_data.insert("user_id".into(), serde_json::json!(client_id));
    let leave = Frame::request("room:leave", leave_data).with_room_id(room_id);
    services::room::broadcast(state, room_id, &leave, Some(client_id)).await;

    if services::room::part_room(state, room_id, client_id).await {
        broadcast_room_users(state, room_id, None).await;
    }
}

/// Push the ordered presence list to the room.
async fn broadcast_room_users(state: &AppState, room_id: &str, exclude: Option<Uuid>) {
    let users = services::room::list_room_users(state, room_id).await;
    if users.is_empty() {
        return;
    }
    let mut data = Data::new();
    data.insert("users".into(), serde_json::to_value(&users).unwrap_or_default());
    let frame = Frame::request("room:users", data).with_room_id(room_id);
    services::room::broadcast(state, room_id, &frame, exclude).await;
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse an incoming JSON frame, dispatch to handler, apply outcome.
async fn dispatch_frame(
    state: &AppState,
    socket: &mut WebSocket,
    current_room: &mut Option<String>,
    client_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) {
    let sender_frames = process_inbound_text(state, current_room, client_id, client_tx, text).await;
    for frame in sender_frames {
        let _ = send_frame(socket, &frame).await;
    }
}

/// Parse and process one inbound text frame and return frames for the
/// sender. Split from the socket loop so tests can exercise dispatch and
/// broadcast behavior end-to-end without a live websocket.
async fn process_inbound_text(
    state: &AppState,
    current_room: &mut Option<String>,
    client_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            let mut err = Frame::request("gateway:error", Data::new())
                .with_data("message", format!("invalid json: {e}"));
            err.status = crate::frame::Status::Error;
            return vec![err];
        }
    };

    // Stamp the connection identity as `from`.
    req.from = Some(client_id.to_string());

    let prefix = req.prefix();
    if prefix != "cursor" {
        info!(%client_id, id = %req.id, syscall = %req.syscall, status = ?req.status, "ws: recv frame");
    }

    // Dispatch to handler — returns Outcome or error Frame.
    let result = match prefix {
        "room" => handle_room(state, current_room, client_id, client_tx, &req).await,
        "stroke" => handle_stroke(state, current_room.as_deref(), client_id, &req).await,
        "history" => handle_history(state, current_room.as_deref(), &req).await,
        "cursor" => Ok(handle_cursor(current_room.as_deref(), client_id, &req)),
        _ => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    // Apply outcome — the dispatch layer owns all outbound logic.
    let room_id = current_room.clone();
    match result {
        Ok(Outcome::Broadcast(data)) => {
            let sender_frame = req.done_with(data.clone());
            // Peers did not originate the request: they get a standalone
            // notice, never a stray reply.
            if let Some(rid) = &room_id {
                let notice = Frame::request(req.syscall.as_str(), data)
                    .with_room_id(rid.clone())
                    .with_from(client_id.to_string());
                services::room::broadcast(state, rid, &notice, Some(client_id)).await;
            }
            vec![sender_frame]
        }
        Ok(Outcome::BroadcastExcludeSender(data)) => {
            if let Some(rid) = &room_id {
                let frame = Frame::request(req.syscall.as_str(), data)
                    .with_room_id(rid.clone())
                    .with_from(client_id.to_string());
                services::room::broadcast(state, rid, &frame, Some(client_id)).await;
            }
            vec![]
        }
        Ok(Outcome::Reply(data)) => {
            vec![req.done_with(data)]
        }
        Ok(Outcome::Done) => {
            vec![req.done()]
        }
        Ok(Outcome::Silent) => vec![],
        Ok(Outcome::ReplyAndNotifyPeers { reply, notify }) => {
            let sender_frame = req.done_with(reply);
            if let Some(rid) = &room_id {
                let notif = Frame::request(req.syscall.as_str(), notify).with_room_id(rid.clone());
                services::room::broadcast(state, rid, &notif, Some(client_id)).await;
            }
            vec![sender_frame]
        }
        Ok(Outcome::ReplyAndNotifyRoom { reply, notify }) => {
            let sender_frame = req.done_with(reply);
            if let Some(rid) = &room_id {
                let notif = Frame::request(req.syscall.as_str(), notify).with_room_id(rid.clone());
                services::room::broadcast(state, rid, &notif, None).await;
            }
            vec![sender_frame]
        }
        Err(err_frame) => {
            vec![err_frame]
        }
    }
}

// =============================================================================
// ROOM HANDLERS
// =============================================================================

async fn handle_room(
    state: &AppState,
    current_room: &mut Option<String>,
    client_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Result<Outcome, Frame> {
    match req.op() {
        "join" => {
            let room_id = req
                .room_id
                .clone()
                .or_else(|| {
                    req.data
                        .get("room_id")
                        .and_then(|v| v.as_str())
                        .map(ToString::to_string)
                })
                .unwrap_or_else(|| DEFAULT_ROOM_ID.to_string());
            let name = req.data.get("name").and_then(|v| v.as_str());

            // Part the current room if already joined elsewhere.
            if let Some(old_room) = current_room.take() {
                if old_room != room_id {
                    announce_part(state, &old_room, client_id).await;
                }
            }

            match services::room::join_room(state, &room_id, client_id, name, client_tx.clone()).await {
                Ok((profile, snapshot)) => {
                    *current_room = Some(room_id.clone());
                    let users = services::room::list_room_users(state, &room_id).await;

                    let mut reply = Data::new();
                    reply.insert("user_id".into(), serde_json::json!(client_id));
                    reply.insert("user".into(), serde_json::to_value(&profile).unwrap_or_default());
                    reply.insert("users".into(), serde_json::to_value(&users).unwrap_or_default());
                    reply.insert("operations".into(), serde_json::to_value(&snapshot).unwrap_or_default());

                    let mut notify = Data::new();
                    notify.insert("user_id".into(), serde_json::json!(client_id));
                    notify.insert("user".into(), serde_json::to_value(&profile).unwrap_or_default());

                    // Presence refresh goes to the whole room, joiner included.
                    broadcast_room_users(state, &room_id, None).await;

                    Ok(Outcome::ReplyAndNotifyPeers { reply, notify })
                }
                Err(e) => Err(req.error_from(&e)),
            }
        }
        // Resync: re-running join semantics without membership churn. The
        // client replaces its local history wholesale with the reply.
        "snapshot" => {
            let Some(room_id) = current_room.as_deref() else {
                return Err(req.error("must join a room first"));
            };
            let snapshot = services::room::snapshot(state, room_id).await;
            let mut reply = Data::new();
            reply.insert("operations".into(), serde_json::to_value(&snapshot).unwrap_or_default());
            Ok(Outcome::Reply(reply))
        }
        op => Err(req.error(format!("unknown room op: {op}"))),
    }
}

// =============================================================================
// STROKE HANDLERS
// =============================================================================

async fn handle_stroke(
    state: &AppState,
    current_room: Option<&str>,
    client_id: Uuid,
    req: &Frame,
) -> Result<Outcome, Frame> {
    let Some(room_id) = current_room else {
        return Err(req.error("must join a room first"));
    };

    match req.op() {
        "start" => {
            let meta = services::stroke::meta_from_data(&req.data);
            let Some(op) = services::stroke::start_stroke(state, room_id, client_id, &meta).await else {
                return Err(req.error("must join a room first"));
            };

            let mut reply = Data::new();
            reply.insert("op_id".into(), serde_json::json!(op.id));
            reply.insert("meta".into(), meta_to_value(&op));

            let mut notify = Data::new();
            notify.insert("user_id".into(), serde_json::json!(client_id));
            notify.insert("op_id".into(), serde_json::json!(op.id));
            notify.insert("meta".into(), meta_to_value(&op));

            Ok(Outcome::ReplyAndNotifyRoom { reply, notify })
        }
        "points" => {
            let Some(op_id) = parse_op_id(req) else {
                return Ok(Outcome::Silent);
            };
            let points = services::stroke::points_from_data(&req.data);
            match services::stroke::append_points(state, room_id, client_id, op_id, &points).await {
                ApplyOutcome::Applied { accepted } if accepted > 0 => {
                    // Relay only the sanitized batch so receivers never see
                    // points the log itself refused.
                    let kept: Vec<_> = points.iter().filter(|p| p.is_well_formed()).collect();
                    let mut data = Data::new();
                    data.insert("user_id".into(), serde_json::json!(client_id));
                    data.insert("op_id".into(), serde_json::json!(op_id));
                    data.insert("points".into(), serde_json::to_value(kept).unwrap_or_default());
                    Ok(Outcome::BroadcastExcludeSender(data))
                }
                ApplyOutcome::Applied { .. } | ApplyOutcome::Rejected(_) => Ok(Outcome::Silent),
            }
        }
        "end" => {
            let Some(op_id) = parse_op_id(req) else {
                return Ok(Outcome::Silent);
            };
            match services::stroke::end_stroke(state, room_id, client_id, op_id).await {
                EndOutcome::Committed(op) => {
                    let mut data = Data::new();
                    data.insert("op_id".into(), serde_json::json!(op.id));
                    Ok(Outcome::Broadcast(data))
                }
                // Discarded or stale: ack the request, announce nothing.
                EndOutcome::Discarded | EndOutcome::Rejected(_) => Ok(Outcome::Done),
            }
        }
        op => Err(req.error(format!("unknown stroke op: {op}"))),
    }
}

// =============================================================================
// HISTORY HANDLERS
// =============================================================================

async fn handle_history(state: &AppState, current_room: Option<&str>, req: &Frame) -> Result<Outcome, Frame> {
    let Some(room_id) = current_room else {
        return Err(req.error("must join a room first"));
    };

    match req.op() {
        "undo" => match services::stroke::undo(state, room_id).await {
            Some(op) => {
                let mut data = Data::new();
                data.insert("op_id".into(), serde_json::json!(op.id));
                Ok(Outcome::Broadcast(data))
            }
            None => Ok(Outcome::Done),
        },
        // Redo carries the full operation: receivers append it directly
        // instead of resyncing, since no new identity is created.
        "redo" => match services::stroke::redo(state, room_id).await {
            Some(op) => {
                let mut data = Data::new();
                data.insert("op".into(), serde_json::to_value(&op).unwrap_or_default());
                Ok(Outcome::Broadcast(data))
            }
            None => Ok(Outcome::Done),
        },
        op => Err(req.error(format!("unknown history op: {op}"))),
    }
}

// =============================================================================
// CURSOR HANDLER
// =============================================================================

fn handle_cursor(current_room: Option<&str>, client_id: Uuid, req: &Frame) -> Outcome {
    if current_room.is_none() {
        // Silently ignore cursor moves before joining.
        return Outcome::Silent;
    }

    let x = req
        .data
        .get("x")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(0.0);
    let y = req
        .data
        .get("y")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(0.0);

    let mut data = Data::new();
    data.insert("user_id".into(), serde_json::json!(client_id));
    data.insert("x".into(), serde_json::json!(x));
    data.insert("y".into(), serde_json::json!(y));

    Outcome::BroadcastExcludeSender(data)
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    let is_cursor = frame.syscall.starts_with("cursor:");
    if !is_cursor {
        if frame.status == crate::frame::Status::Error {
            let message = frame
                .data
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("-");
            warn!(id = %frame.id, syscall = %frame.syscall, message, "ws: send frame status=Error");
        } else {
            info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
        }
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

fn parse_op_id(req: &Frame) -> Option<Uuid> {
    req.data
        .get("op_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
}

/// Normalized stroke metadata as a payload value.
fn meta_to_value(op: &StrokeOp) -> serde_json::Value {
    serde_json::json!({
        "color": op.color,
        "width": op.width,
        "mode": op.mode,
    })
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
