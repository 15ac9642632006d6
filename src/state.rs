//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the map of live rooms. Each room has its own user profiles,
//! connected clients, and drawing log. Rooms are created lazily on first
//! join and evicted when the last client parts.
//!
//! CONCURRENCY
//! ===========
//! The room map sits behind one `RwLock`. Every log mutation happens with
//! the write guard held and never awaits, so operations on a room's log
//! are atomic with respect to each other. The committed history and redo
//! stack are reachable only through `DrawingLog` methods; `snapshot()`
//! hands out copies, never aliasable handles.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::frame::Frame;
use crate::log::DrawingLog;

// =============================================================================
// USER PROFILE
// =============================================================================

/// A participant's presence record. The id equals the connection's session
/// identity; the color is assigned at join time and stable for the
/// connection's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub color: String,
}

// =============================================================================
// ROOM STATE
// =============================================================================

/// Per-room live state. Exists while at least one client is connected.
pub struct RoomState {
    /// Present users keyed by connection id.
    pub users: HashMap<Uuid, UserProfile>,
    /// Connected clients: connection id -> sender for outgoing frames.
    pub clients: HashMap<Uuid, mpsc::Sender<Frame>>,
    /// The room's operation log.
    pub log: DrawingLog,
}

impl RoomState {
    #[must_use]
    pub fn new() -> Self {
        Self { users: HashMap::new(), clients: HashMap::new(), log: DrawingLog::new() }
    }
}

impl Default for RoomState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum — the room map is Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RwLock<HashMap<String, RoomState>>>,
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self { rooms: Arc::new(RwLock::new(HashMap::new())) }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
