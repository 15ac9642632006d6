//! Domain services used by the websocket dispatch layer.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and state mutation so the websocket
//! handler can stay focused on frame parsing and outbound fan-out.

pub mod room;
pub mod stroke;
pub mod sweep;
