//! drawroom — server-authoritative collaborative drawing canvas.
//!
//! Rooms hold an ordered log of drawing operations. Clients speak a frame
//! protocol over one websocket: strokes stream in as start/points/end,
//! the server assigns canonical identities and order, and a global
//! undo/redo history applies per room. `predict` is the client-side
//! counterpart: optimistic local echo reconciled to server identities.

pub mod frame;
pub mod log;
pub mod predict;
pub mod routes;
pub mod services;
pub mod state;
