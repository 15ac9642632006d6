//! `DrawingLog` — the per-room operation state machine.
//!
//! DESIGN
//! ======
//! Every drawing gesture is an operation: started with server-normalized
//! metadata, accumulated point by point, then either committed into the
//! ordered history or discarded. The log owns three pieces of state:
//! the committed history (append-only except undo), the in-progress map
//! keyed by operation id, and the redo stack. Undo/redo is a single global
//! linear history shared by every participant — any user may undo any
//! other user's most recent commit. A fresh commit invalidates the redo
//! stack; redo itself does not.
//!
//! ERROR HANDLING
//! ==============
//! Append/commit against an unknown operation or by a non-author return a
//! tagged `Rejected` outcome instead of an error. Callers log the reason
//! and emit nothing on the wire, so stale or duplicate network messages
//! degrade to no-ops.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Lower bound for stroke width after normalization.
pub const MIN_STROKE_WIDTH: f64 = 1.0;

/// Upper bound for stroke width after normalization.
pub const MAX_STROKE_WIDTH: f64 = 64.0;

/// Stroke width applied when the client sends none.
pub const DEFAULT_STROKE_WIDTH: f64 = 2.0;

/// Stroke color applied when the client sends none.
pub const DEFAULT_STROKE_COLOR: &str = "#000000";

// =============================================================================
// TYPES
// =============================================================================

/// A single 2D point. Temporal order is array order; there are no per-point
/// sequence numbers (the transport delivers in order per connection).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    /// Both coordinates must be finite to enter the log.
    #[must_use]
    pub fn is_well_formed(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// How a stroke's points are later painted. Erase and draw share the same
/// representation end to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeMode {
    #[default]
    Draw,
    Erase,
}

/// Client-supplied stroke metadata before normalization. Every field is
/// optional; normalization fills defaults and clamps ranges.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStrokeMeta {
    pub color: Option<String>,
    pub width: Option<f64>,
    pub mode: Option<String>,
}

/// One committed or in-progress drawing operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeOp {
    /// Canonical identity: unique within the room for the op's lifetime.
    pub id: Uuid,
    pub user_id: Uuid,
    pub mode: StrokeMode,
    pub color: String,
    pub width: f64,
    pub points: Vec<Point>,
}

impl StrokeOp {
    /// Build an empty operation from raw metadata: fill defaults, clamp the
    /// width, coerce unknown modes to draw.
    #[must_use]
    pub fn from_meta(id: Uuid, user_id: Uuid, meta: &RawStrokeMeta) -> Self {
        Self {
            id,
            user_id,
            mode: normalize_mode(meta.mode.as_deref()),
            color: normalize_color(meta.color.as_deref()),
            width: normalize_width(meta.width),
            points: Vec::new(),
        }
    }
}

/// In-progress entry: the accumulating operation plus its idle clock.
#[derive(Debug)]
struct InProgress {
    op: StrokeOp,
    last_touched: Instant,
}

/// Why an append or commit was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No in-progress entry exists for the identity.
    UnknownOperation,
    /// The caller is not the connection that started the operation.
    NotAuthor,
}

/// Tagged result of `append_points`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Points were appended; `accepted` counts well-formed points kept.
    Applied { accepted: usize },
    Rejected(RejectReason),
}

/// Tagged result of `end_stroke`.
#[derive(Debug, Clone, PartialEq)]
pub enum EndOutcome {
    /// The operation entered committed history. Carries the full op for
    /// broadcast.
    Committed(StrokeOp),
    /// The operation had zero points and was dropped without a trace.
    Discarded,
    Rejected(RejectReason),
}

// =============================================================================
// DRAWING LOG
// =============================================================================

/// Per-room ordered history of committed operations, in-progress entries,
/// and the redo stack. Exclusively owned by its room; all mutation goes
/// through these methods.
#[derive(Debug, Default)]
pub struct DrawingLog {
    committed: Vec<StrokeOp>,
    in_progress: HashMap<Uuid, InProgress>,
    redo_stack: Vec<StrokeOp>,
}

impl DrawingLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new operation: normalize metadata, allocate a fresh canonical
    /// identity, insert a Started entry. Never fails.
    pub fn start_stroke(&mut self, user_id: Uuid, meta: &RawStrokeMeta) -> StrokeOp {
        self.start_stroke_at(user_id, meta, Instant::now())
    }

    fn start_stroke_at(&mut self, user_id: Uuid, meta: &RawStrokeMeta, now: Instant) -> StrokeOp {
        let op = StrokeOp::from_meta(Uuid::new_v4(), user_id, meta);
        self.in_progress
            .insert(op.id, InProgress { op: op.clone(), last_touched: now });
        op
    }

    /// Append a batch of points to an in-progress operation.
    ///
    /// Only the authoring connection may append. Malformed points are
    /// dropped individually; the valid subset is appended in the order
    /// given. Refreshes the entry's idle clock.
    pub fn append_points(&mut self, op_id: Uuid, user_id: Uuid, points: &[Point]) -> ApplyOutcome {
        self.append_points_at(op_id, user_id, points, Instant::now())
    }

    fn append_points_at(&mut self, op_id: Uuid, user_id: Uuid, points: &[Point], now: Instant) -> ApplyOutcome {
        let Some(entry) = self.in_progress.get_mut(&op_id) else {
            return ApplyOutcome::Rejected(RejectReason::UnknownOperation);
        };
        if entry.op.user_id != user_id {
            return ApplyOutcome::Rejected(RejectReason::NotAuthor);
        }

        let before = entry.op.points.len();
        entry
            .op
            .points
            .extend(points.iter().copied().filter(|p| p.is_well_formed()));
        entry.last_touched = now;

        ApplyOutcome::Applied { accepted: entry.op.points.len() - before }
    }

    /// End an in-progress operation.
    ///
    /// With at least one accumulated point the operation is committed:
    /// removed from in-progress, appended to history, and the redo stack is
    /// cleared. With zero points the entry is discarded and never enters
    /// history. Author mismatch leaves the entry untouched.
    pub fn end_stroke(&mut self, op_id: Uuid, user_id: Uuid) -> EndOutcome {
        match self.in_progress.get(&op_id) {
            None => return EndOutcome::Rejected(RejectReason::UnknownOperation),
            Some(entry) if entry.op.user_id != user_id => {
                return EndOutcome::Rejected(RejectReason::NotAuthor);
            }
            Some(_) => {}
        }

        let Some(entry) = self.in_progress.remove(&op_id) else {
            return EndOutcome::Rejected(RejectReason::UnknownOperation);
        };
        if entry.op.points.is_empty() {
            return EndOutcome::Discarded;
        }

        let op = entry.op;
        self.committed.push(op.clone());
        self.redo_stack.clear();
        EndOutcome::Committed(op)
    }

    /// Remove the most recent committed operation and push it onto the redo
    /// stack. Returns `None` on an empty history.
    pub fn undo(&mut self) -> Option<StrokeOp> {
        let op = self.committed.pop()?;
        self.redo_stack.push(op.clone());
        Some(op)
    }

    /// Re-apply the most recently undone operation. Returns `None` when the
    /// redo stack is empty. Redo does not clear the redo stack; only a
    /// fresh commit does.
    pub fn redo(&mut self) -> Option<StrokeOp> {
        let op = self.redo_stack.pop()?;
        self.committed.push(op.clone());
        Some(op)
    }

    /// Full committed history, in order, as a deep copy. Callers cannot
    /// mutate log state through the returned value.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StrokeOp> {
        self.committed.clone()
    }

    /// Drop in-progress entries idle longer than `ttl` and return their
    /// identities. Expiry is an implicit Discard: the entry never enters
    /// history and its identity is forgotten.
    pub fn expire_idle(&mut self, ttl: Duration) -> Vec<Uuid> {
        self.expire_idle_at(ttl, Instant::now())
    }

    fn expire_idle_at(&mut self, ttl: Duration, now: Instant) -> Vec<Uuid> {
        let expired: Vec<Uuid> = self
            .in_progress
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_touched) > ttl)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.in_progress.remove(id);
        }
        expired
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    #[must_use]
    pub fn committed_len(&self) -> usize {
        self.committed.len()
    }

    #[must_use]
    pub fn in_progress_len(&self) -> usize {
        self.in_progress.len()
    }

    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }
}

// =============================================================================
// NORMALIZATION
// =============================================================================

fn normalize_mode(mode: Option<&str>) -> StrokeMode {
    match mode {
        Some("erase") => StrokeMode::Erase,
        _ => StrokeMode::Draw,
    }
}

fn normalize_color(color: Option<&str>) -> String {
    match color {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => DEFAULT_STROKE_COLOR.to_string(),
    }
}

// Non-positive widths count as absent, not as "thinnest possible".
fn normalize_width(width: Option<f64>) -> f64 {
    let w = match width {
        Some(w) if w.is_finite() && w > 0.0 => w,
        _ => DEFAULT_STROKE_WIDTH,
    };
    w.clamp(MIN_STROKE_WIDTH, MAX_STROKE_WIDTH)
}

#[cfg(test)]
#[path = "log_test.rs"]
mod tests;
