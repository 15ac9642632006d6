//! ClientPredictor — optimistic local echo and remote reconciliation.
//!
//! DESIGN
//! ======
//! Drawing must feel instant, but the server owns operation identity. The
//! predictor renders a local stroke immediately under a provisional id
//! while the start request is in flight, then adopts the canonical id the
//! moment the ack lands. Nothing already drawn is redrawn; only the
//! accounting key changes.
//!
//! The identity moves through an explicit state machine:
//!
//!   Pending(receiver) -> Resolved(canonical id) -> Finalized
//!
//! Point batches are releasable only in the Resolved state, so a point
//! message is never sent under an identity the server did not assign.
//! Finalizing waits on the pending ack; if the resolver is dropped the
//! stroke is abandoned client-side, logged and not retried.
//!
//! Remote strokes from other authors live in a reconciliation table keyed
//! by canonical id, so partially streamed strokes render incrementally
//! before their commit arrives. The predictor's own `stroke:start` echo is
//! ignored — that stroke's accounting lives in the local state machine.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::log::{Point, RawStrokeMeta, StrokeOp};

/// Coalescing interval for outgoing point batches.
pub const BATCH_INTERVAL: Duration = Duration::from_millis(16);

// =============================================================================
// TYPES
// =============================================================================

/// Identity of the local in-flight stroke.
#[derive(Debug)]
pub enum PendingId {
    /// Start request sent; awaiting the server-assigned id.
    Pending(oneshot::Receiver<Uuid>),
    /// Canonical id adopted; batches may flow.
    Resolved(Uuid),
    /// Stroke ended; no further messages may use this identity.
    Finalized,
}

/// The one stroke this client is currently drawing.
#[derive(Debug)]
struct LocalStroke {
    /// Client-local key, valid only until the canonical id resolves.
    provisional_id: Uuid,
    id: PendingId,
    op: StrokeOp,
    /// Points pushed since the last released batch.
    unsent: Vec<Point>,
}

/// Result of finalizing the local stroke.
#[derive(Debug, PartialEq)]
pub enum Finalize {
    /// Send `tail` as a last point batch, then `stroke:end` for `op_id`.
    Commit { op_id: Uuid, tail: Vec<Point> },
    /// The start ack never resolved; the stroke is dropped client-side.
    Abandoned,
}

// =============================================================================
// PREDICTOR
// =============================================================================

/// Client-local canvas model: committed history in server order, one
/// optimistic local stroke, and the table of in-flight remote strokes.
#[derive(Debug)]
pub struct ClientPredictor {
    user_id: Uuid,
    local: Option<LocalStroke>,
    history: Vec<StrokeOp>,
    remote: HashMap<Uuid, StrokeOp>,
}

impl ClientPredictor {
    #[must_use]
    pub fn new(user_id: Uuid) -> Self {
        Self { user_id, local: None, history: Vec::new(), remote: HashMap::new() }
    }

    // =========================================================================
    // LOCAL STROKE
    // =========================================================================

    /// Begin a local stroke under a provisional identity and return the
    /// resolver the network layer completes with the server-assigned id.
    /// Any stroke still in flight is abandoned.
    pub fn begin_stroke(&mut self, meta: &RawStrokeMeta, first_point: Point) -> oneshot::Sender<Uuid> {
        if let Some(stale) = self.local.take() {
            warn!(provisional_id = %stale.provisional_id, "abandoning unfinished local stroke");
        }

        let provisional_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let mut op = StrokeOp::from_meta(provisional_id, self.user_id, meta);
        op.points.push(first_point);

        debug!(%provisional_id, "local stroke started");
        self.local = Some(LocalStroke {
            provisional_id,
            id: PendingId::Pending(rx),
            op,
            unsent: vec![first_point],
        });
        tx
    }

    /// Record a point on the local stroke for immediate rendering. Dropped
    /// if no stroke is in flight.
    pub fn push_point(&mut self, point: Point) {
        let Some(local) = &mut self.local else {
            debug!("point with no local stroke in flight, dropped");
            return;
        };
        local.op.points.push(point);
        local.unsent.push(point);
    }

    /// Release the accumulated point batch, tagged with the canonical id.
    /// Returns `None` while the identity is unresolved or the batch is
    /// empty — points are never sent under a provisional id.
    pub fn take_batch(&mut self) -> Option<(Uuid, Vec<Point>)> {
        let local = self.local.as_mut()?;
        local.try_resolve();
        let PendingId::Resolved(op_id) = &local.id else {
            return None;
        };
        let op_id = *op_id;
        if local.unsent.is_empty() {
            return None;
        }
        Some((op_id, std::mem::take(&mut local.unsent)))
    }

    /// End the local stroke. Suspends until the start ack resolves so the
    /// end message always carries a server-assigned identity. A dropped
    /// resolver abandons the stroke.
    pub async fn finalize(&mut self) -> Finalize {
        let Some(mut local) = self.local.take() else {
            return Finalize::Abandoned;
        };

        let op_id = match std::mem::replace(&mut local.id, PendingId::Finalized) {
            PendingId::Pending(rx) => match rx.await {
                Ok(id) => id,
                Err(_) => {
                    warn!(provisional_id = %local.provisional_id, "start ack lost, stroke abandoned");
                    return Finalize::Abandoned;
                }
            },
            PendingId::Resolved(id) => id,
            PendingId::Finalized => return Finalize::Abandoned,
        };

        // Adopt the canonical id and move the rendered stroke straight into
        // history: the server's commit notice for our own stroke carries
        // nothing we do not already have.
        local.op.id = op_id;
        if !local.op.points.is_empty() {
            self.history.push(local.op);
        }
        debug!(%op_id, "local stroke finalized");
        Finalize::Commit { op_id, tail: local.unsent }
    }

    // =========================================================================
    // REMOTE RECONCILIATION
    // =========================================================================

    /// A peer started a stroke. Our own echo is ignored.
    pub fn remote_start(&mut self, user_id: Uuid, op: StrokeOp) {
        if user_id == self.user_id {
            return;
        }
        self.remote.insert(op.id, op);
    }

    /// A peer streamed points. Unknown ids are dropped (the start notice
    /// was missed; the next snapshot resync repairs the gap).
    pub fn remote_points(&mut self, op_id: Uuid, points: &[Point]) {
        let Some(op) = self.remote.get_mut(&op_id) else {
            debug!(%op_id, "points for unknown remote stroke, dropped");
            return;
        };
        op.points.extend_from_slice(points);
    }

    /// A peer's stroke committed: move it from the table into history.
    pub fn remote_commit(&mut self, op_id: Uuid) {
        if let Some(op) = self.remote.remove(&op_id) {
            self.history.push(op);
        }
    }

    // =========================================================================
    // HISTORY NOTICES
    // =========================================================================

    /// An operation was undone: remove it wherever it sits in history.
    pub fn apply_undo(&mut self, op_id: Uuid) {
        self.history.retain(|op| op.id != op_id);
    }

    /// An undone operation came back: append the full op.
    pub fn apply_redo(&mut self, op: StrokeOp) {
        self.history.push(op);
    }

    /// Resync: replace local history wholesale and drop all partial remote
    /// strokes — the snapshot supersedes everything streamed so far.
    pub fn load_snapshot(&mut self, operations: Vec<StrokeOp>) {
        self.remote.clear();
        self.history = operations;
    }

    // =========================================================================
    // RENDER VIEW
    // =========================================================================

    /// Committed history in server order.
    #[must_use]
    pub fn history(&self) -> &[StrokeOp] {
        &self.history
    }

    /// Everything currently paintable: history, then in-flight remote
    /// strokes, then the local stroke on top.
    #[must_use]
    pub fn visible_ops(&self) -> Vec<&StrokeOp> {
        let mut ops: Vec<&StrokeOp> = self.history.iter().collect();
        ops.extend(self.remote.values());
        if let Some(local) = &self.local {
            ops.push(&local.op);
        }
        ops
    }
}

impl LocalStroke {
    /// Adopt the canonical id if the ack has arrived. Keeps waiting on a
    /// closed resolver; finalize reports the abandonment.
    fn try_resolve(&mut self) {
        if let PendingId::Pending(rx) = &mut self.id {
            if let Ok(op_id) = rx.try_recv() {
                debug!(provisional_id = %self.provisional_id, %op_id, "canonical id adopted");
                self.id = PendingId::Resolved(op_id);
            }
        }
    }
}

#[cfg(test)]
#[path = "predict_test.rs"]
mod tests;
