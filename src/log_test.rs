use super::*;

fn meta(color: &str, width: f64, mode: &str) -> RawStrokeMeta {
    RawStrokeMeta {
        color: Some(color.into()),
        width: Some(width),
        mode: Some(mode.into()),
    }
}

fn pts(coords: &[(f64, f64)]) -> Vec<Point> {
    coords.iter().map(|&(x, y)| Point { x, y }).collect()
}

#[test]
fn start_stroke_normalizes_metadata() {
    let mut log = DrawingLog::new();
    let author = Uuid::new_v4();

    let op = log.start_stroke(author, &meta("#111", 4.0, "draw"));
    assert_eq!(op.user_id, author);
    assert_eq!(op.color, "#111");
    assert!((op.width - 4.0).abs() < f64::EPSILON);
    assert_eq!(op.mode, StrokeMode::Draw);
    assert!(op.points.is_empty());
    assert_eq!(log.in_progress_len(), 1);
}

#[test]
fn start_stroke_defaults_and_clamps() {
    let mut log = DrawingLog::new();
    let author = Uuid::new_v4();

    let op = log.start_stroke(author, &RawStrokeMeta::default());
    assert_eq!(op.color, DEFAULT_STROKE_COLOR);
    assert!((op.width - DEFAULT_STROKE_WIDTH).abs() < f64::EPSILON);
    assert_eq!(op.mode, StrokeMode::Draw);

    let wide = log.start_stroke(author, &meta("#222", 500.0, "erase"));
    assert!((wide.width - MAX_STROKE_WIDTH).abs() < f64::EPSILON);
    assert_eq!(wide.mode, StrokeMode::Erase);

    let thin = log.start_stroke(author, &meta("#222", 0.25, "scribble"));
    assert!((thin.width - MIN_STROKE_WIDTH).abs() < f64::EPSILON);
    // Unknown modes normalize to draw.
    assert_eq!(thin.mode, StrokeMode::Draw);

    // Zero and negative widths count as absent, not as minimum.
    let zero = log.start_stroke(author, &meta("#222", 0.0, "draw"));
    assert!((zero.width - DEFAULT_STROKE_WIDTH).abs() < f64::EPSILON);
    let negative = log.start_stroke(author, &meta("#222", -5.0, "draw"));
    assert!((negative.width - DEFAULT_STROKE_WIDTH).abs() < f64::EPSILON);
}

#[test]
fn start_stroke_identities_are_unique() {
    let mut log = DrawingLog::new();
    let author = Uuid::new_v4();
    let a = log.start_stroke(author, &RawStrokeMeta::default());
    let b = log.start_stroke(author, &RawStrokeMeta::default());
    assert_ne!(a.id, b.id);
    assert_eq!(log.in_progress_len(), 2);
}

#[test]
fn append_preserves_order_and_drops_malformed() {
    let mut log = DrawingLog::new();
    let author = Uuid::new_v4();
    let op = log.start_stroke(author, &meta("#111", 4.0, "draw"));

    let batch = vec![
        Point { x: 0.0, y: 0.0 },
        Point { x: f64::NAN, y: 1.0 },
        Point { x: 1.0, y: 1.0 },
        Point { x: 2.0, y: f64::INFINITY },
        Point { x: 2.0, y: 2.0 },
    ];
    let outcome = log.append_points(op.id, author, &batch);
    assert_eq!(outcome, ApplyOutcome::Applied { accepted: 3 });

    let EndOutcome::Committed(committed) = log.end_stroke(op.id, author) else {
        panic!("expected commit");
    };
    assert_eq!(committed.points, pts(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)]));
}

#[test]
fn append_rejects_unknown_operation() {
    let mut log = DrawingLog::new();
    let outcome = log.append_points(Uuid::new_v4(), Uuid::new_v4(), &pts(&[(0.0, 0.0)]));
    assert_eq!(outcome, ApplyOutcome::Rejected(RejectReason::UnknownOperation));
}

#[test]
fn append_rejects_non_author_without_mutation() {
    let mut log = DrawingLog::new();
    let author = Uuid::new_v4();
    let intruder = Uuid::new_v4();
    let op = log.start_stroke(author, &meta("#111", 4.0, "draw"));

    let outcome = log.append_points(op.id, intruder, &pts(&[(9.0, 9.0)]));
    assert_eq!(outcome, ApplyOutcome::Rejected(RejectReason::NotAuthor));

    // The author's entry accumulated nothing from the intruder.
    log.append_points(op.id, author, &pts(&[(1.0, 1.0)]));
    let EndOutcome::Committed(committed) = log.end_stroke(op.id, author) else {
        panic!("expected commit");
    };
    assert_eq!(committed.points, pts(&[(1.0, 1.0)]));
}

#[test]
fn end_stroke_rejects_non_author_and_keeps_entry() {
    let mut log = DrawingLog::new();
    let author = Uuid::new_v4();
    let intruder = Uuid::new_v4();
    let op = log.start_stroke(author, &meta("#111", 4.0, "draw"));
    log.append_points(op.id, author, &pts(&[(0.0, 0.0)]));

    assert_eq!(log.end_stroke(op.id, intruder), EndOutcome::Rejected(RejectReason::NotAuthor));
    assert_eq!(log.committed_len(), 0);
    assert_eq!(log.in_progress_len(), 1);

    // The author can still commit afterwards.
    assert!(matches!(log.end_stroke(op.id, author), EndOutcome::Committed(_)));
}

#[test]
fn empty_stroke_is_discarded() {
    let mut log = DrawingLog::new();
    let author = Uuid::new_v4();
    let op = log.start_stroke(author, &meta("#111", 4.0, "draw"));

    assert_eq!(log.end_stroke(op.id, author), EndOutcome::Discarded);
    assert_eq!(log.committed_len(), 0);
    assert_eq!(log.in_progress_len(), 0);

    // The identity is forgotten entirely.
    assert_eq!(
        log.end_stroke(op.id, author),
        EndOutcome::Rejected(RejectReason::UnknownOperation)
    );
}

#[test]
fn commit_append_end_scenario() {
    let mut log = DrawingLog::new();
    let author = Uuid::new_v4();
    let op = log.start_stroke(author, &meta("#111", 4.0, "draw"));
    log.append_points(op.id, author, &pts(&[(0.0, 0.0), (1.0, 1.0)]));

    let EndOutcome::Committed(committed) = log.end_stroke(op.id, author) else {
        panic!("expected commit");
    };

    let history = log.snapshot();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, committed.id);
    assert_eq!(history[0].user_id, author);
    assert_eq!(history[0].color, "#111");
    assert!((history[0].width - 4.0).abs() < f64::EPSILON);
    assert_eq!(history[0].mode, StrokeMode::Draw);
    assert_eq!(history[0].points, pts(&[(0.0, 0.0), (1.0, 1.0)]));
}

#[test]
fn undo_on_empty_history_is_null() {
    let mut log = DrawingLog::new();
    assert!(log.undo().is_none());
    assert_eq!(log.committed_len(), 0);
    assert_eq!(log.redo_len(), 0);
}

#[test]
fn undo_then_redo_restores_exact_operation() {
    let mut log = DrawingLog::new();
    let author = Uuid::new_v4();
    let op = log.start_stroke(author, &meta("#111", 4.0, "draw"));
    log.append_points(op.id, author, &pts(&[(0.0, 0.0), (1.0, 1.0)]));
    log.end_stroke(op.id, author);

    let undone = log.undo().expect("undo should pop the commit");
    assert_eq!(undone.id, op.id);
    assert_eq!(log.committed_len(), 0);
    assert_eq!(log.redo_len(), 1);

    let redone = log.redo().expect("redo should restore the commit");
    assert_eq!(redone, undone);
    assert_eq!(log.snapshot(), vec![redone]);
    assert_eq!(log.redo_len(), 0);
}

#[test]
fn fresh_commit_clears_redo_stack() {
    let mut log = DrawingLog::new();
    let author = Uuid::new_v4();

    let first = log.start_stroke(author, &meta("#111", 4.0, "draw"));
    log.append_points(first.id, author, &pts(&[(0.0, 0.0)]));
    log.end_stroke(first.id, author);
    log.undo();
    assert_eq!(log.redo_len(), 1);

    let second = log.start_stroke(author, &meta("#222", 8.0, "draw"));
    log.append_points(second.id, author, &pts(&[(5.0, 5.0)]));
    log.end_stroke(second.id, author);

    assert_eq!(log.redo_len(), 0);
    assert!(log.redo().is_none());
}

#[test]
fn undo_is_global_across_authors() {
    let mut log = DrawingLog::new();
    let bob = Uuid::new_v4();

    let op = log.start_stroke(bob, &meta("#333", 2.0, "erase"));
    log.append_points(op.id, bob, &pts(&[(3.0, 3.0)]));
    log.end_stroke(op.id, bob);

    // The caller's identity plays no part in undo; any participant may
    // remove Bob's stroke.
    let undone = log.undo().expect("global undo");
    assert_eq!(undone.user_id, bob);
    assert_eq!(log.committed_len(), 0);
}

#[test]
fn snapshot_is_a_deep_copy() {
    let mut log = DrawingLog::new();
    let author = Uuid::new_v4();
    let op = log.start_stroke(author, &meta("#111", 4.0, "draw"));
    log.append_points(op.id, author, &pts(&[(0.0, 0.0)]));
    log.end_stroke(op.id, author);

    let mut snap = log.snapshot();
    snap[0].points.push(Point { x: 99.0, y: 99.0 });
    snap.clear();

    assert_eq!(log.committed_len(), 1);
    assert_eq!(log.snapshot()[0].points, pts(&[(0.0, 0.0)]));
}

#[test]
fn expire_idle_discards_stale_entries() {
    let mut log = DrawingLog::new();
    let author = Uuid::new_v4();
    let start = Instant::now();
    let ttl = Duration::from_secs(60);

    let stale = log.start_stroke_at(author, &meta("#111", 4.0, "draw"), start);
    let fresh = log.start_stroke_at(author, &meta("#222", 4.0, "draw"), start);

    // Touching an entry resets its idle clock.
    let later = start + Duration::from_secs(50);
    log.append_points_at(fresh.id, author, &pts(&[(0.0, 0.0)]), later);

    let now = start + Duration::from_secs(70);
    let expired = log.expire_idle_at(ttl, now);
    assert_eq!(expired, vec![stale.id]);
    assert_eq!(log.in_progress_len(), 1);

    // Expiry is an implicit discard: the identity is gone for good.
    assert_eq!(
        log.end_stroke(stale.id, author),
        EndOutcome::Rejected(RejectReason::UnknownOperation)
    );
    assert!(matches!(log.end_stroke(fresh.id, author), EndOutcome::Committed(_)));
}

#[test]
fn expired_stroke_never_enters_history() {
    let mut log = DrawingLog::new();
    let author = Uuid::new_v4();
    let start = Instant::now();

    let op = log.start_stroke_at(author, &meta("#111", 4.0, "draw"), start);
    log.append_points_at(op.id, author, &pts(&[(1.0, 2.0)]), start);

    let expired = log.expire_idle_at(Duration::from_secs(1), start + Duration::from_secs(5));
    assert_eq!(expired, vec![op.id]);
    assert_eq!(log.committed_len(), 0);
    assert_eq!(log.snapshot(), Vec::new());
}
