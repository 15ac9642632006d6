use super::*;
use crate::frame::Data;
use crate::state::test_helpers;
use tokio::time::{Duration, timeout};

async fn recv_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("frame receive timed out")
        .expect("channel closed")
}

async fn assert_channel_empty(rx: &mut mpsc::Receiver<Frame>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected channel to remain empty"
    );
}

#[tokio::test]
async fn join_creates_room_lazily_with_empty_snapshot() {
    let state = AppState::new();
    let client_id = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(8);

    let (profile, snapshot) = join_room(&state, "lobby", client_id, Some("alice"), tx)
        .await
        .expect("join should succeed");

    assert_eq!(profile.id, client_id);
    assert_eq!(profile.name, "alice");
    assert!(snapshot.is_empty());

    let rooms = state.rooms.read().await;
    let room = rooms.get("lobby").expect("room should exist");
    assert_eq!(room.clients.len(), 1);
    assert_eq!(room.users.len(), 1);
}

#[tokio::test]
async fn join_rejects_invalid_room_ids() {
    let state = AppState::new();
    let (tx, _rx) = mpsc::channel(8);
    let err = join_room(&state, "", Uuid::new_v4(), None, tx.clone())
        .await
        .expect_err("empty room id should be rejected");
    assert!(matches!(err, RoomError::InvalidRoomId(_)));

    let long_id = "r".repeat(MAX_ROOM_ID_LEN + 1);
    let err = join_room(&state, &long_id, Uuid::new_v4(), None, tx)
        .await
        .expect_err("oversized room id should be rejected");
    assert!(matches!(err, RoomError::InvalidRoomId(_)));
    assert!(state.rooms.read().await.is_empty());
}

#[tokio::test]
async fn join_defaults_name_to_id_suffix() {
    let state = AppState::new();
    let client_id = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(8);

    let (profile, _) = join_room(&state, "lobby", client_id, None, tx)
        .await
        .expect("join should succeed");

    let id = client_id.to_string();
    assert_eq!(profile.name, format!("User-{}", &id[id.len() - 4..]));
}

#[tokio::test]
async fn join_assigns_palette_color() {
    let state = AppState::new();
    let (tx, _rx) = mpsc::channel(8);
    let (profile, _) = join_room(&state, "lobby", Uuid::new_v4(), Some("alice"), tx)
        .await
        .expect("join should succeed");

    assert!(profile.color.starts_with("hsl("));
    assert!(profile.color.ends_with(" 80% 55%)"));
}

#[tokio::test]
async fn join_snapshot_matches_committed_history() {
    let state = AppState::new();
    let author = Uuid::new_v4();
    test_helpers::seed_room(&state, "studio").await;
    let first = test_helpers::seed_committed_stroke(&state, "studio", author).await;
    let second = test_helpers::seed_committed_stroke(&state, "studio", author).await;

    let (tx, _rx) = mpsc::channel(8);
    let (_, joined_snapshot) = join_room(&state, "studio", Uuid::new_v4(), None, tx)
        .await
        .expect("join should succeed");

    assert_eq!(joined_snapshot.len(), 2);
    assert_eq!(joined_snapshot[0].id, first.id);
    assert_eq!(joined_snapshot[1].id, second.id);
    assert_eq!(joined_snapshot, snapshot(&state, "studio").await);
}

#[tokio::test]
async fn part_keeps_room_while_clients_remain() {
    let state = AppState::new();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let _rx_a = test_helpers::attach_client(&state, "lobby", a).await;
    let _rx_b = test_helpers::attach_client(&state, "lobby", b).await;

    assert!(part_room(&state, "lobby", a).await);

    let rooms = state.rooms.read().await;
    let room = rooms.get("lobby").expect("room should survive");
    assert_eq!(room.clients.len(), 1);
    assert!(room.users.contains_key(&b));
}

#[tokio::test]
async fn last_part_evicts_room() {
    let state = AppState::new();
    let client_id = Uuid::new_v4();
    let _rx = test_helpers::attach_client(&state, "lobby", client_id).await;
    test_helpers::seed_committed_stroke(&state, "lobby", client_id).await;

    assert!(part_room(&state, "lobby", client_id).await);
    assert!(state.rooms.read().await.is_empty());

    // A rejoin sees a fresh room with empty history.
    let (tx, _rx) = mpsc::channel(8);
    let (_, snapshot) = join_room(&state, "lobby", Uuid::new_v4(), None, tx)
        .await
        .expect("rejoin should succeed");
    assert!(snapshot.is_empty());
}

#[tokio::test]
async fn part_unknown_room_or_client_is_false() {
    let state = AppState::new();
    assert!(!part_room(&state, "nowhere", Uuid::new_v4()).await);

    let _rx = test_helpers::attach_client(&state, "lobby", Uuid::new_v4()).await;
    assert!(!part_room(&state, "lobby", Uuid::new_v4()).await);
}

#[tokio::test]
async fn list_users_is_ordered_and_isolated_per_room() {
    let state = AppState::new();
    let (tx, _rx) = mpsc::channel(8);
    join_room(&state, "lobby", Uuid::new_v4(), Some("zoe"), tx.clone())
        .await
        .unwrap();
    join_room(&state, "lobby", Uuid::new_v4(), Some("amy"), tx.clone())
        .await
        .unwrap();
    join_room(&state, "other", Uuid::new_v4(), Some("bob"), tx)
        .await
        .unwrap();

    let users = list_room_users(&state, "lobby").await;
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].name, "amy");
    assert_eq!(users[1].name, "zoe");

    assert!(list_room_users(&state, "missing").await.is_empty());
}

#[tokio::test]
async fn broadcast_sends_to_all_except_excluded_client() {
    let state = AppState::new();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();
    let mut rx_a = test_helpers::attach_client(&state, "lobby", a).await;
    let mut rx_b = test_helpers::attach_client(&state, "lobby", b).await;
    let mut rx_c = test_helpers::attach_client(&state, "lobby", c).await;

    let frame = Frame::request("stroke:points", Data::new()).with_room_id("lobby");
    broadcast(&state, "lobby", &frame, Some(b)).await;

    assert_eq!(recv_frame(&mut rx_a).await.syscall, "stroke:points");
    assert_eq!(recv_frame(&mut rx_c).await.syscall, "stroke:points");
    assert_channel_empty(&mut rx_b).await;
}

#[tokio::test]
async fn broadcast_to_unknown_room_is_a_no_op() {
    let state = AppState::new();
    let frame = Frame::request("room:users", Data::new());
    broadcast(&state, "nowhere", &frame, None).await;
}
