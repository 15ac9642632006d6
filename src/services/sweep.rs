//! Sweep service — background expiry of idle in-progress strokes.
//!
//! DESIGN
//! ======
//! A connection that dies mid-stroke never sends `stroke:end`, so its
//! in-progress entry would otherwise sit in the room forever. A background
//! task walks the live rooms on a fixed interval and expires entries whose
//! idle time exceeds the TTL, treating expiry as an implicit discard.
//! Nothing is broadcast: peers hold only a provisional rendering of the
//! abandoned stroke, which the next resync replaces.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::state::AppState;

const DEFAULT_STROKE_IDLE_TTL_SECS: u64 = 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 15;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Spawn the background sweep task. Returns a handle for shutdown.
pub fn spawn_sweep_task(state: AppState) -> JoinHandle<()> {
    let ttl = Duration::from_secs(env_parse("STROKE_IDLE_TTL_SECS", DEFAULT_STROKE_IDLE_TTL_SECS));
    let interval = Duration::from_secs(env_parse("SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS));
    info!(ttl_secs = ttl.as_secs(), interval_secs = interval.as_secs(), "stroke sweep configured");
    tokio::spawn(async move {
        loop {
            sweep_once(&state, ttl).await;
            tokio::time::sleep(interval).await;
        }
    })
}

/// Expire idle in-progress strokes across all live rooms.
pub async fn sweep_once(state: &AppState, ttl: Duration) {
    let mut rooms = state.rooms.write().await;
    for (room_id, room) in rooms.iter_mut() {
        let expired = room.log.expire_idle(ttl);
        if !expired.is_empty() {
            info!(%room_id, count = expired.len(), "expired idle in-progress strokes");
        }
    }
}
