use drawroom::services::sweep;
use drawroom::{routes, state};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");

    let state = state::AppState::new();

    // Spawn background expiry of idle in-progress strokes.
    let _sweep = sweep::spawn_sweep_task(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "drawroom listening");
    axum::serve(listener, app).await.expect("server failed");
}
