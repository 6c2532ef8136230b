use axum::{
    Router,
    routing::{get, post},
};
use command_handler::CommandHandler;
use config::Config;
use registry::RoomRegistry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod broadcaster;
mod command_handler;
mod config;
mod events;
mod handlers;
mod registry;
mod room_state;
pub mod shared_types;
mod websocket;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub commands: CommandHandler,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(RoomRegistry::new());
        Self {
            commands: CommandHandler::new(Arc::clone(&registry)),
            registry,
            config: Arc::new(config),
        }
    }
}

pub fn app(state: AppState) -> Router {
    // --- CORS Setup ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/rooms/{id}", get(handlers::get_room))
        .route("/api/rooms/{id}/commands", post(handlers::submit_command))
        .route("/api/rooms/{id}/events", get(events::room_events))
        .route("/ws/rooms/{id}", get(websocket::websocket_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canvas_backend=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(?config, "Loaded configuration");

    let app = app(AppState::new(config.clone()));

    // --- Server Launch ---
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!("Server listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;

    fn make_state() -> AppState {
        AppState::new(Config::default())
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let parsed = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, parsed)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = app(make_state());

        let (status, body) = send(&app, get_req("/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["rooms"], 0);
    }

    #[tokio::test]
    async fn new_room_is_empty() {
        let app = app(make_state());

        let (status, body) = send(&app, get_req("/api/rooms/fresh")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"lines": []}));
    }

    #[tokio::test]
    async fn draw_undo_redo_over_http() {
        let app = app(make_state());
        let x = json!({"id": 1, "config": {"points": [50, 60, 70, 80], "stroke": "red", "strokeWidth": 5}});

        let (status, body) = send(
            &app,
            post_json(
                "/api/rooms/r1/commands",
                json!({"type": "draw", "status": "complete", "line": x, "lines": [x], "timestamp": 1}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"lines": [x]}));
        assert_eq!(send(&app, get_req("/api/rooms/r1")).await.1, json!({"lines": [x]}));

        send(
            &app,
            post_json("/api/rooms/r1/commands", json!({"type": "undo", "lines": [], "timestamp": 2})),
        )
        .await;
        assert_eq!(send(&app, get_req("/api/rooms/r1")).await.1, json!({"lines": []}));

        send(
            &app,
            post_json("/api/rooms/r1/commands", json!({"type": "redo", "timestamp": 3})),
        )
        .await;
        assert_eq!(send(&app, get_req("/api/rooms/r1")).await.1, json!({"lines": [x]}));
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let app = app(make_state());

        let (status, body) = send(
            &app,
            post_json("/api/rooms/r1/commands", json!({"type": "erase"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_command");
        assert_eq!(send(&app, get_req("/api/rooms/r1")).await.1, json!({"lines": []}));
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let app = app(make_state());
        let req = Request::builder()
            .method("POST")
            .uri("/api/rooms/r1/commands")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let (status, body) = send(&app, req).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_command");
    }

    #[tokio::test]
    async fn blank_room_id_is_rejected() {
        let app = app(make_state());

        let (status, body) = send(&app, get_req("/api/rooms/%20")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_room");
    }

    #[tokio::test]
    async fn event_stream_pushes_in_progress_draw() {
        let state = make_state();
        let registry = Arc::clone(&state.registry);
        let app = app(state);

        let resp = app.clone().oneshot(get_req("/api/rooms/r1/events")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(registry.listener_count("r1").await, 1);

        let (status, body) = send(
            &app,
            post_json(
                "/api/rooms/r1/commands",
                json!({"type": "draw", "status": "in-progress", "line": {"id": 5}, "timestamp": 10}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"lines": []}));

        let mut stream = resp.into_body();
        let frame = tokio::time::timeout(Duration::from_secs(1), stream.frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        let payload = text.trim_end().strip_prefix("data:").unwrap().trim();
        assert_eq!(
            serde_json::from_str::<Value>(payload).unwrap(),
            json!({"type": "draw", "status": "in-progress", "line": {"id": 5}, "timestamp": 10})
        );

        // Closing the stream deregisters the listener.
        drop(stream);
        for _ in 0..50 {
            if registry.listener_count("r1").await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.listener_count("r1").await, 0);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = app(make_state());

        let resp = app.oneshot(get_req("/nonexistent")).await.unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
