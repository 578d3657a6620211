mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use flowchat_api::auth::{self, AppState, AppStateInner};
use flowchat_api::error::ApiError;
use flowchat_api::messages;
use flowchat_api::middleware::{decode_token, require_auth};
use flowchat_crypto::MessageCipher;
use flowchat_gateway::connection;
use flowchat_gateway::dispatcher::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowchat=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = flowchat_db::Database::open(&PathBuf::from(&config.db_path))?;

    // Shared state
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        cipher: MessageCipher::from_secret(&config.message_secret),
        dispatcher,
        jwt_secret: config.jwt_secret.clone(),
        unread_poll_secs: config.unread_poll_secs,
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/chat/messages", get(messages::get_messages))
        .route("/chat/messages", post(messages::send_message))
        .route("/chat/messages/unread-count", get(messages::unread_count))
        .route("/chat/messages/{message_id}/read", put(messages::mark_read))
        .route("/chat/messages/{message_id}", delete(messages::delete_message))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(app_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_address().parse()?;
    info!("FlowChat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: String,
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    // Validate the token before accepting the socket
    let Some(claims) = decode_token(&query.token, &state.jwt_secret) else {
        return ApiError::Unauthorized.into_response();
    };

    // A token for a since-deleted account never upgrades
    match state.db.get_user_by_id(&claims.sub.to_string()) {
        Ok(Some(_)) => {}
        Ok(None) | Err(_) => return ApiError::Unauthorized.into_response(),
    }

    let dispatcher = state.dispatcher.clone();
    let poll_secs = state.unread_poll_secs;
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, dispatcher, claims.sub, claims.username, poll_secs)
    })
}
