//! HTTP adapter: every GET path goes to the [`RequestHandler`].

pub mod middleware;

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, Uri, header},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::application::{error::AppError, handler::RequestHandler};

use self::middleware::log_responses;

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const MARKDOWN_CONTENT_TYPE: &str = "text/markdown; charset=utf-8";

#[derive(Clone)]
pub struct HttpState {
    pub handler: Arc<RequestHandler>,
    /// Whether pages are HTML or the intermediate Markdown.
    pub as_html: bool,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(serve_path))
        .route("/{*path}", get(serve_path))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
}

async fn serve_path(State(state): State<HttpState>, uri: Uri) -> Response {
    let handler = Arc::clone(&state.handler);
    let path = uri.path().to_string();

    // Store access is blocking file I/O.
    match tokio::task::spawn_blocking(move || handler.handle(&path)).await {
        Ok(Ok(body)) => {
            let content_type = if state.as_html {
                HTML_CONTENT_TYPE
            } else {
                MARKDOWN_CONTENT_TYPE
            };
            (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Ok(Err(err)) => err.into_response(),
        Err(err) => AppError::unexpected(format!("request task failed: {err}")).into_response(),
    }
}
