//! Development HTTP server for ost.
//!
//! Serves the destination root read-only. Requests map directly onto files;
//! directory requests are answered with their `index.html`.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::path::PathBuf;
//! use ost_server::{ServerConfig, run_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig {
//!         host: "127.0.0.1".to_owned(),
//!         port: 8000,
//!         root: PathBuf::from("dst"),
//!     };
//!
//!     run_server(config).await.unwrap();
//! }
//! ```

use std::io;
use std::path::PathBuf;

use axum::Router;
use axum::http::HeaderValue;
use axum::http::header::HeaderName;
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Directory to serve.
    pub root: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8000,
            root: PathBuf::from("dst"),
        }
    }
}

impl ServerConfig {
    /// Create a configuration serving `root` on `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, root: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            port,
            root: root.into(),
        }
    }
}

/// Server error.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Listener could not be bound.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        /// Requested `host:port`.
        address: String,
        #[source]
        source: io::Error,
    },
    /// Server stopped with an I/O error.
    #[error("Server error: {0}")]
    Serve(#[source] io::Error),
}

/// Create the application router serving `root`.
pub fn create_router(root: impl Into<PathBuf>) -> Router {
    let files = ServeDir::new(root.into()).append_index_html_on_directories(true);

    Router::new().fallback_service(files).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(SetResponseHeaderLayer::overriding(
                HeaderName::from_static("x-content-type-options"),
                HeaderValue::from_static("nosniff"),
            )),
    )
}

/// Run the server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let address = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|source| ServerError::Bind { address, source })?;
    let local = listener.local_addr().map_err(ServerError::Serve)?;
    tracing::info!(address = %local, root = %config.root.display(), "Starting server");

    axum::serve(listener, create_router(config.root))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve)
}

/// Wait for shutdown signal (Ctrl-C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping server...");
}

#[cfg(test)]
mod tests {
    use std::fs;

    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode};
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    use super::*;

    fn site() -> tempfile::TempDir {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("index.html"), "<h1>Home</h1>").unwrap();
        fs::create_dir(temp_dir.path().join("blog")).unwrap();
        fs::write(temp_dir.path().join("blog/index.html"), "blog").unwrap();
        fs::write(temp_dir.path().join("blog/post.html"), "post").unwrap();
        temp_dir
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_serves_rendered_file() {
        let temp_dir = site();

        let (status, body) = get(create_router(temp_dir.path()), "/blog/post.html").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "post");
    }

    #[tokio::test]
    async fn test_directory_serves_index() {
        let temp_dir = site();

        let (status, body) = get(create_router(temp_dir.path()), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<h1>Home</h1>");

        let (status, body) = get(create_router(temp_dir.path()), "/blog/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "blog");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let temp_dir = site();

        let (status, _) = get(create_router(temp_dir.path()), "/missing.html").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_write_methods_are_rejected() {
        let temp_dir = site();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/index.html")
            .body(Body::from("x"))
            .unwrap();

        let response = create_router(temp_dir.path()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("index.html")).unwrap(),
            "<h1>Home</h1>"
        );
    }

    #[tokio::test]
    async fn test_nosniff_header() {
        let temp_dir = site();

        let response = create_router(temp_dir.path())
            .oneshot(Request::get("/index.html").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
    }

    #[test]
    fn test_bind_error_display() {
        let err = ServerError::Bind {
            address: "127.0.0.1:80".to_owned(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "Failed to bind 127.0.0.1:80: denied");
    }
}
