//! HTTP front end.
//!
//! Served over whatever [`Listener`] was acquired:
//! - `GET /echo` - WebSocket upgrade; every frame is echoed back
//! - anything else - a static page whose script talks to `/echo`

mod echo;

use axum::response::Html;
use axum::routing::{any, get};
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tracing::debug;

use crate::error::Result;
use crate::listener::Listener;

const INDEX_HTML: &str = include_str!("index.html");

pub fn router() -> Router {
    Router::new()
        .route("/", any(index))
        .route("/echo", get(echo::upgrade))
        .fallback(index)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Accept connections until the listener fails.
///
/// Each connection gets its own task; an error inside one connection ends
/// only that task. Only a listener error makes this return.
pub async fn serve(mut listener: Listener, app: Router) -> Result<()> {
    loop {
        let (conn, peer) = listener.accept().await?;
        debug!(%peer, "accepted connection");

        let service = TowerToHyperService::new(app.clone());
        tokio::spawn(async move {
            let result = http1::Builder::new()
                .serve_connection(TokioIo::new(conn), service)
                .with_upgrades()
                .await;

            if let Err(e) = result {
                debug!(%peer, "connection ended with error: {}", e);
            }
        });
    }
}
