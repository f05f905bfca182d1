//! Incoming XML-RPC calls from the controller
//!
//! The controller posts to the callback URL given in `init`. Every request gets
//! an answer: decode failures and unknown methods are replied to with a fault,
//! the server itself never stops because of a bad request.

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::{codec, Fault};
use crate::dispatcher::Dispatcher;

/// Build the callback router
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/", post(handle_call))
        .route("/RPC2", post(handle_call))
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

async fn handle_call(State(dispatcher): State<Arc<Dispatcher>>, body: Bytes) -> Response {
    let text = codec::decode_body(&body);
    let reply = match codec::decode_call(&text) {
        Ok(call) => match dispatcher.dispatch(&call.method, &call.params).await {
            Ok(value) => codec::encode_response(&value),
            Err(fault) => codec::encode_fault(&fault),
        },
        Err(e) => {
            warn!("rpc < malformed request: {}", e);
            codec::encode_fault(&Fault::parse_error(e))
        },
    };

    ([(header::CONTENT_TYPE, "text/xml")], reply).into_response()
}

/// Bind the callback listener on all interfaces
pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("rpc server listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Serve callbacks until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, dispatcher: Arc<Dispatcher>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(dispatcher))
        .with_graceful_shutdown(shutdown)
        .await
}
