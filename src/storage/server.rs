//! Attestation Store Server
//!
//! warp server exposing any [`AttestationStore`] over the store wire protocol, so the HTTP
//! client can be pointed at a local process.

use anyhow::Result;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::{Filter, Rejection, Reply};

use super::{AttestationStore, StoreError};

/// Largest value accepted by `POST /set/{key}`.
const MAX_VALUE_BYTES: u64 = 4 * 1024 * 1024;

// ============================================================================
// HANDLERS
// ============================================================================

/// Handler for `GET /get/{key}`.
///
/// # Returns
///
/// * 200 with the raw value
/// * 404 when nothing is stored under `key`
pub async fn get_handler(
    key: String,
    store: Arc<dyn AttestationStore>,
) -> Result<warp::reply::Response, Rejection> {
    match store.get(&key).await {
        Ok(value) => Ok(value.into_response()),
        Err(StoreError::NotFound(_)) => Ok(warp::reply::with_status(
            format!("no attestation stored under {}", key),
            StatusCode::NOT_FOUND,
        )
        .into_response()),
        Err(e) => {
            error!("Store read for {} failed: {}", key, e);
            Ok(warp::reply::with_status(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response())
        }
    }
}

/// Handler for `POST /set/{key}`; the request body is stored verbatim.
pub async fn set_handler(
    key: String,
    body: Bytes,
    store: Arc<dyn AttestationStore>,
) -> Result<warp::reply::Response, Rejection> {
    match store.set(&key, body.to_vec()).await {
        Ok(()) => Ok(StatusCode::OK.into_response()),
        Err(e) => {
            error!("Store write for {} failed: {}", key, e);
            Ok(warp::reply::with_status(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response())
        }
    }
}

/// Creates a warp filter that provides access to the store.
pub fn with_store(
    store: Arc<dyn AttestationStore>,
) -> impl Filter<Extract = (Arc<dyn AttestationStore>,), Error = Infallible> + Clone {
    warp::any().map(move || store.clone())
}

/// Maps unmatched routes and methods to plain status responses.
pub async fn handle_rejection(rej: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if rej.is_not_found() {
        (StatusCode::NOT_FOUND, "Endpoint not found".to_string())
    } else if rej.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Value too large".to_string())
    } else if rej.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", rej);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
    };

    Ok(warp::reply::with_status(message, status))
}

// ============================================================================
// SERVER
// ============================================================================

/// HTTP front-end for an [`AttestationStore`].
pub struct StoreServer {
    store: Arc<dyn AttestationStore>,
}

impl StoreServer {
    pub fn new(store: Arc<dyn AttestationStore>) -> Self {
        Self { store }
    }

    /// Serves the store on `addr` until the process exits.
    pub async fn run(&self, addr: SocketAddr) -> Result<()> {
        info!("Starting attestation store server on {}", addr);
        warp::serve(self.create_routes()).run(addr).await;
        Ok(())
    }

    /// Serves the store on `addr` until `shutdown` resolves.
    ///
    /// # Returns
    ///
    /// The bound address (useful with port 0) and the server future to spawn.
    pub fn bind_with_shutdown(
        &self,
        addr: SocketAddr,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(SocketAddr, impl std::future::Future<Output = ()>)> {
        let (bound, server) =
            warp::serve(self.create_routes()).try_bind_with_graceful_shutdown(addr, shutdown)?;
        info!("Attestation store server bound to {}", bound);
        Ok((bound, server))
    }

    pub(crate) fn create_routes(
        &self,
    ) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
        let health = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| "ok");

        let get = warp::path("get")
            .and(warp::path::param::<String>())
            .and(warp::path::end())
            .and(warp::get())
            .and(with_store(self.store.clone()))
            .and_then(get_handler);

        let set = warp::path("set")
            .and(warp::path::param::<String>())
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::content_length_limit(MAX_VALUE_BYTES))
            .and(warp::body::bytes())
            .and(with_store(self.store.clone()))
            .and_then(set_handler);

        health.or(get).or(set).recover(handle_rejection)
    }

    /// Public method for testing - exposes routes for integration tests
    pub fn test_routes(&self) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
        self.create_routes()
    }
}
