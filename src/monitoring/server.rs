// Copyright (c) 2026 Concilium
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Minimal HTTP server exposing `/metrics` and `/healthz`.

use crate::monitoring::metrics::Metrics;
use axum::{extract::State, routing::get, Router};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listening socket could not be bound.
    #[error("bind: {0}")]
    Bind(#[from] std::io::Error),
    /// Listen address string was not a valid socket address.
    #[error("bad listen address")]
    BadAddr,
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> String {
    let encoder = TextEncoder::new();
    let families = metrics.registry.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

async fn healthz_handler() -> &'static str {
    "ok"
}

/// Bind and serve `/metrics` and `/healthz` until the process exits.
pub async fn serve(listen_addr: &str, metrics: Arc<Metrics>) -> Result<(), ServerError> {
    let addr: SocketAddr = listen_addr.parse().map_err(|_| ServerError::BadAddr)?;
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(metrics);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_handler_renders_prometheus_text_format() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.transactions_total.inc();

        let body = metrics_handler(State(metrics)).await;
        assert!(body.contains("concilium_transactions_total"));
    }
}
