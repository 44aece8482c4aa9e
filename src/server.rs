use std::time::Duration;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use crate::{
    api::{
        auth::require_cron_token,
        handler::{
            create_payment, get_payment, health_check, last_reconcile_report, trigger_reconcile,
            AppState,
        },
    },
    middleware::rate_limit_middleware,
};

pub async fn create_app(state: AppState, request_timeout: Duration) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    // Scheduler entry point
    let cron = Router::new()
        .route(
            "/reconcile",
            post(trigger_reconcile).layer(from_fn_with_state(
                state.cron_rate_limit.clone(),
                rate_limit_middleware,
            )),
        )
        .route("/reconcile/last", get(last_reconcile_report))
        .route_layer(from_fn_with_state(state.clone(), require_cron_token));

    // Internal API for the order and bond workflows
    let api = Router::new()
        .route("/payments", post(create_payment))
        .route("/payments/:address", get(get_payment))
        .route_layer(from_fn_with_state(state.clone(), require_cron_token));

    let app = Router::new()
        .route("/health", get(health_check))
        .nest("/cron", cron)
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("🛑 Shutdown signal received");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::traits::{AddressStatus, ChainProvider};
    use crate::adapters::ProviderRegistry;
    use crate::bootstrap::build_state;
    use crate::config::Config;
    use crate::error::ProbeError;
    use crate::ledger::memory::MemoryStore;
    use crate::ledger::models::{BtcNetwork, PaymentStatus, ProviderKind};
    use crate::ledger::settings::{KEY_CONFIRMATIONS, KEY_NETWORK, KEY_XPUB};
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    const TOKEN: &str = "s3cret";
    const XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";
    const TXID: &str = "cd00000000000000000000000000000000000000000000000000000000000001";

    /// Reports the same status for every address
    struct FlatExplorer {
        status: Mutex<AddressStatus>,
    }

    #[async_trait]
    impl ChainProvider for FlatExplorer {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Blockstream
        }

        async fn address_status(
            &self,
            _address: &str,
            _network: BtcNetwork,
        ) -> Result<AddressStatus, ProbeError> {
            Ok(self.status.lock().clone())
        }
    }

    fn test_config(rate_limit: u32) -> Config {
        Config {
            database_url: "postgresql://unused".to_string(),
            bind_address: "127.0.0.1:0".to_string(),
            cron_token: TOKEN.to_string(),
            reconcile_workers: 2,
            batch_deadline_secs: 5,
            probe_timeout_secs: 1,
            probe_max_attempts: 1,
            probe_backoff_ms: 1,
            probe_max_backoff_ms: 1,
            request_timeout_secs: 10,
            cron_rate_limit_per_minute: rate_limit,
            blockstream_base_url: None,
            blockcypher_base_url: None,
            blockcypher_token: None,
        }
    }

    async fn app_with(rate_limit: u32) -> (Router, Arc<MemoryStore>, Arc<FlatExplorer>) {
        let store = Arc::new(MemoryStore::new());
        store.set_setting(KEY_NETWORK, "mainnet");
        store.set_setting(KEY_CONFIRMATIONS, "3");
        store.set_setting(KEY_XPUB, XPUB);

        let explorer = Arc::new(FlatExplorer {
            status: Mutex::new(AddressStatus::empty()),
        });
        let mut registry = ProviderRegistry::new();
        registry.register(explorer.clone());

        let config = test_config(rate_limit);
        let state = build_state(store.clone(), Arc::new(registry), &config);
        let app = create_app(state, config.request_timeout()).await;
        (app, store, explorer)
    }

    async fn app() -> (Router, Arc<MemoryStore>, Arc<FlatExplorer>) {
        app_with(100).await
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("x-cron-token", token);
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (app, _, _) = app().await;
        let (status, body) = send(&app, request("GET", "/health", None, None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["reconciling"], false);
    }

    #[tokio::test]
    async fn test_cron_requires_token() {
        let (app, _, _) = app().await;

        let (status, body) = send(&app, request("POST", "/cron/reconcile", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_code"], "UNAUTHORIZED");

        let (status, _) = send(&app, request("POST", "/cron/reconcile", Some("wrong"), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, request("GET", "/api/v1/payments/bc1qxyz", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_last_report_before_and_after_a_cycle() {
        let (app, _, _) = app().await;

        let (status, _) = send(&app, request("GET", "/cron/reconcile/last", Some(TOKEN), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, report) = send(&app, request("POST", "/cron/reconcile", Some(TOKEN), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["checked"], 0);
        assert_eq!(report["required_confirmations"], 3);

        let (status, last) = send(&app, request("GET", "/cron/reconcile/last", Some(TOKEN), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(last["cycle_id"], report["cycle_id"]);
    }

    #[tokio::test]
    async fn test_open_and_confirm_payment_end_to_end() {
        let (app, store, explorer) = app().await;

        let (status, created) = send(
            &app,
            request(
                "POST",
                "/api/v1/payments",
                Some(TOKEN),
                Some(json!({
                    "purpose": "order",
                    "reference_id": "7d0f3c1e-4b8a-4f3e-9a43-3c2a7f5b9e11",
                    "expected_amount": "0.001"
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "awaiting");
        assert_eq!(created["expected_amount"], "0.00100000");
        let address = created["address"].as_str().unwrap().to_string();
        assert!(address.starts_with("bc1q"));

        *explorer.status.lock() = AddressStatus {
            received_sats: 100_000,
            confirmations: 3,
            txid: Some(TXID.to_string()),
        };

        let (status, report) = send(&app, request("POST", "/cron/reconcile", Some(TOKEN), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["confirmed"], 1);
        assert_eq!(store.status_of(&address), Some(PaymentStatus::Confirmed));

        let uri = format!("/api/v1/payments/{}", address);
        let (status, payment) = send(&app, request("GET", &uri, Some(TOKEN), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payment["status"], "confirmed");
        assert_eq!(payment["received_amount"], "0.00100000");
        assert_eq!(payment["used"], true);
        assert_eq!(payment["latest_observation"]["txid"], TXID);
    }

    #[tokio::test]
    async fn test_create_payment_rejects_bad_amounts() {
        let (app, _, _) = app().await;

        for amount in ["0", "-0.1", "0.000000001", "abc", ""] {
            let (status, body) = send(
                &app,
                request(
                    "POST",
                    "/api/v1/payments",
                    Some(TOKEN),
                    Some(json!({
                        "purpose": "bond",
                        "reference_id": "7d0f3c1e-4b8a-4f3e-9a43-3c2a7f5b9e11",
                        "expected_amount": amount
                    })),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "amount {:?}", amount);
            assert_eq!(body["error_code"], "INVALID_INPUT");
        }
    }

    #[tokio::test]
    async fn test_unknown_address_is_404() {
        let (app, _, _) = app().await;
        let (status, body) = send(
            &app,
            request("GET", "/api/v1/payments/bc1qunknown", Some(TOKEN), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_cron_trigger_is_rate_limited() {
        let (app, _, _) = app_with(1).await;

        let (status, _) = send(&app, request("POST", "/cron/reconcile", Some(TOKEN), None)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, request("POST", "/cron/reconcile", Some(TOKEN), None)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error_code"], "RATE_LIMITED");
    }
}
