use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use wamux_whatsapp::{
    auth::SIGNATURE_HEADER, EventSink, VerifyQuery, WaResult, WebhookProcessor, WebhookReply,
    WhatsApp,
};

#[derive(Clone)]
pub struct ApiService {
    pub whatsapp: WhatsApp,
    pub processor: Arc<WebhookProcessor>,
}

impl ApiService {
    pub fn new(whatsapp: WhatsApp, events: Arc<dyn EventSink>) -> Self {
        let processor = Arc::new(whatsapp.webhook_processor(events));
        Self {
            whatsapp,
            processor,
        }
    }

    pub async fn start_server(
        self: Arc<Self>,
        bind: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = self.create_router();

        let listener = tokio::net::TcpListener::bind(bind).await?;
        info!("wamux webhook server listening on {}", listener.local_addr()?);
        axum::serve(listener, app).await?;

        Ok(())
    }

    pub fn create_router(self: Arc<Self>) -> Router {
        let webhook = self.whatsapp.config().webhook_route();
        info!("Webhook routes mounted at {webhook}");
        Router::new()
            .route("/health", get(health_check))
            .route(&webhook, get(verify_webhook).post(receive_webhook))
            .with_state(self)
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "wamux",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Subscription handshake: echo `hub.challenge` when the token matches.
/// A query that cannot be decoded is a failed handshake.
async fn verify_webhook(
    State(api): State<Arc<ApiService>>,
    query: Result<Query<VerifyQuery>, QueryRejection>,
) -> Response {
    match query {
        Ok(Query(query)) => into_response(api.processor.verify(&query).await),
        Err(rejection) => {
            warn!("Webhook verification rejected: {rejection}");
            into_response(Ok(WebhookReply::Forbidden))
        }
    }
}

async fn receive_webhook(
    State(api): State<Arc<ApiService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    into_response(api.processor.handle(signature, &body).await)
}

fn into_response(result: WaResult<WebhookReply>) -> Response {
    match result {
        Ok(reply) => {
            let status =
                StatusCode::from_u16(reply.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            match reply.json_body() {
                Some(body) => (status, Json(body)).into_response(),
                None => (status, reply.text_body()).into_response(),
            }
        }
        Err(e) => {
            error!("Webhook handling failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
