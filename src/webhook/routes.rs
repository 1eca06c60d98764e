//! Axum routes.
//!
//! `POST /sms/webhook` answers authenticated provider deliveries with TwiML.
//! Signature or config failures get a bare 403/500; everything past the
//! signature check gets a 200 with a well-formed reply.

use std::sync::Arc;

use axum::extract::rejection::FormRejection;
use axum::extract::{Form, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::error::{DatabaseError, PipelineError};
use crate::notify::Notifier;
use crate::pipeline::{InboundProcessor, InboundSms};
use crate::sms::twiml::CONTENT_TYPE;
use crate::sms::{SignatureCheck, SignatureValidator};

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<InboundProcessor>,
    pub validator: Arc<SignatureValidator>,
    /// `None` when no outbound sender is configured.
    pub notifier: Option<Arc<Notifier>>,
}

/// POST /sms/webhook
async fn sms_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<Vec<(String, String)>>, FormRejection>,
) -> Response {
    // An unreadable body is still checked so the caller gets the same answer
    // as any other unsigned request.
    let params = match form {
        Ok(Form(params)) => params,
        Err(e) => {
            warn!(error = %e, "Webhook body is not a form");
            Vec::new()
        }
    };

    match state.validator.validate(&headers, &params) {
        SignatureCheck::Valid => {}
        SignatureCheck::MissingConfig => {
            error!("Webhook secrets not configured, rejecting request");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        check => {
            warn!(reason = check.label(), "Webhook signature rejected");
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    let sms = InboundSms::from_params(&params);
    let processed = state.processor.handle(sms).await;

    (
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        processed.reply.render(),
    )
        .into_response()
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "service": "repair-sms"}))
}

/// POST /api/repairs/{repair_id}/estimates/{estimate_id}/notify
async fn notify_estimate(
    State(state): State<AppState>,
    Path((repair_id, estimate_id)): Path<(i64, i64)>,
) -> Response {
    let Some(notifier) = state.notifier else {
        return no_sender();
    };
    match notifier.send_estimate(repair_id, estimate_id).await {
        Ok(sent) => Json(sent).into_response(),
        Err(e) => notify_error(e),
    }
}

/// POST /api/repairs/{repair_id}/notify-ready
async fn notify_ready(
    State(state): State<AppState>,
    Path(repair_id): Path<i64>,
) -> Response {
    let Some(notifier) = state.notifier else {
        return no_sender();
    };
    match notifier.send_ready_for_pickup(repair_id).await {
        Ok(sent) => Json(sent).into_response(),
        Err(e) => notify_error(e),
    }
}

fn no_sender() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({"error": "SMS sending is not configured"})),
    )
        .into_response()
}

fn notify_error(e: PipelineError) -> Response {
    let status = match &e {
        PipelineError::Database(DatabaseError::NotFound { .. }) => StatusCode::NOT_FOUND,
        PipelineError::Notify(_) => StatusCode::CONFLICT,
        PipelineError::Sms(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %e, "Notification failed");
    } else {
        warn!(error = %e, "Notification refused");
    }
    (status, Json(serde_json::json!({"error": e.to_string()}))).into_response()
}

/// Build the application router.
///
/// The notify API has no authentication of its own and is only mounted when
/// `notify_api` is set.
pub fn app_router(state: AppState, notify_api: bool) -> Router {
    let mut router = Router::new()
        .route("/sms/webhook", post(sms_webhook))
        .route("/health", get(health));

    if notify_api {
        router = router
            .route(
                "/api/repairs/{repair_id}/estimates/{estimate_id}/notify",
                post(notify_estimate),
            )
            .route("/api/repairs/{repair_id}/notify-ready", post(notify_ready));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use secrecy::SecretString;
    use tower::ServiceExt;

    use crate::sms::signature::{SIGNATURE_HEADER, compute_signature};
    use crate::store::{LibSqlBackend, ShopStore};

    const TOKEN: &str = "test-token";
    const URL: &str = "https://shop.example.com/sms/webhook";

    async fn router(
        token: Option<&str>,
        notify_api: bool,
    ) -> (Arc<LibSqlBackend>, Router) {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let state = AppState {
            processor: Arc::new(InboundProcessor::new(store.clone(), "Fixit Labs")),
            validator: Arc::new(SignatureValidator::new(
                token.map(SecretString::from),
                Some(URL.to_string()),
            )),
            notifier: None,
        };
        (store, app_router(state, notify_api))
    }

    fn form_params() -> Vec<(String, String)> {
        [
            ("MessageSid", "SM100"),
            ("From", "+15551234567"),
            ("To", "+15550001111"),
            ("Body", "hello"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn encode(params: &[(String, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{k}={}", v.replace('+', "%2B").replace(' ', "+")))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn webhook_request(signature: Option<&str>) -> Request<Body> {
        let mut builder = Request::post("/sms/webhook")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(sig) = signature {
            builder = builder.header(SIGNATURE_HEADER, sig);
        }
        builder.body(Body::from(encode(&form_params()))).unwrap()
    }

    #[tokio::test]
    async fn signed_request_gets_twiml() {
        let (store, app) = router(Some(TOKEN), false).await;
        let sig = compute_signature(TOKEN, URL, &form_params()).unwrap();

        let resp = app.oneshot(webhook_request(Some(&sig))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], CONTENT_TYPE);
        let body = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#
        );
        assert_eq!(store.count_sms_messages().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn bad_signature_is_forbidden() {
        let (store, app) = router(Some(TOKEN), false).await;
        let resp = app.oneshot(webhook_request(Some("bm9wZQ=="))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body = to_bytes(resp.into_body(), 1024).await.unwrap();
        assert!(body.is_empty());
        assert_eq!(store.count_sms_messages().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_signature_is_forbidden() {
        let (store, app) = router(Some(TOKEN), false).await;
        let resp = app.oneshot(webhook_request(None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(store.count_sms_messages().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_token_is_server_error() {
        let (store, app) = router(None, false).await;
        let sig = compute_signature(TOKEN, URL, &form_params()).unwrap();
        let resp = app.oneshot(webhook_request(Some(&sig))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(resp.into_body(), 1024).await.unwrap();
        assert!(body.is_empty());
        assert_eq!(store.count_sms_messages().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn health_reports_service() {
        let (_store, app) = router(Some(TOKEN), false).await;
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["service"], "repair-sms");
    }

    #[tokio::test]
    async fn notify_api_is_opt_in() {
        let (_store, app) = router(Some(TOKEN), false).await;
        let resp = app
            .oneshot(
                Request::post("/api/repairs/1/notify-ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn notify_without_sender_is_unavailable() {
        let (_store, app) = router(Some(TOKEN), true).await;
        let resp = app
            .oneshot(
                Request::post("/api/repairs/1/estimates/2/notify")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
