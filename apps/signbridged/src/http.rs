use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::ORIGIN;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use signbridge_dispatch::ChannelInfo;
use signbridge_relay::{Disposition, SignRelay};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub relay: SignRelay,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/sign", post(sign))
        .route("/v1/channels", get(channels))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn status_for(disposition: Disposition) -> StatusCode {
    match disposition {
        Disposition::Accepted => StatusCode::ACCEPTED,
        Disposition::OriginRejected => StatusCode::FORBIDDEN,
        Disposition::Invalid => StatusCode::BAD_REQUEST,
        Disposition::DispatchFailed => StatusCode::BAD_GATEWAY,
    }
}

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "signbridged",
        "agent": state.relay.config().agent_name,
        "inFlight": state.relay.in_flight(),
    }))
}

/// The caller origin comes from the `Origin` header; the body is passed on
/// untouched.
async fn sign(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let origin = headers.get(ORIGIN).and_then(|value| value.to_str().ok());
    let response = state.relay.handle(origin, body).await;
    (status_for(response.disposition), Json(response.ack)).into_response()
}

async fn channels(State(state): State<AppState>) -> Json<Vec<ChannelInfo>> {
    Json(state.relay.channels())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use signbridge_dispatch::MemoryConnector;
    use signbridge_policy::StaticOriginAllowlist;
    use signbridge_relay::{RelayBuilder, RelayConfig};
    use tower::ServiceExt;

    use super::*;

    const ORIGIN_URL: &str = "https://app.example.com";

    fn app(connector: &MemoryConnector) -> Router {
        let relay = RelayBuilder::new(RelayConfig::new(std::env::temp_dir().join("signbridged-http")))
            .connector(Arc::new(connector.clone()))
            .origin_policy(Arc::new(StaticOriginAllowlist::new([ORIGIN_URL])))
            .build();
        router(AppState { relay })
    }

    fn request_body() -> Value {
        json!({
            "protocolVersion": "1.0",
            "requestId": "req-http-1",
            "appId": "portal",
            "cert": { "certId": "cert-1" },
            "items": [{
                "id": "note-1",
                "dataType": "text",
                "content": { "mode": "inline", "encoding": "utf8", "content": "hello" },
                "upload": {
                    "uploadUrl": "https://files.example.com/signed/<objectId>",
                    "signedContentType": "string"
                },
                "callbacks": {
                    "onSuccess": "https://app.example.com/ok",
                    "onError": "https://app.example.com/err"
                }
            }]
        })
    }

    fn sign_request(origin: Option<&str>, body: &Value) -> Request<Body> {
        let mut builder = Request::post("/v1/sign").header("content-type", "application/json");
        if let Some(origin) = origin {
            builder = builder.header(ORIGIN, origin);
        }
        builder
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_request_returns_202_with_envelope() {
        let connector = MemoryConnector::new();
        let response = app(&connector)
            .oneshot(sign_request(Some(ORIGIN_URL), &request_body()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["requestId"], "req-http-1");
        assert_eq!(body["protocolVersion"], "1.0");
        assert!(body.get("errors").is_none());
        assert_eq!(connector.sessions().len(), 1);
    }

    #[tokio::test]
    async fn missing_origin_header_is_forbidden() {
        let response = app(&MemoryConnector::new())
            .oneshot(sign_request(None, &request_body()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json_body(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["errors"][0]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn invalid_request_returns_400() {
        let mut body = request_body();
        body["items"][0]["callbacks"]["onError"] = json!("http://app.example.com/err");
        let response = app(&MemoryConnector::new())
            .oneshot(sign_request(Some(ORIGIN_URL), &body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["errors"][0]["code"], "BAD_REQUEST");
        assert_eq!(body["requestId"], "req-http-1");
    }

    #[tokio::test]
    async fn dispatch_failure_returns_502() {
        let response = app(&MemoryConnector::refusing("not installed"))
            .oneshot(sign_request(Some(ORIGIN_URL), &request_body()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert_eq!(body["errors"][0]["code"], "INTERNAL_ERROR");
    }

    #[tokio::test(start_paused = true)]
    async fn healthz_and_channels_report_open_channels() {
        let connector = MemoryConnector::new();
        let app = app(&connector);
        let response = app
            .clone()
            .oneshot(sign_request(Some(ORIGIN_URL), &request_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let health = app
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let health = json_body(health).await;
        assert_eq!(health["status"], "ok");
        assert_eq!(health["inFlight"], 1);
        assert_eq!(health["agent"], "com.ase.signer");

        let channels = app
            .oneshot(Request::get("/v1/channels").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let channels = json_body(channels).await;
        assert_eq!(channels[0]["requestId"], "req-http-1");
        assert!(channels[0]["openedAt"].is_string());
    }
}
