//! HTTP route handlers for the session lifecycle.
//!
//! - `POST /api/sessions/{user_id}/qr[?wait=true]`
//! - `POST /api/sessions/{user_id}/pairing-code[?wait=true&phone=..]`
//! - `GET /api/sessions/{user_id}`
//! - `DELETE /api/sessions/{user_id}`

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

use pairlink_core::session::{
    Artifact, AuthMethod, SessionError, SessionId, SessionStatus, UserId,
};

use super::SharedState;

/// Response envelope shared by every route.
#[derive(Serialize)]
pub struct ApiResponse {
    /// Whether the operation succeeded.
    pub success: bool,
    /// The result data (if successful).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message (if failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

type ApiResult = (StatusCode, Json<ApiResponse>);

#[derive(Debug, Default, Deserialize)]
pub struct StartQuery {
    /// Hold the response until the first artifact is issued.
    #[serde(default)]
    pub wait: bool,
    /// Phone number for pairing-code linking.
    pub phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairingBody {
    phone_number: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    session_id: SessionId,
    reused: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    store_degraded: bool,
    status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<Artifact>,
}

/// Handler for POST /api/sessions/{user_id}/qr
pub async fn start_qr(
    Path(user_id): Path<String>,
    Query(query): Query<StartQuery>,
    State(state): State<Arc<SharedState>>,
) -> ApiResult {
    let wait = query
        .wait
        .then(|| state.supervisor.config().qr_timeout());
    start(&state, UserId::new(user_id), AuthMethod::Qr, wait).await
}

/// Handler for POST /api/sessions/{user_id}/pairing-code
///
/// The phone number comes from the JSON body's `phoneNumber` or the `phone`
/// query parameter. The body wins when both are present.
pub async fn start_pairing(
    Path(user_id): Path<String>,
    Query(query): Query<StartQuery>,
    State(state): State<Arc<SharedState>>,
    body: Bytes,
) -> ApiResult {
    let body: PairingBody = if body.iter().all(u8::is_ascii_whitespace) {
        PairingBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(body) => body,
            Err(e) => {
                log::debug!("Rejected pairing body for {}: {}", user_id, e);
                return failure(StatusCode::BAD_REQUEST, "invalid request body".to_string());
            }
        }
    };

    let phone_number = body
        .phone_number
        .filter(|p| !p.trim().is_empty())
        .or(query.phone)
        .unwrap_or_default();
    let wait = query
        .wait
        .then(|| state.supervisor.config().pairing_timeout());
    start(
        &state,
        UserId::new(user_id),
        AuthMethod::PairingCode { phone_number },
        wait,
    )
    .await
}

/// Handler for GET /api/sessions/{user_id}
pub async fn get_status(
    Path(user_id): Path<String>,
    State(state): State<Arc<SharedState>>,
) -> ApiResult {
    match state.supervisor.get_status(&UserId::new(user_id)).await {
        Ok(record) => success(StatusCode::OK, &record),
        Err(e) => session_failure(&e),
    }
}

/// Handler for DELETE /api/sessions/{user_id}
pub async fn disconnect(
    Path(user_id): Path<String>,
    State(state): State<Arc<SharedState>>,
) -> ApiResult {
    match state.supervisor.disconnect(&UserId::new(user_id)).await {
        Ok(outcome) => success(
            StatusCode::OK,
            &serde_json::json!({
                "wasActive": outcome.was_active,
                "storeDegraded": outcome.store_degraded,
            }),
        ),
        Err(e) => session_failure(&e),
    }
}

async fn start(
    state: &SharedState,
    user_id: UserId,
    method: AuthMethod,
    wait: Option<Duration>,
) -> ApiResult {
    log::debug!("HTTP start session for {}", user_id);
    let started = match state.supervisor.start_session(&user_id, method).await {
        Ok(started) => started,
        Err(e) => return session_failure(&e),
    };

    let waited = match wait {
        Some(budget) => state.supervisor.wait_for_artifact(&user_id, budget).await,
        None => None,
    };
    let (status, artifact) = match state.supervisor.get_status(&user_id).await {
        Ok(record) => (record.status, waited.or_else(|| record.artifact())),
        Err(_) => (SessionStatus::Connecting, waited),
    };

    // Still negotiating with nothing to show: the caller should poll.
    let code = if wait.is_some() && artifact.is_none() && status == SessionStatus::Connecting {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    success(
        code,
        &StartResponse {
            session_id: started.session_id,
            reused: started.reused,
            store_degraded: started.store_degraded,
            status,
            artifact,
        },
    )
}

fn success<T: Serialize>(code: StatusCode, data: &T) -> ApiResult {
    match serde_json::to_value(data) {
        Ok(data) => (
            code,
            Json(ApiResponse {
                success: true,
                data: Some(data),
                error: None,
            }),
        ),
        Err(e) => failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to serialize response: {e}"),
        ),
    }
}

fn session_failure(error: &SessionError) -> ApiResult {
    let code = if error.is_client_fault() {
        StatusCode::BAD_REQUEST
    } else {
        log::warn!("Session operation failed: {}", error);
        StatusCode::SERVICE_UNAVAILABLE
    };
    failure(code, error.user_message())
}

fn failure(code: StatusCode, error: String) -> ApiResult {
    (
        code,
        Json(ApiResponse {
            success: false,
            data: None,
            error: Some(error),
        }),
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use pairlink_core::persistence::{MemoryCredentialStore, MemorySessionStore};
    use pairlink_core::protocol::{
        AuthRequest, Connection, CredentialMaterial, MediaRef, OpenedConnection,
        OutboundContent, ProtocolClient, ProtocolError, ProtocolEvent,
    };
    use pairlink_core::session::ConnectionSupervisor;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    struct NullConnection;

    #[async_trait]
    impl Connection for NullConnection {
        async fn send(&self, _: &str, _: OutboundContent) -> Result<(), ProtocolError> {
            Ok(())
        }

        async fn download_media(&self, _: &MediaRef) -> Result<Option<Vec<u8>>, ProtocolError> {
            Ok(None)
        }

        async fn logout(&self) -> Result<(), ProtocolError> {
            Ok(())
        }

        fn close(&self) {}

        fn account_chat_id(&self) -> Option<String> {
            None
        }
    }

    /// Opens connections that immediately emit one scripted event.
    struct ScriptedProtocol {
        first_event: Option<ProtocolEvent>,
        fail_open: bool,
        opens: Mutex<Vec<AuthRequest>>,
        links: Mutex<Vec<mpsc::Sender<ProtocolEvent>>>,
    }

    impl ScriptedProtocol {
        fn new(first_event: Option<ProtocolEvent>) -> Arc<Self> {
            Arc::new(Self {
                first_event,
                fail_open: false,
                opens: Mutex::new(Vec::new()),
                links: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                first_event: None,
                fail_open: true,
                opens: Mutex::new(Vec::new()),
                links: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ProtocolClient for ScriptedProtocol {
        fn fresh_credentials(&self) -> CredentialMaterial {
            CredentialMaterial::new(serde_json::json!({}))
        }

        async fn open(
            &self,
            _: &UserId,
            _: CredentialMaterial,
            auth: AuthRequest,
        ) -> Result<OpenedConnection, ProtocolError> {
            self.opens.lock().unwrap().push(auth);
            if self.fail_open {
                return Err(ProtocolError::OpenFailed("socket refused".to_string()));
            }
            let (tx, rx) = mpsc::channel(16);
            if let Some(event) = &self.first_event {
                tx.try_send(event.clone()).unwrap();
            }
            self.links.lock().unwrap().push(tx);
            Ok(OpenedConnection {
                connection: Arc::new(NullConnection),
                events: rx,
            })
        }
    }

    fn app(protocol: Arc<ScriptedProtocol>) -> axum::Router {
        let supervisor = ConnectionSupervisor::builder(
            protocol,
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryCredentialStore::new()),
        )
        .build();
        router(Arc::new(SharedState::new(supervisor)))
    }

    async fn call(
        app: &axum::Router,
        method: &str,
        uri: &str,
        body: &str,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    mod start {
        use super::*;

        #[tokio::test]
        async fn qr_wait_returns_the_artifact() {
            let app = app(ScriptedProtocol::new(Some(ProtocolEvent::QrIssued(
                "2@abc".to_string(),
            ))));

            let (status, json) = call(&app, "POST", "/api/sessions/alice/qr?wait=true", "").await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["success"], true);
            assert_eq!(json["data"]["status"], "connecting");
            assert_eq!(json["data"]["reused"], false);
            assert_eq!(json["data"]["artifact"]["kind"], "qr");
            assert_eq!(json["data"]["artifact"]["value"], "2@abc");
            assert!(json["data"]["sessionId"].is_string());
        }

        #[tokio::test]
        async fn second_start_reuses_the_session() {
            let protocol = ScriptedProtocol::new(None);
            let app = app(protocol.clone());

            let (_, first) = call(&app, "POST", "/api/sessions/alice/qr", "").await;
            let (status, second) = call(&app, "POST", "/api/sessions/alice/qr", "").await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(second["data"]["reused"], true);
            assert_eq!(second["data"]["sessionId"], first["data"]["sessionId"]);
            assert_eq!(protocol.opens.lock().unwrap().len(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn wait_without_artifact_is_accepted() {
            let app = app(ScriptedProtocol::new(None));

            let (status, json) = call(&app, "POST", "/api/sessions/alice/qr?wait=true", "").await;

            assert_eq!(status, StatusCode::ACCEPTED);
            assert_eq!(json["data"]["status"], "connecting");
            assert!(json["data"].get("artifact").is_none());
        }

        #[tokio::test]
        async fn open_failure_is_a_service_fault() {
            let app = app(ScriptedProtocol::failing());

            let (status, json) = call(&app, "POST", "/api/sessions/alice/qr", "").await;

            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(json["success"], false);
            assert!(!json["error"].as_str().unwrap().contains("socket refused"));
        }

        #[tokio::test]
        async fn invalid_user_id_is_a_client_fault() {
            let app = app(ScriptedProtocol::new(None));

            let (status, json) = call(&app, "POST", "/api/sessions/..%2Fetc/qr", "").await;

            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json["error"], "invalid user id");
        }
    }

    mod pairing {
        use super::*;

        #[tokio::test]
        async fn body_phone_number_wins_over_query() {
            let protocol = ScriptedProtocol::new(Some(ProtocolEvent::PairingCodeIssued(
                "ABCD1234".to_string(),
            )));
            let app = app(protocol.clone());

            let (status, json) = call(
                &app,
                "POST",
                "/api/sessions/alice/pairing-code?wait=true&phone=111111111",
                r#"{"phoneNumber":"+62 812-3456-7890"}"#,
            )
            .await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["data"]["artifact"]["kind"], "pairingCode");
            assert_eq!(json["data"]["artifact"]["value"], "ABCD1234");
            assert_eq!(
                protocol.opens.lock().unwrap().as_slice(),
                &[AuthRequest::PairingCode {
                    phone_number: "6281234567890".to_string()
                }]
            );
        }

        #[tokio::test]
        async fn query_phone_is_used_without_body() {
            let protocol = ScriptedProtocol::new(None);
            let app = app(protocol.clone());

            let (status, _) = call(
                &app,
                "POST",
                "/api/sessions/alice/pairing-code?phone=6281234567890",
                "",
            )
            .await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(
                protocol.opens.lock().unwrap().as_slice(),
                &[AuthRequest::PairingCode {
                    phone_number: "6281234567890".to_string()
                }]
            );
        }

        #[tokio::test]
        async fn missing_phone_number_is_rejected() {
            let protocol = ScriptedProtocol::new(None);
            let app = app(protocol.clone());

            let (status, json) =
                call(&app, "POST", "/api/sessions/alice/pairing-code", "{}").await;

            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json["error"], "phone number required");
            assert!(protocol.opens.lock().unwrap().is_empty());
        }

        #[tokio::test]
        async fn malformed_body_is_rejected() {
            let app = app(ScriptedProtocol::new(None));

            let (status, json) =
                call(&app, "POST", "/api/sessions/alice/pairing-code", "{nope").await;

            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json["error"], "invalid request body");
        }
    }

    mod status_and_disconnect {
        use super::*;

        #[tokio::test]
        async fn unknown_user_is_disconnected() {
            let app = app(ScriptedProtocol::new(None));

            let (status, json) = call(&app, "GET", "/api/sessions/bob", "").await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["data"]["userId"], "bob");
            assert_eq!(json["data"]["status"], "disconnected");
        }

        #[tokio::test]
        async fn status_shows_the_pending_qr() {
            let app = app(ScriptedProtocol::new(Some(ProtocolEvent::QrIssued(
                "2@xyz".to_string(),
            ))));
            call(&app, "POST", "/api/sessions/alice/qr?wait=true", "").await;

            let (_, json) = call(&app, "GET", "/api/sessions/alice", "").await;

            assert_eq!(json["data"]["status"], "connecting");
            assert_eq!(json["data"]["qrCode"], "2@xyz");
        }

        #[tokio::test]
        async fn disconnect_tears_down_the_session() {
            let app = app(ScriptedProtocol::new(None));
            call(&app, "POST", "/api/sessions/alice/qr", "").await;

            let (status, json) = call(&app, "DELETE", "/api/sessions/alice", "").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["data"]["wasActive"], true);

            let (_, json) = call(&app, "GET", "/api/sessions/alice", "").await;
            assert_eq!(json["data"]["status"], "disconnected");

            let (_, json) = call(&app, "DELETE", "/api/sessions/alice", "").await;
            assert_eq!(json["data"]["wasActive"], false);
        }
    }

    #[test]
    fn error_envelope_omits_data() {
        let (_, Json(body)) = failure(StatusCode::BAD_REQUEST, "nope".to_string());
        let json = serde_json::to_value(body).unwrap();
        assert_eq!(json, serde_json::json!({ "success": false, "error": "nope" }));
    }
}
