//! HTTP boundary of the node
//!
//! * `POST /receive` takes `"<program>|<suffix>,<input>|<suffix>"`, executes
//!   the program and queues its output as a transaction.
//! * `GET /status` reports the tip, the pool and the coordinator.
//! * `POST /blocks` accepts block announcements from peers and logs them.

use crate::coordinator::{CoordinatorState, MiningCoordinator, MiningStats};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::types::{Block, ContentRef, Tip, Transaction};
use axum::{
    extract::{ConnectInfo, State},
    http::{Extensions, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const PROGRAM_SUFFIX: &str = ".py";
const INPUT_SUFFIX: &str = ".txt";

/// Program and input named by a `/receive` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub program: ContentRef,
    pub input: ContentRef,
}

fn parse_entry(entry: &str, default_suffix: &str) -> Result<ContentRef> {
    let (address, suffix) = entry
        .split_once('|')
        .ok_or_else(|| Error::input_validation("Hashes must include file extensions"))?;

    let address = address.trim();
    if address.is_empty() {
        return Err(Error::input_validation("Hashes must not be empty"));
    }

    let suffix = suffix.trim();
    let suffix = if suffix.ends_with(default_suffix) {
        suffix
    } else {
        default_suffix
    };

    Ok(ContentRef::new(address, suffix))
}

/// Validate a `/receive` body. Nothing is touched on failure.
pub fn parse_receive_body(body: &str) -> Result<ReceiveRequest> {
    let entries: Vec<&str> = body.split(',').collect();
    let [program, input] = entries.as_slice() else {
        return Err(Error::input_validation(
            "Expected two hashes: one for the Python file and one for the text file",
        ));
    };

    Ok(ReceiveRequest {
        program: parse_entry(program, PROGRAM_SUFFIX)?,
        input: parse_entry(input, INPUT_SUFFIX)?,
    })
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::InputValidation { message } => (StatusCode::BAD_REQUEST, message).into_response(),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response(),
        }
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<MiningCoordinator>,
    pub executor: Arc<dyn Executor>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    creator: String,
    tip: Tip,
    pending_transactions: usize,
    batch_size: usize,
    difficulty: u32,
    state: CoordinatorState,
    stats: MiningStats,
}

/// Build the node's router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/receive", post(receive).fallback(method_not_allowed))
        .route("/status", get(status))
        .route("/blocks", post(announced_block))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` fires
pub async fn serve(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("Node listening on {}", addr);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn method_not_allowed() -> impl IntoResponse {
    (StatusCode::METHOD_NOT_ALLOWED, "Invalid request method")
}

fn client_ip(extensions: &Extensions) -> String {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn receive(State(state): State<AppState>, extensions: Extensions, body: String) -> Response {
    let origin = client_ip(&extensions);

    let request = match parse_receive_body(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(origin = %origin, error = %e, "Rejected receive request");
            return e.into_response();
        }
    };

    info!(
        origin = %origin,
        program = %request.program,
        input = %request.input,
        "Received computation request"
    );

    let output = match state.executor.execute(&request.program, &request.input).await {
        Ok(output) => output,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to execute program: {}", e),
            )
                .into_response();
        }
    };

    let pending = state
        .coordinator
        .ledger()
        .add_transaction(Transaction::new(origin, output));
    state.coordinator.trigger();
    info!(pending, "Queued computation result");

    (StatusCode::OK, "Hashes processed successfully").into_response()
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let coordinator = &state.coordinator;
    let settings = coordinator.settings();
    Json(StatusResponse {
        creator: settings.creator.clone(),
        tip: coordinator.ledger().tip(),
        pending_transactions: coordinator.ledger().pending_len(),
        batch_size: settings.batch_size,
        difficulty: settings.difficulty,
        state: coordinator.state(),
        stats: coordinator.stats(),
    })
}

async fn announced_block(extensions: Extensions, Json(block): Json<Block>) -> StatusCode {
    info!(
        from = %client_ip(&extensions),
        block_number = block.block_number,
        hash = %block.hash,
        previous_hash = %block.previous_hash,
        creator = %block.creator,
        transactions = block.transactions.len(),
        "Received block announcement"
    );
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::HttpAnnouncer;
    use crate::coordinator::MiningSettings;
    use crate::ledger::Ledger;
    use crate::retry::RetryPolicy;
    use crate::storage::MemoryStore;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use std::time::Duration;
    use tower::ServiceExt;

    struct EchoExecutor {
        fail: bool,
    }

    #[async_trait]
    impl Executor for EchoExecutor {
        async fn execute(&self, program: &ContentRef, input: &ContentRef) -> Result<String> {
            if self.fail {
                return Err(Error::execution("exit status: 1, output: Traceback"));
            }
            Ok(format!("{} on {}", program.file_name(), input.file_name()))
        }
    }

    fn state(fail: bool) -> AppState {
        let announcer =
            HttpAnnouncer::new(vec![], 8080, "/blocks", Duration::from_secs(1)).unwrap();
        let coordinator = MiningCoordinator::new(
            Arc::new(Ledger::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(announcer),
            MiningSettings::default(),
            RetryPolicy::none(),
        )
        .unwrap();
        AppState {
            coordinator: Arc::new(coordinator),
            executor: Arc::new(EchoExecutor { fail }),
        }
    }

    fn receive_request(body: &str) -> Request<Body> {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/receive")
            .body(Body::from(body.to_string()))
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([100, 64, 0, 7], 51000))));
        request
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_parse_normalises_suffixes() {
        let request = parse_receive_body(" QmProg | py , QmInput|.txt\n").unwrap();
        assert_eq!(request.program, ContentRef::new("QmProg", ".py"));
        assert_eq!(request.input, ContentRef::new("QmInput", ".txt"));

        let request = parse_receive_body("QmProg|algo.py,QmInput|.csv").unwrap();
        assert_eq!(request.program.suffix, "algo.py");
        assert_eq!(request.input.suffix, ".txt");
    }

    #[test]
    fn test_parse_rejects_wrong_entry_count() {
        for body in ["QmProg|.py", "a|.py,b|.txt,c|.txt", ""] {
            let err = parse_receive_body(body).unwrap_err();
            assert_matches!(err, Error::InputValidation { ref message } if message.starts_with("Expected two hashes"));
        }
    }

    #[test]
    fn test_parse_rejects_missing_suffix() {
        let err = parse_receive_body("QmProg,QmInput|.txt").unwrap_err();
        assert_matches!(err, Error::InputValidation { ref message } if message == "Hashes must include file extensions");

        let err = parse_receive_body(" |.py,QmInput|.txt").unwrap_err();
        assert_matches!(err, Error::InputValidation { .. });
    }

    #[tokio::test]
    async fn test_receive_queues_transaction() {
        let state = state(false);
        let app = router(state.clone());

        let response = app
            .oneshot(receive_request("QmProg|.py,QmInput|.txt"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Hashes processed successfully");

        let pending = state.coordinator.ledger().pending();
        assert_eq!(
            pending,
            vec![Transaction::new("100.64.0.7", "QmProg.py on QmInput.txt")]
        );
    }

    #[tokio::test]
    async fn test_receive_rejects_malformed_body_without_side_effects() {
        let state = state(false);
        let app = router(state.clone());

        let response = app.oneshot(receive_request("QmProg|.py")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.starts_with("Expected two hashes"));
        assert_eq!(state.coordinator.ledger().pending_len(), 0);
    }

    #[tokio::test]
    async fn test_receive_execution_failure_is_500() {
        let state = state(true);
        let app = router(state.clone());

        let response = app
            .oneshot(receive_request("QmProg|.py,QmInput|.txt"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("Traceback"));
        assert_eq!(state.coordinator.ledger().pending_len(), 0);
    }

    #[tokio::test]
    async fn test_receive_requires_post() {
        let app = router(state(false));
        let request = Request::builder()
            .method(Method::GET)
            .uri("/receive")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_status_reports_genesis() {
        let app = router(state(false));
        let request = Request::builder()
            .uri("/status")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["tip"]["hash"], "-1");
        assert_eq!(json["tip"]["blockNumber"], 0);
        assert_eq!(json["pendingTransactions"], 0);
        assert_eq!(json["batchSize"], 3);
        assert_eq!(json["state"], "idle");
        assert_eq!(json["stats"]["blocksMined"], 0);
    }

    #[tokio::test]
    async fn test_blocks_endpoint_accepts_announcement() {
        let block = crate::types::BlockTemplate::new(&Tip::genesis(), vec![], 0, "peer", 0)
            .seal(crate::types::Nonce::new(0), "ab".to_string());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/blocks")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&block).unwrap()))
            .unwrap();

        let response = router(state(false)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
