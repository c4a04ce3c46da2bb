//! HTTP API for the AuthChain ledger.
//!
//! ## Endpoint Overview
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/api/blocks` | Record a decision (201 finalized, 202 pending) |
//! | GET | `/api/blocks` | List every block |
//! | GET | `/api/blocks/{index}` | Get a block by index |
//! | GET | `/api/blocks/proposal/{proposal_id}` | Blocks recording a proposal |
//! | POST | `/api/verify` | Verify the whole chain |
//! | POST | `/api/validators` | Register a validator |
//! | GET | `/api/validators` | List validators (`?all=true` includes inactive) |
//! | DELETE | `/api/validators/{id}` | Deactivate a validator |
//! | GET | `/api/consensus/pending` | Blocks awaiting quorum |
//! | GET | `/api/consensus/stale` | Blocks that expired without quorum |
//! | POST | `/api/consensus/{hash}/reattest` | Run a fresh attestation round |
//! | GET | `/api/health` | Ledger summary |

use authchain_ledger::{
    Block, DecisionRecord, DecisionStatus, ErrorKind, LedgerError, LedgerService, LedgerStatus,
    StaleBlock, SubmitOutcome, Validator,
};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, Query, State,
    },
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The ledger.
    pub ledger: Arc<LedgerService>,
}

impl AppState {
    /// Creates state around a ledger.
    pub fn new(ledger: Arc<LedgerService>) -> Self {
        Self { ledger }
    }
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        let err = match self {
            ApiError::BadRequest(_) => return StatusCode::BAD_REQUEST,
            ApiError::Ledger(err) => err,
        };

        match err.kind() {
            ErrorKind::Integrity | ErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Attestation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::State => match err {
                LedgerError::NotFound(_)
                | LedgerError::IndexOutOfRange { .. }
                | LedgerError::UnknownValidator(_)
                | LedgerError::UnknownPendingBlock(_) => StatusCode::NOT_FOUND,
                LedgerError::AlreadyPending(_) | LedgerError::DuplicateValidator(_) => {
                    StatusCode::CONFLICT
                }
                _ => StatusCode::BAD_REQUEST,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (kind, index) = match &self {
            ApiError::Ledger(err) => (Some(err.kind().as_str()), err.block_index()),
            ApiError::BadRequest(_) => (None, None),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, kind = ?kind, index = ?index, "request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            kind,
            index,
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<u64>,
}

/// Result of recording or re-attesting a decision.
#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    /// `finalized`, or `pending` with `collected`/`required` counts.
    #[serde(flatten)]
    pub status: DecisionStatus,
    /// Whether the decision approved the tool call.
    pub approved: bool,
    pub proposal_id: String,
    pub checkpoint_id: String,
    /// Hash of the block holding the decision.
    pub block_hash: String,
    /// Chain index of the block.
    pub block_index: u64,
    /// Active validators when the round ran.
    pub validators: usize,
    /// Response time (unix seconds).
    pub timestamp: i64,
}

impl DecisionResponse {
    /// Builds the response for an outcome.
    pub fn new(outcome: &SubmitOutcome, validators: usize) -> Self {
        let data = &outcome.block.data;
        Self {
            status: outcome.status,
            approved: data.decision.approved,
            proposal_id: data.proposal_id.clone(),
            checkpoint_id: data.checkpoint_id.clone(),
            block_hash: outcome.block.hash.to_string(),
            block_index: outcome.block.index,
            validators,
            timestamp: crate::unix_now(),
        }
    }

    fn into_http(self) -> Response {
        let code = if self.status.is_finalized() {
            StatusCode::CREATED
        } else {
            StatusCode::ACCEPTED
        };
        (code, Json(self)).into_response()
    }
}

/// Block listing.
#[derive(Serialize)]
pub struct BlocksResponse {
    pub blocks: Vec<Arc<Block>>,
    pub length: usize,
}

/// Blocks recording one proposal.
#[derive(Serialize)]
pub struct ProposalBlocksResponse {
    pub proposal_id: String,
    pub blocks: Vec<Arc<Block>>,
    pub count: usize,
}

/// Validator listing.
#[derive(Serialize)]
pub struct ValidatorsResponse {
    pub validators: Vec<Validator>,
    pub count: usize,
    pub quorum_size: usize,
}

/// Request to register a validator.
#[derive(Debug, Deserialize)]
pub struct AddValidatorRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub public_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListValidatorsQuery {
    #[serde(default)]
    all: bool,
}

/// A block awaiting quorum.
#[derive(Serialize)]
pub struct PendingBlockInfo {
    pub index: u64,
    pub hash: String,
    pub proposal_id: String,
    pub tool_name: String,
    /// Attestations from currently active validators.
    pub collected: usize,
    /// Current quorum size.
    pub required: usize,
    /// When the block was proposed (unix seconds).
    pub proposed_at: i64,
    /// Seconds spent waiting so far.
    pub age_secs: u64,
}

/// Expired blocks.
#[derive(Serialize)]
pub struct StaleBlocksResponse {
    pub stale: Vec<StaleBlock>,
    pub count: usize,
}

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    #[serde(flatten)]
    pub ledger: LedgerStatus,
}

/// Builds the CORS layer. `*` allows any origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::ORIGIN, header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([header::CONTENT_LENGTH]);

    if origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    cors.allow_origin(origins)
}

/// Block and verification routes.
pub fn block_routes() -> Router<AppState> {
    Router::new()
        .route("/api/blocks", get(list_blocks).post(record_decision))
        .route("/api/blocks/{index}", get(get_block))
        .route(
            "/api/blocks/proposal/{proposal_id}",
            get(get_blocks_by_proposal),
        )
        .route("/api/verify", post(verify_chain))
}

/// Validator management routes.
pub fn validator_routes() -> Router<AppState> {
    Router::new()
        .route("/api/validators", get(list_validators).post(add_validator))
        .route("/api/validators/{id}", delete(remove_validator))
}

/// Consensus inspection routes.
pub fn consensus_routes() -> Router<AppState> {
    Router::new()
        .route("/api/consensus/pending", get(list_pending))
        .route("/api/consensus/stale", get(list_stale))
        .route("/api/consensus/{hash}/reattest", post(reattest))
}

/// Creates the API router.
pub fn create_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .merge(block_routes())
        .merge(validator_routes())
        .merge(consensus_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "authchain-node",
        version: env!("CARGO_PKG_VERSION"),
        ledger: state.ledger.status(),
    })
}

/// Records a decision and runs its attestation round.
async fn record_decision(
    State(state): State<AppState>,
    payload: Result<Json<DecisionRecord>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(record) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if let Some(field) = record.missing_field() {
        return Err(ApiError::BadRequest(format!("{} is required", field)));
    }

    let outcome = state.ledger.submit_decision(record)?;
    let validators = state.ledger.registry().active_count();
    Ok(DecisionResponse::new(&outcome, validators).into_http())
}

async fn list_blocks(State(state): State<AppState>) -> impl IntoResponse {
    let blocks = state.ledger.list_blocks();
    let length = blocks.len();
    Json(BlocksResponse { blocks, length })
}

async fn get_block(
    State(state): State<AppState>,
    index: Result<Path<u64>, PathRejection>,
) -> Result<Json<Arc<Block>>, ApiError> {
    let Path(index) = index.map_err(|_| ApiError::BadRequest("invalid index".into()))?;
    Ok(Json(state.ledger.get_block(index)?))
}

async fn get_blocks_by_proposal(
    State(state): State<AppState>,
    Path(proposal_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let blocks = state.ledger.get_blocks_by_proposal(&proposal_id)?;
    let count = blocks.len();
    Ok(Json(ProposalBlocksResponse {
        proposal_id,
        blocks,
        count,
    }))
}

/// Verifies the chain. A failure reports the offending block.
async fn verify_chain(State(state): State<AppState>) -> Response {
    match state.ledger.verify_chain() {
        Ok(length) => Json(serde_json::json!({
            "valid": true,
            "length": length,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, index = ?e.block_index(), "chain verification failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "valid": false,
                    "error": e.to_string(),
                    "kind": e.kind().as_str(),
                    "index": e.block_index(),
                })),
            )
                .into_response()
        }
    }
}

async fn add_validator(
    State(state): State<AppState>,
    payload: Result<Json<AddValidatorRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }

    let validator = state
        .ledger
        .add_validator(&req.id, &req.name, req.public_key)?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "validator added",
            "validator": validator,
            "quorum_size": state.ledger.quorum_size(),
        })),
    ))
}

async fn list_validators(
    State(state): State<AppState>,
    Query(query): Query<ListValidatorsQuery>,
) -> impl IntoResponse {
    let validators = if query.all {
        state.ledger.list_validators()
    } else {
        state.ledger.list_active_validators()
    };

    Json(ValidatorsResponse {
        count: validators.len(),
        validators,
        quorum_size: state.ledger.quorum_size(),
    })
}

async fn remove_validator(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.ledger.remove_validator(&id)?;
    Ok(Json(serde_json::json!({
        "message": "validator deactivated",
        "validator_id": id,
        "quorum_size": state.ledger.quorum_size(),
    })))
}

async fn list_pending(State(state): State<AppState>) -> impl IntoResponse {
    let consensus = state.ledger.consensus();
    let pending: Vec<PendingBlockInfo> = state
        .ledger
        .list_pending()
        .into_iter()
        .filter_map(|p| {
            // Skip entries finalized or expired since the listing was taken.
            let progress = consensus.progress(p.block.hash.as_str()).ok()?;
            Some(PendingBlockInfo {
                index: p.block.index,
                hash: p.block.hash.to_string(),
                proposal_id: p.block.data.proposal_id.clone(),
                tool_name: p.block.data.tool_name.clone(),
                collected: progress.collected,
                required: progress.required,
                proposed_at: p.proposed_at,
                age_secs: p.age().as_secs(),
            })
        })
        .collect();

    Json(pending)
}

async fn list_stale(State(state): State<AppState>) -> impl IntoResponse {
    let stale = state.ledger.list_stale();
    Json(StaleBlocksResponse {
        count: stale.len(),
        stale,
    })
}

async fn reattest(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, ApiError> {
    let outcome = state.ledger.reattest(&hash)?;
    let validators = state.ledger.registry().active_count();
    Ok(DecisionResponse::new(&outcome, validators).into_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn status_of(err: LedgerError) -> StatusCode {
        ApiError::from(err).status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(LedgerError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(LedgerError::IndexOutOfRange { index: 9, len: 1 }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(LedgerError::DuplicateValidator("v1".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(LedgerError::EmptyIdentifier),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(LedgerError::InvalidAttestation {
                validator_id: "v1".into(),
                block_hash: "ab".into(),
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(LedgerError::CorruptLedger {
                path: PathBuf::from("ledger.json"),
                source: Box::new(LedgerError::MissingPredecessor { index: 4 }),
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_cors_layer_accepts_wildcard_and_lists() {
        let _ = cors_layer(&["*".to_string()]);
        let _ = cors_layer(&["http://localhost:3000".to_string(), "not a header\n".to_string()]);
        let _ = cors_layer(&[]);
    }
}
