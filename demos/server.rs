//! REST API server example for the token ledger.
//!
//! Run with: `cargo run --example server`
//!
//! ## Endpoints
//!
//! - `GET  /accounts/{id}/balance` - Current balance
//! - `GET  /accounts/{id}/history?limit=N` - Recent ledger entries
//! - `POST /events` - Ingest an external payment event (idempotent)
//! - `POST /transfers` - Tip/gift transfer between accounts
//! - `POST /sessions/settle` - Bill a finished call session
//! - `GET  /reconciliation` - Latest reconciliation outcomes
//! - `POST /queues/{creator}/entries` - Join a creator's call queue
//! - `DELETE /queue-entries/{id}` - Leave the queue
//! - `GET  /queues/{creator}/position/{fan}` - Current queue position
//!
//! ## Example Usage
//!
//! ```bash
//! # Buy tokens (webhook-style; redelivery is safe)
//! curl -X POST http://localhost:3000/events \
//!   -H "Content-Type: application/json" \
//!   -d '{"event_id": "evt_1", "account_id": 1, "amount_tokens": 500, "kind": "purchase"}'
//!
//! # Tip a creator
//! curl -X POST http://localhost:3000/transfers \
//!   -H "Content-Type: application/json" \
//!   -d '{"from": 1, "to": 2, "amount": 30, "reason": "tip"}'
//!
//! # Check the balance
//! curl http://localhost:3000/accounts/1/balance
//! ```

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use token_ledger::{
    AccountId, CallQueue, LedgerError, PaymentEvent, PayoutBatcher, PricingCalculator,
    QueueEntryId, ReconciliationAuditor, ReconciliationRecord, ServiceType, SessionEnd,
    Settings, Tokens, TransactionEngine,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
struct TransferRequest {
    from: u64,
    to: u64,
    amount: Tokens,
    reason: String,
}

#[derive(Debug, Serialize)]
struct TransferResponse {
    ref_id: String,
    from_balance: Tokens,
    to_balance: Tokens,
}

#[derive(Debug, Serialize)]
struct BalanceResponse {
    account: u64,
    balance: Tokens,
}

#[derive(Debug, Serialize)]
struct EventResponse {
    entry_id: u64,
    amount: Tokens,
    replayed: bool,
}

#[derive(Debug, Serialize)]
struct SettleResponse {
    session_id: String,
    billed_minutes: u32,
    total_cost: Tokens,
}

#[derive(Debug, Deserialize)]
struct EnqueueRequest {
    fan_id: u64,
    service: ServiceType,
    duration_minutes: u32,
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    entry_id: u64,
    position: u32,
    estimated_cost: Tokens,
    rate_per_minute: Tokens,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

// === Application State ===

#[derive(Clone)]
struct AppState {
    engine: Arc<TransactionEngine>,
    auditor: Arc<ReconciliationAuditor>,
    queue: Arc<CallQueue>,
    pricing: Arc<PricingCalculator>,
}

// === Error Handling ===

struct AppError(LedgerError);

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            LedgerError::InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
            LedgerError::InsufficientBalance { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_BALANCE")
            }
            LedgerError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND"),
            LedgerError::SelfTransfer => (StatusCode::BAD_REQUEST, "SELF_TRANSFER"),
            LedgerError::DuplicateEvent => (StatusCode::CONFLICT, "DUPLICATE_EVENT"),
            LedgerError::IntegrityViolation(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTEGRITY_VIOLATION")
            }
            LedgerError::QueueEntryNotFound => (StatusCode::NOT_FOUND, "QUEUE_ENTRY_NOT_FOUND"),
            LedgerError::AlreadyQueued => (StatusCode::CONFLICT, "ALREADY_QUEUED"),
            LedgerError::RecordNotFound => (StatusCode::NOT_FOUND, "RECORD_NOT_FOUND"),
            LedgerError::AlreadyResolved => (StatusCode::CONFLICT, "ALREADY_RESOLVED"),
            LedgerError::BatchNotFound => (StatusCode::NOT_FOUND, "BATCH_NOT_FOUND"),
            LedgerError::InvalidBatchState => (StatusCode::CONFLICT, "INVALID_BATCH_STATE"),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Handlers ===

/// GET /accounts/{id}/balance
async fn get_balance(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = state.engine.balance(AccountId(id))?;
    Ok(Json(BalanceResponse {
        account: id,
        balance,
    }))
}

/// GET /accounts/{id}/history?limit=N
async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(params): Query<HistoryParams>,
) -> Json<Vec<token_ledger::LedgerEntry>> {
    let entries = state
        .engine
        .history(AccountId(id), params.limit)
        .iter()
        .map(|e| (**e).clone())
        .collect();
    Json(entries)
}

/// POST /events - idempotent payment event ingestion.
async fn post_event(
    State(state): State<AppState>,
    Json(event): Json<PaymentEvent>,
) -> Result<(StatusCode, Json<EventResponse>), AppError> {
    let outcome = state.engine.process_payment_event(event)?;
    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(EventResponse {
            entry_id: outcome.entry.id.0,
            amount: outcome.entry.amount,
            replayed: outcome.replayed,
        }),
    ))
}

/// POST /transfers
async fn post_transfer(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> Result<(StatusCode, Json<TransferResponse>), AppError> {
    let receipt = state.engine.transfer(
        AccountId(request.from),
        AccountId(request.to),
        request.amount,
        &request.reason,
    )?;
    Ok((
        StatusCode::CREATED,
        Json(TransferResponse {
            ref_id: receipt.ref_id.to_string(),
            from_balance: receipt.debit.balance_after,
            to_balance: receipt.credit.balance_after,
        }),
    ))
}

/// POST /sessions/settle
async fn post_settle(
    State(state): State<AppState>,
    Json(session): Json<SessionEnd>,
) -> Result<(StatusCode, Json<SettleResponse>), AppError> {
    let receipt = state.engine.settle_session(session)?;
    Ok((
        StatusCode::CREATED,
        Json(SettleResponse {
            session_id: receipt.session_id.0,
            billed_minutes: receipt.billed_minutes,
            total_cost: receipt.total_cost,
        }),
    ))
}

/// GET /reconciliation
async fn get_reconciliation(State(state): State<AppState>) -> Json<Vec<ReconciliationRecord>> {
    Json(state.auditor.latest())
}

/// POST /queues/{creator}/entries
async fn post_enqueue(
    State(state): State<AppState>,
    Path(creator): Path<u64>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    let creator_id = AccountId(creator);
    let quote = state
        .pricing
        .quote(creator_id, request.service, request.duration_minutes);
    let entry = state.queue.enqueue(
        creator_id,
        AccountId(request.fan_id),
        quote.estimated_total,
    )?;
    Ok((
        StatusCode::CREATED,
        Json(EnqueueResponse {
            entry_id: entry.id.0,
            position: entry.position,
            estimated_cost: entry.estimated_cost,
            rate_per_minute: quote.rate_per_minute,
        }),
    ))
}

/// DELETE /queue-entries/{id}
async fn delete_queue_entry(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, AppError> {
    state.queue.dequeue(QueueEntryId(id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /queues/{creator}/position/{fan}
async fn get_position(
    State(state): State<AppState>,
    Path((creator, fan)): Path<(u64, u64)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let position = state
        .queue
        .position(AccountId(creator), AccountId(fan))
        .ok_or(LedgerError::QueueEntryNotFound)?;
    Ok(Json(serde_json::json!({ "position": position })))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/accounts/{id}/balance", get(get_balance))
        .route("/accounts/{id}/history", get(get_history))
        .route("/events", post(post_event))
        .route("/transfers", post(post_transfer))
        .route("/sessions/settle", post(post_settle))
        .route("/reconciliation", get(get_reconciliation))
        .route("/queues/{creator}/entries", post(post_enqueue))
        .route("/queue-entries/{id}", delete(delete_queue_entry))
        .route("/queues/{creator}/position/{fan}", get(get_position))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = Settings::default();
    let engine = Arc::new(TransactionEngine::new());
    let auditor = Arc::new(ReconciliationAuditor::new(Arc::clone(&engine)));
    let batcher = Arc::new(PayoutBatcher::new(
        Arc::clone(&engine),
        settings.min_payout_tokens,
        settings.usd_per_token,
        settings.platform_fee_rate,
    ));
    let queue = Arc::new(CallQueue::new(settings.queue_ttl_minutes));
    let pricing = Arc::new(PricingCalculator::new(Arc::clone(&queue)));

    // Background jobs: none of these sit in the request path, and each run
    // is safe to repeat after an interruption.
    {
        let auditor = Arc::clone(&auditor);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                auditor.run_balance_check();
                auditor.run_double_entry_check();
            }
        });
    }
    {
        let batcher = Arc::clone(&batcher);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(300));
            loop {
                ticker.tick().await;
                if let Err(e) = batcher.run() {
                    tracing::error!(error = %e, "payout batching run failed");
                }
            }
        });
    }
    {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                queue.expire_stale();
            }
        });
    }

    let state = AppState {
        engine,
        auditor,
        queue,
        pricing,
    };
    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("Token ledger API server running on http://127.0.0.1:3000");

    axum::serve(listener, app).await.unwrap();
}
