use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

use crate::{
    address::{Address, Consent},
    classify::{VerificationLevel, VlSource},
    engine::{ScoringEngine, Submission},
    error::{LedgerError, ScoringError, StoreError},
    evidence::{EvidenceInput, EvidenceRecord},
    fingerprint,
    ledger::{AuditProof, LedgerReceipt, RevisionLedger},
    result::{
        AdminDiff, AdminReviewAction, CategoryComparison, ReviewProvenance, ReviewStatus,
        ValidationResult,
    },
    router::EscalationPath,
    signer::RevisionSigner,
    store::{DashboardStats, HistoryItem, QueueItem, RequestMeta, ResultStore},
};

/// 外部认证网关写入的主体标识头
pub const SUBJECT_HEADER: &str = "x-subject-id";

const HISTORY_LIMIT: usize = 20;
const QUEUE_DEFAULT_LIMIT: usize = 50;
const QUEUE_MAX_LIMIT: usize = 200;

// ==========================================
// 1. 应用状态 (Shared State)
// ==========================================
// 所有 HTTP 请求共享这个状态。
// 结果仓库自己处理并发（sled 事务）；MMR 账本是追加写的内存结构，需要 Mutex。
pub struct AppState {
    pub engine: ScoringEngine,
    pub store: ResultStore,
    pub ledger: Arc<Mutex<RevisionLedger>>,
    pub signer: Arc<RevisionSigner>,
}

// ==========================================
// 2. 数据传输对象 (DTOs)
// ==========================================

/// 请求：提交地址校验
#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub user_id: String,
    pub address: Address,
    pub consent: Consent,
    /// 上游采集器产出的证据
    pub evidence: Vec<EvidenceInput>,
    #[serde(default)]
    pub pattern_flags: Vec<String>,
    #[serde(default)]
    pub position_confidence_meters: Option<f64>,
    /// 历史投递时间，用于时间衰减信号
    #[serde(default)]
    pub deliveries: Vec<chrono::DateTime<Utc>>,
}

/// 存证回执：账本位置 + 签名
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(flatten)]
    pub ledger: LedgerReceipt,
    pub signature: String,
}

/// 响应：校验结果，附带存证回执
///
/// 修订版提交之后签名或账本追赶失败时没有回执；叶子已经落盘，重启重放后即可开具证明。
#[derive(Debug, Serialize)]
pub struct PublishedResult {
    #[serde(flatten)]
    pub result: ValidationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Receipt>,
}

/// 响应：复核差异，附带新修订版的回执
#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    #[serde(flatten)]
    pub diff: AdminDiff,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Receipt>,
}

/// 审计轨迹里的一条：一个修订版
#[derive(Debug, Serialize)]
pub struct AuditTrailEntry {
    pub revision: u32,
    pub acs: f64,
    pub vl: VerificationLevel,
    pub vl_source: VlSource,
    pub escalation_path: EscalationPath,
    pub review: Option<ReviewProvenance>,
    /// 账本叶子位置，可用 `/api/audit/{pos}` 取证明
    pub ledger_pos: Option<u64>,
    pub computed_at: chrono::DateTime<Utc>,
}

/// 响应：管理员复核详情
#[derive(Debug, Serialize)]
pub struct ReviewDetail {
    pub request_id: String,
    pub subject_id: String,
    pub status: ReviewStatus,
    pub created_at: chrono::DateTime<Utc>,
    pub consent: Consent,
    pub address: Address,
    /// 最新修订版（含证据）
    pub result: ValidationResult,
    /// 最新在前
    pub audit_trail: Vec<AuditTrailEntry>,
}

#[derive(Debug, Deserialize)]
pub struct QueueParams {
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub queue: Vec<QueueItem>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub history: Vec<HistoryItem>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ledger_leaves: usize,
    pub public_key: String,
}

// ==========================================
// 3. 错误映射
// ==========================================

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("missing or empty `x-subject-id` header")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ApiError::NotFound(format!("validation request {id}")),
            StoreError::Scoring(e) => ApiError::Scoring(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnknownLeaf(pos) => ApiError::NotFound(format!("ledger leaf {pos}")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Scoring(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.code()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            code,
        };
        (status, Json(body)).into_response()
    }
}

// ==========================================
// 4. API 路由构建
// ==========================================
pub fn app(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/validate", post(validate_address))
        .route("/result/{request_id}", get(get_result))
        .route("/result/{request_id}/revisions", get(get_revisions))
        .route("/history", get(get_history))
        .route("/admin/confirm", post(admin_confirm))
        .route("/admin/queue", get(admin_queue))
        .route("/admin/dashboard", get(admin_dashboard))
        .route("/admin/review/{request_id}", get(admin_review_detail))
        .route("/audit/{pos}", get(get_audit_proof));

    Router::new()
        .nest("/api", api)
        .route("/health", get(health))
        .layer(CorsLayer::permissive()) // ⚠️ 开发模式：允许所有跨域
        .with_state(state)
}

// ==========================================
// 5. 处理函数 (Handlers)
// ==========================================

/// 接口：提交地址校验请求 (AVR)
async fn validate_address(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidateRequest>,
) -> Result<Json<PublishedResult>, ApiError> {
    let evidence = req
        .evidence
        .into_iter()
        .map(EvidenceRecord::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    let request_id = new_request_id();
    let now = Utc::now();
    tracing::info!(%request_id, user_id = %req.user_id, signals = evidence.len(), "validation requested");

    // 先算分，失败时不落任何数据
    let submission = Submission {
        evidence,
        pattern_flags: req.pattern_flags,
        position_confidence_meters: req.position_confidence_meters,
        deliveries: req.deliveries,
        address_fingerprint: Some(fingerprint::address_fingerprint(&req.address)),
    };
    let mut result = state.engine.evaluate(&request_id, submission, now)?;

    let category = req.address.category_key();
    let peers = state.store.category_peers(&category, &request_id)?;
    result.category_avg_comparison = CategoryComparison::from_peers(&category, &peers, result.acs);

    // 元数据、修订版 0 与账本叶子一起提交
    let meta = RequestMeta {
        request_id: request_id.clone(),
        subject_id: req.user_id,
        address: req.address,
        consent: req.consent,
        created_at: now,
    };
    let seq = state.store.publish(&meta, &result)?;
    let receipt = publish_receipt(&state, &result, seq).await;

    tracing::info!(
        %request_id,
        acs = result.acs,
        vl = %result.vl,
        path = %result.escalation_path,
        token = result.token_available,
        "validation completed"
    );

    Ok(Json(PublishedResult { result, receipt }))
}

/// 接口：查询最新结果
async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Result<Json<ValidationResult>, ApiError> {
    Ok(Json(state.store.latest(&request_id)?))
}

/// 接口：查询全部修订版
async fn get_revisions(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Result<Json<Vec<ValidationResult>>, ApiError> {
    Ok(Json(state.store.revisions(&request_id)?))
}

/// 接口：当前主体的历史记录
async fn get_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<HistoryResponse>, ApiError> {
    let subject = headers
        .get(SUBJECT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ApiError::Unauthorized)?;

    let history = state.store.history(subject, HISTORY_LIMIT)?;
    Ok(Json(HistoryResponse { history }))
}

/// 接口：管理员确认 / 覆盖
async fn admin_confirm(
    State(state): State<Arc<AppState>>,
    Json(action): Json<AdminReviewAction>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    tracing::info!(
        request_id = %action.request_id,
        admin_id = %action.admin_id,
        postman = action.postman_confirmed,
        delivery = action.delivery_confirmed,
        mark_vl = ?action.mark_vl,
        "admin review received"
    );

    // sled 事务冲突时会重跑闭包，放到阻塞线程池里
    let store = state.store.clone();
    let engine = state.engine.clone();
    let (old, new, seq) = tokio::task::spawn_blocking(move || {
        let now = Utc::now();
        store.supersede(&action.request_id, |prev| engine.apply_review(prev, &action, now))
    })
    .await
    .map_err(|e| ApiError::Internal(format!("task join error: {e}")))??;

    let receipt = publish_receipt(&state, &new, seq).await;

    tracing::info!(
        request_id = %new.request_id,
        revision = new.revision,
        old_acs = old.acs,
        new_acs = new.acs,
        vl = %new.vl,
        path = %new.escalation_path,
        "admin review applied"
    );

    Ok(Json(ConfirmResponse {
        diff: AdminDiff::between(&old, &new),
        receipt,
    }))
}

/// 接口：管理员队列
async fn admin_queue(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueueParams>,
) -> Result<Json<QueueResponse>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(QUEUE_DEFAULT_LIMIT)
        .clamp(1, QUEUE_MAX_LIMIT);
    let queue = state.store.queue(params.offset, limit)?;
    Ok(Json(QueueResponse { queue }))
}

/// 接口：管理台指标
async fn admin_dashboard(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DashboardStats>, ApiError> {
    Ok(Json(state.store.dashboard(Utc::now())?))
}

/// 接口：管理员复核详情（元数据 + 最新结果 + 审计轨迹）
async fn admin_review_detail(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Result<Json<ReviewDetail>, ApiError> {
    let meta = state.store.meta(&request_id)?;
    let revisions = state.store.revisions(&request_id)?;

    let positions = {
        let mut ledger = state.ledger.lock().await;
        ledger.sync()?;
        ledger.positions_for(&request_id)
    };

    let audit_trail = revisions
        .iter()
        .rev()
        .map(|rev| AuditTrailEntry {
            revision: rev.revision,
            acs: rev.acs,
            vl: rev.vl,
            vl_source: rev.vl_source.clone(),
            escalation_path: rev.escalation_path,
            review: rev.last_review.clone(),
            ledger_pos: positions.get(&rev.revision).copied(),
            computed_at: rev.computed_at,
        })
        .collect();

    let result = revisions
        .into_iter()
        .last()
        .ok_or_else(|| ApiError::NotFound(format!("validation request {request_id}")))?;

    Ok(Json(ReviewDetail {
        request_id: meta.request_id,
        subject_id: meta.subject_id,
        status: result.review_status(),
        created_at: meta.created_at,
        consent: meta.consent,
        address: meta.address,
        result,
        audit_trail,
    }))
}

/// 接口：获取审计证明
async fn get_audit_proof(
    State(state): State<Arc<AppState>>,
    Path(pos): Path<u64>,
) -> Result<Json<AuditProof>, ApiError> {
    tracing::debug!(pos, "audit proof requested");
    let mut ledger = state.ledger.lock().await;
    ledger.sync()?;
    Ok(Json(ledger.proof(pos)?))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let mut ledger = state.ledger.lock().await;
    if let Err(e) = ledger.sync() {
        tracing::warn!(error = %e, "ledger replay failed");
    }
    let ledger_leaves = ledger.len();
    drop(ledger);
    Json(HealthResponse {
        status: "ok",
        ledger_leaves,
        public_key: hex::encode(state.signer.public_key().to_bytes()),
    })
}

// ==========================================
// 6. 内部工具
// ==========================================

/// 修订版已经连同叶子提交；这里签名，并让内存 MMR 追上磁盘后开回执
///
/// 失败只记日志：修订版已经是权威版本，请求本身算成功。
async fn publish_receipt(state: &AppState, result: &ValidationResult, seq: u64) -> Option<Receipt> {
    let signature = match state.signer.sign(result) {
        Ok(signature) => signature,
        Err(e) => {
            tracing::error!(request_id = %result.request_id, revision = result.revision, error = %e, "signing failed");
            return None;
        }
    };

    let mut ledger = state.ledger.lock().await;
    let receipt = ledger.sync().and_then(|_| ledger.receipt(seq));
    match receipt {
        Ok(receipt) => Some(Receipt {
            ledger: receipt,
            signature: hex::encode(signature.to_bytes()),
        }),
        Err(e) => {
            tracing::error!(
                request_id = %result.request_id,
                revision = result.revision,
                seq,
                error = %e,
                "ledger replay lagging, receipt withheld"
            );
            None
        }
    }
}

/// `vr_` + 12 位 hex
fn new_request_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("vr_{}", &id[..12])
}
