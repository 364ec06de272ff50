use thiserror::Error;

/// 评分核心的错误分类
///
/// 所有错误都是本次调用的终态：核心从不重试，也从不编造默认分数。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    /// 证据格式非法（分数/权重越界、类型未知），拒绝计算
    #[error("invalid evidence: {0}")]
    InvalidEvidence(String),

    /// 证据序列为空，无法计算 ACS
    #[error("no evidence supplied")]
    NoEvidence,

    /// 所有权重为 0，加权平均没有定义
    #[error("all evidence weights are zero")]
    DegenerateWeights,

    /// 管理员覆盖引用了不存在的 VL
    #[error("unknown verification level override: {0}")]
    UnknownOverride(String),
}

impl ScoringError {
    /// 给 API 层使用的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            ScoringError::InvalidEvidence(_) => "INVALID_EVIDENCE",
            ScoringError::NoEvidence => "NO_EVIDENCE",
            ScoringError::DegenerateWeights => "DEGENERATE_WEIGHTS",
            ScoringError::UnknownOverride(_) => "UNKNOWN_OVERRIDE",
        }
    }
}

/// 结果仓库的错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("validation request not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// 审计账本 (MMR) 的错误
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("MMR error: {0}")]
    Mmr(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("leaf position {0} is not in the ledger")]
    UnknownLeaf(u64),

    /// 序号已落盘但内存 MMR 还没追上
    #[error("ledger sequence {0} has not been replayed")]
    UnknownSequence(u64),
}
