use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::{VerificationLevel, VlSource};
use crate::evidence::EvidenceRecord;
use crate::fraud::FraudRisk;
use crate::router::EscalationPath;

/// 管理员 / 邮递员确认的实地核验信号
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmations {
    pub postman: bool,
    pub delivery: bool,
}

impl Confirmations {
    /// 合并：确认只会增加，不会撤销
    pub fn merge(self, postman: bool, delivery: bool) -> Self {
        Self {
            postman: self.postman || postman,
            delivery: self.delivery || delivery,
        }
    }
}

/// 最近一次人工复核的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewProvenance {
    pub admin_id: String,
    pub notes: String,
    pub reviewed_at: DateTime<Utc>,
}

/// 与同类地址的对比
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryComparison {
    pub category: String,
    pub average_acs: f64,
    pub difference: f64,
    pub percentile: u8,
}

impl CategoryComparison {
    pub fn from_peers(category: &str, peers: &[f64], acs: f64) -> Option<Self> {
        if peers.is_empty() {
            return None;
        }
        let average_acs = peers.iter().sum::<f64>() / peers.len() as f64;
        Some(Self::against(category.to_string(), average_acs, acs))
    }

    /// 同类均值不变，换一个 ACS 重新比较（复核加分之后）
    pub fn rebase(&self, acs: f64) -> Self {
        Self::against(self.category.clone(), self.average_acs, acs)
    }

    fn against(category: String, average_acs: f64, acs: f64) -> Self {
        Self {
            category,
            average_acs,
            difference: acs - average_acs,
            percentile: percentile(acs, average_acs),
        }
    }
}

/// 假定标准差 15 的分档近似百分位
fn percentile(score: f64, average: f64) -> u8 {
    let z = (score - average) / 15.0;
    match z {
        z if z >= 2.0 => 98,
        z if z >= 1.5 => 93,
        z if z >= 1.0 => 84,
        z if z >= 0.5 => 69,
        z if z >= 0.0 => 50,
        z if z >= -0.5 => 31,
        z if z >= -1.0 => 16,
        _ => 5,
    }
}

/// 校验结果的一个修订版
///
/// 修订版一旦发布就不可变；复核只会产生 `revision + 1` 的新版本。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub request_id: String,
    pub revision: u32,

    /// 最终 ACS（含确认加分）
    pub acs: f64,
    /// 仅由证据算出的 ACS
    pub base_acs: f64,

    pub vl: VerificationLevel,
    pub vl_source: VlSource,

    pub evidence: Vec<EvidenceRecord>,
    pub fraud_risk: Option<FraudRisk>,
    pub position_confidence_meters: Option<f64>,
    pub escalation_path: EscalationPath,
    pub category_avg_comparison: Option<CategoryComparison>,

    pub reason_codes: Vec<String>,
    pub suggestions: Vec<String>,
    pub token_available: bool,

    #[serde(default)]
    pub confirmations: Confirmations,
    pub last_review: Option<ReviewProvenance>,
    pub address_fingerprint: Option<String>,
    pub computed_at: DateTime<Utc>,
}

/// 请求在管理端的处理状态，由最新修订版推出，不单独存储
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// 走人工路径，还没人复核
    AwaitingReview,
    /// 直接签发 token，不需要人工
    AutoApproved,
    /// 管理员复核过
    Reviewed,
}

impl ValidationResult {
    pub fn review_status(&self) -> ReviewStatus {
        if self.last_review.is_some() {
            ReviewStatus::Reviewed
        } else if self.escalation_path == EscalationPath::AutoToken {
            ReviewStatus::AutoApproved
        } else {
            ReviewStatus::AwaitingReview
        }
    }
}

/// 管理员复核指令（由外部管理端产生）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdminReviewAction {
    pub request_id: String,
    pub admin_id: String,
    #[serde(default)]
    pub postman_confirmed: bool,
    #[serde(default)]
    pub delivery_confirmed: bool,
    #[serde(default)]
    pub mark_vl: Option<String>,
    #[serde(default)]
    pub notes: String,
}

/// 管理端依赖的最小返回：差异摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminDiff {
    pub request_id: String,
    pub revision: u32,
    pub old_acs: f64,
    pub new_acs: f64,
    pub vl: VerificationLevel,
}

impl AdminDiff {
    pub fn between(old: &ValidationResult, new: &ValidationResult) -> Self {
        Self {
            request_id: new.request_id.clone(),
            revision: new.revision,
            old_acs: old.acs,
            new_acs: new.acs,
            vl: new.vl,
        }
    }
}
