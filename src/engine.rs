use chrono::{DateTime, Utc};

use crate::aggregate::aggregate;
use crate::classify::{classify, VerificationLevel, VlSource};
use crate::config::ScoringConfig;
use crate::error::ScoringError;
use crate::evidence::{EvidenceRecord, EvidenceType};
use crate::fraud::{FraudEstimator, FraudRisk};
use crate::reasons;
use crate::result::{AdminReviewAction, Confirmations, ReviewProvenance, ValidationResult};
use crate::router::{EscalationPath, RoutingInput, RoutingState};
use crate::signals;

/// 一次校验提交给核心的输入
///
/// 证据由上游采集器给出；投递时间与模式标记是可选的补充信号。
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub evidence: Vec<EvidenceRecord>,
    pub pattern_flags: Vec<String>,
    pub position_confidence_meters: Option<f64>,
    pub deliveries: Vec<DateTime<Utc>>,
    pub address_fingerprint: Option<String>,
}

/// 评分引擎
///
/// 纯计算、无副作用：同样的输入总得到同样的修订版。
/// 持久化与并发控制由 `store` 负责。
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    config: ScoringConfig,
    fraud: FraudEstimator,
}

// 派生字段：每个修订版都从这里重新算一遍
struct Derived {
    acs: f64,
    vl: VerificationLevel,
    vl_source: VlSource,
    escalation_path: EscalationPath,
    token_available: bool,
    reason_codes: Vec<String>,
    suggestions: Vec<String>,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            config,
            fraud: FraudEstimator::default(),
        }
    }

    /// 首次计算：产出修订版 0
    pub fn evaluate(
        &self,
        request_id: &str,
        submission: Submission,
        now: DateTime<Utc>,
    ) -> Result<ValidationResult, ScoringError> {
        let Submission {
            mut evidence,
            mut pattern_flags,
            position_confidence_meters,
            deliveries,
            address_fingerprint,
        } = submission;

        if let Some(radius) = position_confidence_meters {
            if !radius.is_finite() || radius <= 0.0 {
                return Err(ScoringError::InvalidEvidence(format!(
                    "position confidence {radius} must be a positive number of meters"
                )));
            }
        }
        // 派生信号依赖输入合法，先整体校验一遍
        for record in &evidence {
            record.validate()?;
        }

        if !has(&evidence, EvidenceType::TemporalDecay) {
            if let Some(decay) = signals::temporal_decay(&deliveries, now) {
                pattern_flags.extend(decay.suspicious_patterns.iter().cloned());
                evidence.push(decay.into_record(self.config.temporal_decay_weight));
            }
        }
        if self.config.derive_cross_corpus && !has(&evidence, EvidenceType::CrossCorpus) {
            if let Some(score) = signals::cross_corpus(&evidence) {
                evidence.push(signals::cross_corpus_record(score, self.config.cross_corpus_weight));
            }
        }

        let base_acs = aggregate(&evidence)?;
        let fraud_risk = self.fraud.estimate(&evidence, pattern_flags.as_slice());

        let derived = self.derive(
            &evidence,
            base_acs,
            Confirmations::default(),
            None,
            Some(&fraud_risk),
            position_confidence_meters,
        );

        Ok(ValidationResult {
            request_id: request_id.to_string(),
            revision: 0,
            acs: derived.acs,
            base_acs,
            vl: derived.vl,
            vl_source: derived.vl_source,
            evidence,
            fraud_risk: Some(fraud_risk),
            position_confidence_meters,
            escalation_path: derived.escalation_path,
            category_avg_comparison: None,
            reason_codes: derived.reason_codes,
            suggestions: derived.suggestions,
            token_available: derived.token_available,
            confirmations: Confirmations::default(),
            last_review: None,
            address_fingerprint,
            computed_at: now,
        })
    }

    /// 应用管理员复核，产出下一个修订版
    ///
    /// 确认信号按"或"合并，同一指令重复应用不会重复加分。
    /// `mark_vl` 只改 VL，路由始终按调整后的数值分从第 1 条规则重新求值。
    /// 出错时不产出任何东西，上一个修订版保持权威。
    pub fn apply_review(
        &self,
        prev: &ValidationResult,
        action: &AdminReviewAction,
        now: DateTime<Utc>,
    ) -> Result<ValidationResult, ScoringError> {
        let override_vl = action
            .mark_vl
            .as_deref()
            .map(|raw| raw.trim().parse::<VerificationLevel>())
            .transpose()?;

        let vl_override = match override_vl {
            Some(level) => Some((
                level,
                VlSource::AdminOverride {
                    admin_id: action.admin_id.clone(),
                },
            )),
            // 之前的人工覆盖继续有效，直到被新的覆盖替换
            None if prev.vl_source.is_override() => Some((prev.vl, prev.vl_source.clone())),
            None => None,
        };

        let confirmations = prev
            .confirmations
            .merge(action.postman_confirmed, action.delivery_confirmed);

        let derived = self.derive(
            &prev.evidence,
            prev.base_acs,
            confirmations,
            vl_override,
            prev.fraud_risk.as_ref(),
            prev.position_confidence_meters,
        );

        Ok(ValidationResult {
            request_id: prev.request_id.clone(),
            revision: prev.revision + 1,
            acs: derived.acs,
            base_acs: prev.base_acs,
            vl: derived.vl,
            vl_source: derived.vl_source,
            evidence: prev.evidence.clone(),
            fraud_risk: prev.fraud_risk.clone(),
            position_confidence_meters: prev.position_confidence_meters,
            escalation_path: derived.escalation_path,
            category_avg_comparison: prev
                .category_avg_comparison
                .as_ref()
                .map(|cmp| cmp.rebase(derived.acs)),
            reason_codes: derived.reason_codes,
            suggestions: derived.suggestions,
            token_available: derived.token_available,
            confirmations,
            last_review: Some(ReviewProvenance {
                admin_id: action.admin_id.clone(),
                notes: action.notes.clone(),
                reviewed_at: now,
            }),
            address_fingerprint: prev.address_fingerprint.clone(),
            computed_at: now,
        })
    }

    /// 确认加分，封顶 `max_confirmation_bonus`
    pub fn confirmation_bonus(&self, confirmations: Confirmations) -> f64 {
        let mut bonus = 0.0;
        if confirmations.postman {
            bonus += self.config.postman_bonus;
        }
        if confirmations.delivery {
            bonus += self.config.delivery_bonus;
        }
        bonus.min(self.config.max_confirmation_bonus)
    }

    fn derive(
        &self,
        evidence: &[EvidenceRecord],
        base_acs: f64,
        confirmations: Confirmations,
        vl_override: Option<(VerificationLevel, VlSource)>,
        fraud_risk: Option<&FraudRisk>,
        position_confidence_meters: Option<f64>,
    ) -> Derived {
        let acs = (base_acs + self.confirmation_bonus(confirmations)).min(100.0);

        let computed_vl = classify(acs, &self.config.bands);
        let (vl, vl_source) = vl_override.unwrap_or((computed_vl, VlSource::Computed));

        let escalation_path = RoutingState::Pending.resolve(
            &RoutingInput {
                acs,
                fraud_level: fraud_risk.map(|f| f.risk_level),
                position_confidence_meters,
            },
            &self.config.routing,
        );

        // 人工把等级压到 VL2 以下时不发 token
        let blocked_by_override = vl_source.is_override() && vl < VerificationLevel::VL2;
        let token_available = escalation_path == EscalationPath::AutoToken && !blocked_by_override;

        // 建议只看证据算出的等级，人工覆盖不影响
        let explanation = reasons::explain(evidence, acs, computed_vl);

        Derived {
            acs,
            vl,
            vl_source,
            escalation_path,
            token_available,
            reason_codes: explanation.reason_codes,
            suggestions: explanation.suggestions,
        }
    }
}

fn has(evidence: &[EvidenceRecord], kind: EvidenceType) -> bool {
    evidence.iter().any(|e| e.kind == kind)
}
