use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::evidence::{self, EvidenceRecord, EvidenceType};

// 渲染层直接展示这些名字，属于对外契约，不能改
pub const EXCESSIVE_VELOCITY_7D: &str = "excessive_velocity_7d";
pub const SUSPICIOUS_VELOCITY_1D: &str = "suspicious_velocity_1d";
pub const SIGNAL_CONFLICT: &str = "signal_conflict";
pub const LOW_CONSENSUS: &str = "low_consensus";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// <30 低，30..=70 中，>70 高
    pub fn from_percentage(pct: f64) -> Self {
        if pct > 70.0 {
            RiskLevel::High
        } else if pct >= 30.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudRisk {
    pub risk_level: RiskLevel,
    pub risk_percentage: f64,
    pub suspicious_patterns: BTreeSet<String>,
}

/// 欺诈风险估计器
///
/// 每个触发的可疑模式贡献一个固定增量，累加后截断到 [0, 100]。
/// 外部传入的模式如果不在表里，按 `default_increment` 计。
#[derive(Debug, Clone)]
pub struct FraudEstimator {
    increments: BTreeMap<String, f64>,
    default_increment: f64,
}

impl Default for FraudEstimator {
    fn default() -> Self {
        let increments = [
            (SUSPICIOUS_VELOCITY_1D, 75.0),
            (EXCESSIVE_VELOCITY_7D, 45.0),
            (SIGNAL_CONFLICT, 25.0),
            (LOW_CONSENSUS, 20.0),
        ]
        .into_iter()
        .map(|(name, inc)| (name.to_string(), inc))
        .collect();

        Self {
            increments,
            default_increment: 30.0,
        }
    }
}

impl FraudEstimator {
    pub fn increment_for(&self, pattern: &str) -> f64 {
        self.increments
            .get(pattern)
            .copied()
            .unwrap_or(self.default_increment)
    }

    /// 组合证据上检测到的模式与外部给出的模式
    pub fn estimate<S: AsRef<str>>(&self, evidence: &[EvidenceRecord], external: &[S]) -> FraudRisk {
        let mut patterns: BTreeSet<String> = detect_patterns(evidence);
        patterns.extend(
            external
                .iter()
                .map(|p| p.as_ref().trim())
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        );

        let risk_percentage = patterns
            .iter()
            .map(|p| self.increment_for(p))
            .sum::<f64>()
            .clamp(0.0, 100.0);

        FraudRisk {
            risk_level: RiskLevel::from_percentage(risk_percentage),
            risk_percentage,
            suspicious_patterns: patterns,
        }
    }
}

/// 证据之间的可疑模式
///
/// - 核心信号至少三类在场，且最高分与最低分相差 >= 80：`signal_conflict`
/// - 交叉验证分 < 20：`low_consensus`
pub fn detect_patterns(evidence: &[EvidenceRecord]) -> BTreeSet<String> {
    let mut found = BTreeSet::new();

    let core: Vec<f64> = EvidenceType::CORE
        .iter()
        .filter_map(|kind| evidence::find(evidence, *kind))
        .map(|e| e.score)
        .collect();
    if core.len() >= 3 {
        let max = core.iter().copied().fold(f64::MIN, f64::max);
        let min = core.iter().copied().fold(f64::MAX, f64::min);
        if max - min >= 80.0 {
            found.insert(SIGNAL_CONFLICT.to_string());
        }
    }

    if let Some(cc) = evidence::find(evidence, EvidenceType::CrossCorpus) {
        if cc.score < 20.0 {
            found.insert(LOW_CONSENSUS.to_string());
        }
    }

    found
}
