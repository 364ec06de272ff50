//! 派生信号
//!
//! 这两类证据不依赖外部数据源，可以由核心从已有输入直接算出：
//! - 时间衰减 (`temporal_decay`)：投递记录的指数衰减分，同时检测投递频率异常
//! - 交叉验证 (`cross_corpus`)：五类核心信号彼此是否一致

use chrono::{DateTime, Utc};

use crate::evidence::{self, EvidenceRecord, EvidenceType};
use crate::fraud::{EXCESSIVE_VELOCITY_7D, SUSPICIOUS_VELOCITY_1D};

/// 时间衰减的计算结果
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalDecay {
    pub score: f64,
    pub decay_score: f64,
    pub fraud_adjustment: f64,
    pub suspicious_patterns: Vec<String>,
    pub velocity_7d: usize,
    pub velocity_1d: usize,
}

/// 对投递时间序列打分
///
/// 每次投递贡献 `20 * 0.9^age_days`，总分封顶 100。
/// 7 天内 >= 10 次、1 天内 >= 5 次视为刷单，分别扣 30 / 40（后者覆盖前者）。
/// 没有投递记录时返回 `None`。
pub fn temporal_decay(deliveries: &[DateTime<Utc>], now: DateTime<Utc>) -> Option<TemporalDecay> {
    if deliveries.is_empty() {
        return None;
    }

    let ages: Vec<i64> = deliveries
        .iter()
        .map(|d| (now - *d).num_days().max(0))
        .collect();

    let decay_score = ages
        .iter()
        .map(|age| 20.0 * 0.9_f64.powi(*age as i32))
        .sum::<f64>()
        .min(100.0);

    let velocity_7d = ages.iter().filter(|age| **age <= 7).count();
    let velocity_1d = ages.iter().filter(|age| **age <= 1).count();

    let mut fraud_adjustment = 0.0;
    let mut suspicious_patterns = Vec::new();
    if velocity_7d >= 10 {
        fraud_adjustment = -30.0;
        suspicious_patterns.push(EXCESSIVE_VELOCITY_7D.to_string());
    }
    if velocity_1d >= 5 {
        fraud_adjustment = -40.0;
        suspicious_patterns.push(SUSPICIOUS_VELOCITY_1D.to_string());
    }

    Some(TemporalDecay {
        score: (decay_score + fraud_adjustment).max(0.0),
        decay_score,
        fraud_adjustment,
        suspicious_patterns,
        velocity_7d,
        velocity_1d,
    })
}

impl TemporalDecay {
    pub fn into_record(self, weight: f64) -> EvidenceRecord {
        EvidenceRecord {
            kind: EvidenceType::TemporalDecay,
            score: self.score,
            weight,
            details: serde_json::json!({
                "method": "temporal_decay",
                "decay_score": self.decay_score,
                "fraud_adjustment": self.fraud_adjustment,
                "suspicious_patterns": self.suspicious_patterns,
                "velocity_7d": self.velocity_7d,
                "velocity_1d": self.velocity_1d,
            }),
        }
    }
}

/// 交叉验证一致度
///
/// 五类核心信号（缺失按 0 计）的标准差越小越一致：`100 - 2.5 * stddev`。
/// 有 4 类以上 >= 70 加 20 分，3 类加 10 分，封顶 100。
/// 在场的核心信号少于两类时没有意义，返回 `None`。
pub fn cross_corpus(evidence: &[EvidenceRecord]) -> Option<f64> {
    let present = EvidenceType::CORE
        .iter()
        .filter(|kind| evidence::find(evidence, **kind).is_some())
        .count();
    if present < 2 {
        return None;
    }

    let scores: Vec<f64> = EvidenceType::CORE
        .iter()
        .map(|kind| evidence::find(evidence, *kind).map_or(0.0, |e| e.score))
        .collect();

    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let mut agreement = (100.0 - std_dev * 2.5).max(0.0);
    let strong = scores.iter().filter(|s| **s >= 70.0).count();
    if strong >= 4 {
        agreement += 20.0;
    } else if strong >= 3 {
        agreement += 10.0;
    }

    Some(agreement.min(100.0))
}

pub fn cross_corpus_record(score: f64, weight: f64) -> EvidenceRecord {
    EvidenceRecord {
        kind: EvidenceType::CrossCorpus,
        score,
        weight,
        details: serde_json::json!({ "method": "cross_corpus_validation" }),
    }
}
