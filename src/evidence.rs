use serde::{Deserialize, Serialize}; // 引入序列化库，让结构体能转成JSON传输
use std::fmt;
use std::str::FromStr;

use crate::error::ScoringError;

/// 证据类别
///
/// 上游信号采集器（外部）每类最多产出一条记录。
/// 序列化为 snake_case 字符串，例如 `geo_precision`，与前端渲染层的约定一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    // === 第一层：地理 ===
    Geo,
    GeoPrecision,

    // === 第二层：时间 / 投递历史 ===
    Temporal,
    TemporalDecay,

    // === 第三层：物理世界信号 ===
    Iot,
    Doc,
    Crowd,

    // === 第四层：文本与交叉验证 ===
    Linguistic,
    CrossCorpus,
    History,
}

impl EvidenceType {
    /// 全部类别，顺序即渲染顺序
    pub const ALL: [EvidenceType; 10] = [
        EvidenceType::Geo,
        EvidenceType::GeoPrecision,
        EvidenceType::Temporal,
        EvidenceType::TemporalDecay,
        EvidenceType::Iot,
        EvidenceType::Doc,
        EvidenceType::Crowd,
        EvidenceType::Linguistic,
        EvidenceType::CrossCorpus,
        EvidenceType::History,
    ];

    /// 参与交叉验证 (cross_corpus) 的五类核心信号
    pub const CORE: [EvidenceType; 5] = [
        EvidenceType::Geo,
        EvidenceType::Temporal,
        EvidenceType::Iot,
        EvidenceType::Doc,
        EvidenceType::Crowd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceType::Geo => "geo",
            EvidenceType::GeoPrecision => "geo_precision",
            EvidenceType::Temporal => "temporal",
            EvidenceType::TemporalDecay => "temporal_decay",
            EvidenceType::Iot => "iot",
            EvidenceType::Doc => "doc",
            EvidenceType::Crowd => "crowd",
            EvidenceType::Linguistic => "linguistic",
            EvidenceType::CrossCorpus => "cross_corpus",
            EvidenceType::History => "history",
        }
    }
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvidenceType {
    type Err = ScoringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EvidenceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ScoringError::InvalidEvidence(format!("unknown evidence type `{s}`")))
    }
}

/// 单条加权证据
///
/// 每次校验请求产出一次，之后不可变，随校验结果一起保留供审计。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// 类别
    #[serde(rename = "type")]
    pub kind: EvidenceType,

    /// 置信度贡献，范围 [0, 100]
    pub score: f64,

    /// 权重，范围 [0, 1]。各条权重之和不要求等于 1，聚合时按相对贡献处理。
    pub weight: f64,

    /// 采集器附带的明细，原样透传给渲染层
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl EvidenceRecord {
    /// 构造并校验
    pub fn new(kind: EvidenceType, score: f64, weight: f64) -> Result<Self, ScoringError> {
        let record = Self {
            kind,
            score,
            weight,
            details: serde_json::Value::Null,
        };
        record.validate()?;
        Ok(record)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// 范围校验。NaN / 无穷大同样视为越界。
    pub fn validate(&self) -> Result<(), ScoringError> {
        if !self.score.is_finite() || !(0.0..=100.0).contains(&self.score) {
            return Err(ScoringError::InvalidEvidence(format!(
                "{} score {} is outside [0, 100]",
                self.kind, self.score
            )));
        }
        if !self.weight.is_finite() || !(0.0..=1.0).contains(&self.weight) {
            return Err(ScoringError::InvalidEvidence(format!(
                "{} weight {} is outside [0, 1]",
                self.kind, self.weight
            )));
        }
        Ok(())
    }
}

/// 线上传入的原始证据
///
/// `type` 以字符串接收，这样未知类别会变成 `InvalidEvidence` 而不是反序列化失败。
#[derive(Debug, Clone, Deserialize)]
pub struct EvidenceInput {
    #[serde(rename = "type")]
    pub kind: String,
    pub score: f64,
    pub weight: f64,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl TryFrom<EvidenceInput> for EvidenceRecord {
    type Error = ScoringError;

    fn try_from(input: EvidenceInput) -> Result<Self, Self::Error> {
        let kind = input.kind.parse::<EvidenceType>()?;
        Ok(EvidenceRecord::new(kind, input.score, input.weight)?.with_details(input.details))
    }
}

/// 在序列中找到某一类别的第一条证据
pub fn find(evidence: &[EvidenceRecord], kind: EvidenceType) -> Option<&EvidenceRecord> {
    evidence.iter().find(|e| e.kind == kind)
}
