use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ScoringError;

/// 验证等级 (Verification Level)
///
/// 面向用户的信任标签。派生的 `Ord` 即档位顺序 VL0 < VL1 < VL2 < VL3。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VerificationLevel {
    /// 未验证
    VL0,
    /// 低置信
    VL1,
    /// 中置信
    VL2,
    /// 高置信
    VL3,
}

impl VerificationLevel {
    pub const ALL: [VerificationLevel; 4] = [
        VerificationLevel::VL0,
        VerificationLevel::VL1,
        VerificationLevel::VL2,
        VerificationLevel::VL3,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationLevel::VL0 => "VL0",
            VerificationLevel::VL1 => "VL1",
            VerificationLevel::VL2 => "VL2",
            VerificationLevel::VL3 => "VL3",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VerificationLevel::VL0 => "Unverified",
            VerificationLevel::VL1 => "Low Confidence",
            VerificationLevel::VL2 => "Medium Confidence",
            VerificationLevel::VL3 => "High Confidence",
        }
    }
}

impl fmt::Display for VerificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 解析管理员给出的覆盖值，只接受 VL0..VL3
impl FromStr for VerificationLevel {
    type Err = ScoringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VerificationLevel::ALL
            .into_iter()
            .find(|vl| vl.as_str() == s)
            .ok_or_else(|| ScoringError::UnknownOverride(s.to_string()))
    }
}

/// VL 的来源：计算得出，或由管理员覆盖
///
/// 下游据此审计是否有人工介入。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VlSource {
    Computed,
    AdminOverride { admin_id: String },
}

impl VlSource {
    pub fn is_override(&self) -> bool {
        matches!(self, VlSource::AdminOverride { .. })
    }
}

/// 分档下界
///
/// 与发 token 的阈值 (65) 相互独立，各自可配置。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VlBands {
    pub vl1: f64,
    pub vl2: f64,
    pub vl3: f64,
}

impl Default for VlBands {
    fn default() -> Self {
        Self {
            vl1: 25.0,
            vl2: 50.0,
            vl3: 75.0,
        }
    }
}

/// 纯函数：ACS -> VL
pub fn classify(acs: f64, bands: &VlBands) -> VerificationLevel {
    if acs >= bands.vl3 {
        VerificationLevel::VL3
    } else if acs >= bands.vl2 {
        VerificationLevel::VL2
    } else if acs >= bands.vl1 {
        VerificationLevel::VL1
    } else {
        VerificationLevel::VL0
    }
}
