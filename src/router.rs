use serde::{Deserialize, Serialize};
use std::fmt;

use crate::fraud::RiskLevel;

/// 处理路径：地址后续如何被进一步核验
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationPath {
    /// 直接签发 token
    AutoToken,
    /// 请求 IoT 设备复核
    IotCheck,
    /// 社区众包验证
    CrowdValidation,
    /// 邮递员上门
    PostmanQueue,
    /// 欺诈复审队列
    FraudQueue,
}

impl EscalationPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationPath::AutoToken => "auto_token",
            EscalationPath::IotCheck => "iot_check",
            EscalationPath::CrowdValidation => "crowd_validation",
            EscalationPath::PostmanQueue => "postman_queue",
            EscalationPath::FraudQueue => "fraud_queue",
        }
    }
}

impl fmt::Display for EscalationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 路由阈值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutingPolicy {
    /// 自动签发 token 的 ACS 下限
    pub token_threshold: f64,
    /// IoT 复核要求的 ACS 下限
    pub iot_min_acs: f64,
    /// IoT 复核要求的定位精度上限（米）
    pub iot_max_radius_m: f64,
    /// 众包验证的 ACS 下限
    pub crowd_min_acs: f64,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            token_threshold: 65.0,
            iot_min_acs: 50.0,
            iot_max_radius_m: 150.0,
            crowd_min_acs: 40.0,
        }
    }
}

/// 一次路由决策的输入
///
/// 只看数值分、欺诈等级和定位半径，从不看 VL。
#[derive(Debug, Clone, Copy)]
pub struct RoutingInput {
    pub acs: f64,
    pub fraud_level: Option<RiskLevel>,
    pub position_confidence_meters: Option<f64>,
}

/// 路由状态机
///
/// 初始态 `Pending`，五条路径都是终态。每个结果修订版从 `Pending` 出发走一次。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingState {
    Pending,
    Routed(EscalationPath),
}

impl RoutingState {
    /// 走到终态并返回路径：`Pending` 按优先级求值，第一条命中的规则胜出；终态不再迁移。
    pub fn resolve(self, input: &RoutingInput, policy: &RoutingPolicy) -> EscalationPath {
        match self {
            RoutingState::Routed(path) => path,
            RoutingState::Pending => select_path(input, policy),
        }
    }
}

fn select_path(input: &RoutingInput, policy: &RoutingPolicy) -> EscalationPath {
    // 1. 高欺诈风险优先于一切
    if input.fraud_level == Some(RiskLevel::High) {
        return EscalationPath::FraudQueue;
    }
    // 2. 分数够高，直接签发
    if input.acs >= policy.token_threshold {
        return EscalationPath::AutoToken;
    }
    // 3. 定位足够精确，交给 IoT
    if let Some(radius) = input.position_confidence_meters {
        if radius <= policy.iot_max_radius_m && input.acs >= policy.iot_min_acs {
            return EscalationPath::IotCheck;
        }
    }
    // 4. / 5.
    if input.acs >= policy.crowd_min_acs {
        EscalationPath::CrowdValidation
    } else {
        EscalationPath::PostmanQueue
    }
}

/// 从 `Pending` 出发完成一次路由
pub fn route(input: &RoutingInput, policy: &RoutingPolicy) -> EscalationPath {
    RoutingState::Pending.resolve(input, policy)
}
