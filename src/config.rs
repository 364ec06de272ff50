use anyhow::Context;
use std::env;
use std::str::FromStr;

use crate::classify::VlBands;
use crate::router::RoutingPolicy;

/// 评分相关的可调参数
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    pub bands: VlBands,
    pub routing: RoutingPolicy,

    /// 邮递员确认加分
    pub postman_bonus: f64,
    /// 投递确认加分
    pub delivery_bonus: f64,
    /// 确认加分总上限
    pub max_confirmation_bonus: f64,

    /// 派生信号的默认权重
    pub temporal_decay_weight: f64,
    pub cross_corpus_weight: f64,

    /// 上游没给 cross_corpus 时是否由核心补算
    pub derive_cross_corpus: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            bands: VlBands::default(),
            routing: RoutingPolicy::default(),
            postman_bonus: 15.0,
            delivery_bonus: 10.0,
            max_confirmation_bonus: 25.0,
            temporal_decay_weight: 0.047,
            cross_corpus_weight: 0.047,
            derive_cross_corpus: false,
        }
    }
}

impl ScoringConfig {
    /// 启动时检查一遍，避免坏配置让之后每个请求都失败
    pub fn validate(&self) -> anyhow::Result<()> {
        let thresholds = [
            ("VL1_THRESHOLD", self.bands.vl1),
            ("VL2_THRESHOLD", self.bands.vl2),
            ("VL3_THRESHOLD", self.bands.vl3),
            ("TOKEN_THRESHOLD", self.routing.token_threshold),
            ("IOT_MIN_ACS", self.routing.iot_min_acs),
            ("CROWD_MIN_ACS", self.routing.crowd_min_acs),
        ];
        for (key, value) in thresholds {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                anyhow::bail!("{key} must be within [0, 100], got {value}");
            }
        }
        if !(self.bands.vl1 <= self.bands.vl2 && self.bands.vl2 <= self.bands.vl3) {
            anyhow::bail!(
                "VL thresholds must be ascending: {} / {} / {}",
                self.bands.vl1,
                self.bands.vl2,
                self.bands.vl3
            );
        }
        if !self.routing.iot_max_radius_m.is_finite() || self.routing.iot_max_radius_m <= 0.0 {
            anyhow::bail!("IOT_MAX_RADIUS_M must be a positive number of meters");
        }

        let bonuses = [
            ("POSTMAN_BONUS", self.postman_bonus),
            ("DELIVERY_BONUS", self.delivery_bonus),
            ("MAX_CONFIRMATION_BONUS", self.max_confirmation_bonus),
        ];
        for (key, value) in bonuses {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                anyhow::bail!("{key} must be within [0, 100], got {value}");
            }
        }

        // 派生证据的权重和上游证据一样必须落在 [0, 1]
        let weights = [
            ("TEMPORAL_DECAY_WEIGHT", self.temporal_decay_weight),
            ("CROSS_CORPUS_WEIGHT", self.cross_corpus_weight),
        ];
        for (key, value) in weights {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{key} must be within [0, 1], got {value}");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub key_path: String,
    pub scoring: ScoringConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = ScoringConfig::default();
        let routing = RoutingPolicy {
            token_threshold: parse_or("TOKEN_THRESHOLD", defaults.routing.token_threshold)?,
            iot_min_acs: parse_or("IOT_MIN_ACS", defaults.routing.iot_min_acs)?,
            iot_max_radius_m: parse_or("IOT_MAX_RADIUS_M", defaults.routing.iot_max_radius_m)?,
            crowd_min_acs: parse_or("CROWD_MIN_ACS", defaults.routing.crowd_min_acs)?,
        };
        let bands = VlBands {
            vl1: parse_or("VL1_THRESHOLD", defaults.bands.vl1)?,
            vl2: parse_or("VL2_THRESHOLD", defaults.bands.vl2)?,
            vl3: parse_or("VL3_THRESHOLD", defaults.bands.vl3)?,
        };
        let scoring = ScoringConfig {
            bands,
            routing,
            postman_bonus: parse_or("POSTMAN_BONUS", defaults.postman_bonus)?,
            delivery_bonus: parse_or("DELIVERY_BONUS", defaults.delivery_bonus)?,
            max_confirmation_bonus: parse_or("MAX_CONFIRMATION_BONUS", defaults.max_confirmation_bonus)?,
            temporal_decay_weight: parse_or("TEMPORAL_DECAY_WEIGHT", defaults.temporal_decay_weight)?,
            cross_corpus_weight: parse_or("CROSS_CORPUS_WEIGHT", defaults.cross_corpus_weight)?,
            derive_cross_corpus: parse_or("DERIVE_CROSS_CORPUS", defaults.derive_cross_corpus)?,
        };
        scoring.validate()?;

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_or("PORT", 3000)?,
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "data/db/digitrust_db".to_string()),
            key_path: env::var("KEY_PATH").unwrap_or_else(|_| "digitrust.key".to_string()),
            scoring,
        })
    }
}

// 未设置时取默认值；设置了但解析失败是启动错误
fn parse_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value `{raw}`")),
        Err(_) => Ok(default),
    }
}
