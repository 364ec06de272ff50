use serde::{Deserialize, Serialize};

/// 用户提交的地址
///
/// DIGIPIN 是网格编码，对核心来说是不透明字符串。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub house_no: String,
    pub street: String,
    pub locality: String,
    pub city: String,
    #[serde(default)]
    pub district: String,
    #[serde(default)]
    pub state: String,
    pub pin: String,
    #[serde(default)]
    pub digipin: String,
}

impl Address {
    /// 管理员队列里展示的一行文本
    pub fn display_line(&self) -> String {
        format!(
            "{}, {}, {}, {} - {}",
            self.house_no, self.street, self.locality, self.city, self.pin
        )
    }

    /// 同类比较用的类别键：城市名，忽略大小写与首尾空白
    pub fn category_key(&self) -> String {
        self.city.trim().to_lowercase()
    }
}

/// 数据使用授权
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consent {
    pub purpose: String,
    #[serde(default = "default_validity_days")]
    pub validity_days: u32,
}

fn default_validity_days() -> u32 {
    365
}
