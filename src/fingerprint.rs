use sha2::{Digest, Sha256}; // 引入 SHA2 算法和 Digest 特性(方法集)

use crate::address::Address;

/// 地址指纹
///
/// 同一个地址无论大小写、多余空格怎么写，指纹都一样。
/// 字段之间用 `|` 分隔后整体做 SHA-256，输出小写十六进制。
pub fn address_fingerprint(address: &Address) -> String {
    let fields = [
        &address.house_no,
        &address.street,
        &address.locality,
        &address.city,
        &address.district,
        &address.state,
        &address.pin,
        &address.digipin,
    ];

    let canonical = fields
        .iter()
        .map(|f| normalize(f))
        .collect::<Vec<_>>()
        .join("|");

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

// 小写 + 折叠连续空白
fn normalize(field: &str) -> String {
    field
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
