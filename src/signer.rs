use anyhow::Context;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng; // 用于生成私钥的安全随机数生成器
use std::fs;
use std::path::Path;

use crate::result::ValidationResult;

/// 修订版签名器
///
/// 服务对每个发布的校验结果修订版签名，拿到公钥的第三方可以离线验签。
pub struct RevisionSigner {
    keypair: SigningKey,
}

impl RevisionSigner {
    /// 随机生成一把新钥匙（测试与临时部署用）
    pub fn generate() -> Self {
        Self {
            keypair: SigningKey::generate(&mut OsRng),
        }
    }

    /// 从文件加载 hex 编码的 32 字节私钥；文件不存在时生成并写入
    pub fn load_or_generate(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading signing key {}", path.display()))?;
            let bytes: [u8; 32] = hex::decode(raw.trim())
                .context("signing key is not valid hex")?
                .try_into()
                .map_err(|_| anyhow::anyhow!("signing key must be 32 bytes"))?;
            tracing::info!(path = %path.display(), "loaded signing key");
            return Ok(Self {
                keypair: SigningKey::from_bytes(&bytes),
            });
        }

        let signer = Self::generate();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, hex::encode(signer.keypair.to_bytes()))
            .with_context(|| format!("writing signing key {}", path.display()))?;
        tracing::warn!(path = %path.display(), "no signing key found, generated a new one");
        Ok(signer)
    }

    /// 公钥（分发给审计方验签）
    pub fn public_key(&self) -> VerifyingKey {
        self.keypair.verifying_key()
    }

    /// 对修订版的 JSON 编码签名，返回 64 字节 Ed25519 签名
    pub fn sign(&self, result: &ValidationResult) -> anyhow::Result<Signature> {
        let payload = serde_json::to_vec(result)?;
        Ok(self.keypair.sign(&payload))
    }

    /// 静态验证函数（给外部验证者使用）
    pub fn verify(
        verification_key: &VerifyingKey,
        result: &ValidationResult,
        signature: &Signature,
    ) -> anyhow::Result<bool> {
        let payload = serde_json::to_vec(result)?;
        Ok(verification_key.verify(&payload, signature).is_ok())
    }
}
