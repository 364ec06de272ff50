use ckb_merkle_mountain_range::{util::MemStore, Merge, MMR};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::LedgerError;
use crate::result::ValidationResult;

/// 模块：修订版审计账本 (Revision Ledger)
///
/// **职责**: 每个发布的校验结果修订版都在这里留一个 32 字节的叶子。
/// 结果本身存在 sled 里；账本只负责证明"某个修订版在某个时刻已经存在且没被改过"。
///
/// - 数据结构是 Merkle Mountain Range：只追加，不修改历史。
/// - 叶子由 `store` 在发布修订版的同一个 sled 事务里写入 `ledger` 树，
///   key 是连续的大端序号，下一个序号记在 `ledger_head` 树。
/// - 内存里的 MMR 只是 `ledger` 树的投影：`sync` 按序号追上磁盘，启动时的重放也是同一条路径。

/// `ledger_head` 树里记录下一个序号的 key
pub const HEAD_KEY: &[u8] = b"next_seq";

/// 合并策略：$H_{parent} = Blake3(H_{left} \ || \ H_{right})$
pub struct MergeBlake3;

impl Merge for MergeBlake3 {
    type Item = [u8; 32];

    fn merge(lhs: &Self::Item, rhs: &Self::Item) -> ckb_merkle_mountain_range::Result<Self::Item> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(lhs);
        hasher.update(rhs);
        Ok(*hasher.finalize().as_bytes())
    }
}

/// 叶子对应的修订版
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub request_id: String,
    pub revision: u32,
    /// 叶子哈希 (hex)
    pub leaf: String,
}

impl LedgerEntry {
    pub fn for_result(result: &ValidationResult) -> Result<Self, LedgerError> {
        Ok(Self {
            request_id: result.request_id.clone(),
            revision: result.revision,
            leaf: hex::encode(leaf_hash(result)?),
        })
    }
}

/// 存证回执
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub leaf_pos: u64,
    pub root_hash: String,
    pub leaf: String,
}

/// 审计证明
#[derive(Debug, Clone, Serialize)]
pub struct AuditProof {
    pub leaf_pos: u64,
    pub entry: LedgerEntry,
    pub root_hash: String,
    /// 证明路径 (hex)
    pub proof_hex: Vec<String>,
    /// 服务端用当前 root 复核的结果
    pub proof_valid: bool,
}

/// 修订版的叶子哈希：对 JSON 编码做 Blake3
///
/// serde_json 按结构体字段声明顺序输出，同一版本的代码对同一修订版总是得到同样的字节。
pub fn leaf_hash(result: &ValidationResult) -> Result<[u8; 32], LedgerError> {
    let payload = serde_json::to_vec(result)?;
    Ok(*blake3::hash(&payload).as_bytes())
}

pub fn seq_key(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

pub fn decode_seq(raw: &[u8]) -> Result<u64, LedgerError> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| LedgerError::Mmr("ledger sequence must be 8 bytes".to_string()))?;
    Ok(u64::from_be_bytes(bytes))
}

pub struct RevisionLedger {
    store: MemStore<[u8; 32]>,
    mmr_size: u64,
    /// 叶子位置 -> 修订版
    entries: BTreeMap<u64, LedgerEntry>,
    /// 序号 -> 叶子位置
    positions: Vec<u64>,
    tree: sled::Tree,
}

impl RevisionLedger {
    /// 打开账本并从 sled 重放所有叶子
    pub fn open(tree: sled::Tree) -> Result<Self, LedgerError> {
        let mut ledger = Self {
            store: MemStore::default(),
            mmr_size: 0,
            entries: BTreeMap::new(),
            positions: Vec::new(),
            tree,
        };
        let replayed = ledger.sync()?;
        tracing::debug!(leaves = replayed, "revision ledger replayed");
        Ok(ledger)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// 把磁盘上已提交、内存里还没有的叶子按序号追加进 MMR，返回追加的个数
    ///
    /// 序号只在发布事务里分配，提交顺序就是序号顺序，所以这里读到的总是连续前缀。
    pub fn sync(&mut self) -> Result<usize, LedgerError> {
        let start = seq_key(self.positions.len() as u64);
        let pending: Vec<LedgerEntry> = self
            .tree
            .range(start..)
            .values()
            .map(|raw| -> Result<LedgerEntry, LedgerError> { Ok(serde_json::from_slice(&raw?)?) })
            .collect::<Result<_, _>>()?;

        let count = pending.len();
        for entry in pending {
            let leaf = decode_leaf(&entry.leaf)?;
            self.push(leaf, entry)?;
        }
        Ok(count)
    }

    // MMR 提交成功之后才更新索引，失败时内存状态保持不变
    fn push(&mut self, leaf: [u8; 32], entry: LedgerEntry) -> Result<u64, LedgerError> {
        let mut mmr = MMR::<[u8; 32], MergeBlake3, _>::new(self.mmr_size, &self.store);
        let pos = mmr.push(leaf).map_err(|e| LedgerError::Mmr(e.to_string()))?;
        let size = mmr.mmr_size();
        mmr.commit().map_err(|e| LedgerError::Mmr(e.to_string()))?;

        self.mmr_size = size;
        self.entries.insert(pos, entry);
        self.positions.push(pos);
        Ok(pos)
    }

    /// 当前 root
    pub fn root(&self) -> Result<Option<[u8; 32]>, LedgerError> {
        if self.positions.is_empty() {
            return Ok(None);
        }
        let mmr = MMR::<[u8; 32], MergeBlake3, _>::new(self.mmr_size, &self.store);
        mmr.get_root()
            .map(Some)
            .map_err(|e| LedgerError::Mmr(e.to_string()))
    }

    /// 某个序号的回执（调用前先 `sync`）
    pub fn receipt(&self, seq: u64) -> Result<LedgerReceipt, LedgerError> {
        let leaf_pos = *self
            .positions
            .get(seq as usize)
            .ok_or(LedgerError::UnknownSequence(seq))?;
        let entry = self
            .entries
            .get(&leaf_pos)
            .ok_or(LedgerError::UnknownLeaf(leaf_pos))?;
        let root = self.root()?.ok_or(LedgerError::UnknownSequence(seq))?;
        Ok(LedgerReceipt {
            leaf_pos,
            root_hash: hex::encode(root),
            leaf: entry.leaf.clone(),
        })
    }

    /// 开具某个叶子的包含证明，并用当前 root 复核一遍
    pub fn proof(&self, pos: u64) -> Result<AuditProof, LedgerError> {
        let entry = self
            .entries
            .get(&pos)
            .cloned()
            .ok_or(LedgerError::UnknownLeaf(pos))?;
        let leaf = decode_leaf(&entry.leaf)?;

        let mmr = MMR::<[u8; 32], MergeBlake3, _>::new(self.mmr_size, &self.store);
        let root = mmr.get_root().map_err(|e| LedgerError::Mmr(e.to_string()))?;
        let proof = mmr
            .gen_proof(vec![pos])
            .map_err(|e| LedgerError::Mmr(e.to_string()))?;

        let proof_hex = proof.proof_items().iter().map(hex::encode).collect();
        let proof_valid = proof
            .verify(root, vec![(pos, leaf)])
            .map_err(|e| LedgerError::Mmr(e.to_string()))?;

        Ok(AuditProof {
            leaf_pos: pos,
            entry,
            root_hash: hex::encode(root),
            proof_hex,
            proof_valid,
        })
    }

    /// 某个请求在账本里的所有叶子：(revision, 叶子位置)
    pub fn positions_for(&self, request_id: &str) -> BTreeMap<u32, u64> {
        self.entries
            .iter()
            .filter(|(_, e)| e.request_id == request_id)
            .map(|(pos, e)| (e.revision, *pos))
            .collect()
    }
}

fn decode_leaf(hex_leaf: &str) -> Result<[u8; 32], LedgerError> {
    let bytes = hex::decode(hex_leaf).map_err(|e| LedgerError::Mmr(format!("bad leaf hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| LedgerError::Mmr("leaf must be 32 bytes".to_string()))
}
