use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError, TransactionalTree,
};
use sled::Transactional;
use std::collections::BTreeMap;
use std::path::Path;

use crate::address::{Address, Consent};
use crate::classify::VerificationLevel;
use crate::error::{ScoringError, StoreError};
use crate::ledger::{self, LedgerEntry};
use crate::result::{ReviewStatus, ValidationResult};
use crate::router::EscalationPath;

/// 一次校验请求的元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub request_id: String,
    pub subject_id: String,
    pub address: Address,
    pub consent: Consent,
    pub created_at: DateTime<Utc>,
}

/// 管理员队列里的一行
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub request_id: String,
    pub address: String,
    pub status: ReviewStatus,
    pub acs: f64,
    pub vl: VerificationLevel,
    pub vl_label: &'static str,
    pub escalation_path: EscalationPath,
    pub created_at: DateTime<Utc>,
}

/// 用户历史里的一行
#[derive(Debug, Clone, Serialize)]
pub struct HistoryItem {
    pub request_id: String,
    pub address: Address,
    pub acs: f64,
    pub vl: VerificationLevel,
    pub vl_label: &'static str,
    pub escalation_path: EscalationPath,
    pub token_available: bool,
    pub created_at: DateTime<Utc>,
}

/// 管理台的汇总指标
#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_validations: usize,
    /// 走人工路径且还没人复核的请求
    pub pending_validations: usize,
    pub avg_acs: f64,
    pub vl_distribution: BTreeMap<VerificationLevel, usize>,
    pub recent_validations: usize,
}

/// 结果仓库
///
/// sled 里的几棵树：
/// - `requests`:    request_id -> RequestMeta
/// - `timeline`:    created_at(大端) + request_id -> request_id，按时间倒序翻页
/// - `subjects`:    subject_id + 0x00 + created_at + request_id -> request_id
/// - `revisions`:   request_id + 0x00 + revision(大端) -> ValidationResult
/// - `latest`:      request_id -> 最新 revision
/// - `ledger`:      序号(大端) -> LedgerEntry
/// - `ledger_head`: 下一个账本序号
///
/// 修订版只追加不删除。每次发布（首个修订版连同元数据，或复核产生的新修订版）
/// 和它的账本叶子在同一个事务里提交：要么全部可见，要么什么都没写。
/// 同一个 request_id 上的并发复核因此串行化，读者看不到写了一半的状态。
#[derive(Clone)]
pub struct ResultStore {
    db: sled::Db,
    requests: sled::Tree,
    timeline: sled::Tree,
    subjects: sled::Tree,
    revisions: sled::Tree,
    latest: sled::Tree,
    ledger: sled::Tree,
    ledger_head: sled::Tree,
}

impl ResultStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// 进程退出即删除的临时库（测试用）
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            requests: db.open_tree("requests")?,
            timeline: db.open_tree("timeline")?,
            subjects: db.open_tree("subjects")?,
            revisions: db.open_tree("revisions")?,
            latest: db.open_tree("latest")?,
            ledger: db.open_tree("ledger")?,
            ledger_head: db.open_tree("ledger_head")?,
            db,
        })
    }

    /// 账本叶子所在的树，交给 `RevisionLedger` 重放
    pub fn ledger_tree(&self) -> sled::Tree {
        self.ledger.clone()
    }

    pub fn meta(&self, request_id: &str) -> Result<RequestMeta, StoreError> {
        let raw = self
            .requests
            .get(request_id.as_bytes())?
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    // ------------------------------------------------------------------
    // 发布
    // ------------------------------------------------------------------

    /// 登记请求并发布修订版 0，返回账本序号。同一个 request_id 只能发布一次。
    pub fn publish(&self, meta: &RequestMeta, result: &ValidationResult) -> Result<u64, StoreError> {
        let request_id = result.request_id.as_str();
        if meta.request_id != request_id {
            return Err(StoreError::Corrupt(format!(
                "metadata for {} cannot publish {request_id}",
                meta.request_id
            )));
        }

        let ts = time_key(meta.created_at);
        let encoded_meta = serde_json::to_vec(meta)?;
        let encoded = serde_json::to_vec(result)?;
        let entry = LedgerEntry::for_result(result)?;
        let timeline_key = [&ts[..], request_id.as_bytes()].concat();
        let subject_key = [subject_prefix(&meta.subject_id).as_slice(), &ts[..], request_id.as_bytes()].concat();

        let outcome = (
            &self.requests,
            &self.timeline,
            &self.subjects,
            &self.revisions,
            &self.latest,
            &self.ledger,
            &self.ledger_head,
        )
            .transaction(
                |(requests, timeline, subjects, revisions, latest, leaves, head)| -> ConflictableTransactionResult<u64, StoreError> {
                    if latest.get(request_id.as_bytes())?.is_some() {
                        return Err(abort(StoreError::Corrupt(format!(
                            "{request_id} already has a published revision"
                        ))));
                    }
                    requests.insert(request_id.as_bytes(), encoded_meta.clone())?;
                    timeline.insert(timeline_key.as_slice(), request_id.as_bytes())?;
                    subjects.insert(subject_key.as_slice(), request_id.as_bytes())?;
                    revisions.insert(revision_key(request_id, result.revision), encoded.clone())?;
                    latest.insert(request_id.as_bytes(), &result.revision.to_be_bytes()[..])?;
                    stage_leaf(leaves, head, &entry)
                },
            );
        unwrap_transaction(outcome)
    }

    /// 最新修订版
    pub fn latest(&self, request_id: &str) -> Result<ValidationResult, StoreError> {
        let rev = self
            .latest
            .get(request_id.as_bytes())?
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))?;
        let raw = self
            .revisions
            .get(revision_key(request_id, decode_revision(&rev)?))?
            .ok_or_else(|| StoreError::Corrupt(format!("{request_id}: latest revision is missing")))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// 全部修订版，按 revision 升序
    pub fn revisions(&self, request_id: &str) -> Result<Vec<ValidationResult>, StoreError> {
        let list = self
            .revisions
            .scan_prefix(revision_prefix(request_id))
            .values()
            .map(|raw| -> Result<ValidationResult, StoreError> { Ok(serde_json::from_slice(&raw?)?) })
            .collect::<Result<Vec<_>, _>>()?;
        if list.is_empty() {
            return Err(StoreError::NotFound(request_id.to_string()));
        }
        Ok(list)
    }

    /// 在最新修订版上原子地计算并发布下一个修订版
    ///
    /// `next` 可能因事务冲突被调用多次，必须是纯函数。
    /// 它返回错误时事务中止，最新修订版保持不变，账本也不会多出叶子。
    /// 返回 (旧修订版, 新修订版, 账本序号)。
    pub fn supersede<F>(
        &self,
        request_id: &str,
        next: F,
    ) -> Result<(ValidationResult, ValidationResult, u64), StoreError>
    where
        F: Fn(&ValidationResult) -> Result<ValidationResult, ScoringError>,
    {
        let outcome = (&self.revisions, &self.latest, &self.ledger, &self.ledger_head).transaction(
            |(revisions, latest, leaves, head)| -> ConflictableTransactionResult<(ValidationResult, ValidationResult, u64), StoreError> {
                let rev = latest
                    .get(request_id.as_bytes())?
                    .ok_or_else(|| abort(StoreError::NotFound(request_id.to_string())))?;
                let rev = decode_revision(&rev).map_err(abort)?;
                let raw = revisions
                    .get(revision_key(request_id, rev))?
                    .ok_or_else(|| abort(StoreError::Corrupt(format!("{request_id}: revision {rev} is missing"))))?;
                let prev: ValidationResult =
                    serde_json::from_slice(&raw).map_err(|e| abort(e.into()))?;

                let new = next(&prev).map_err(|e| abort(e.into()))?;
                if new.revision != prev.revision + 1 {
                    return Err(abort(StoreError::Corrupt(format!(
                        "{request_id}: revision {} does not follow {}",
                        new.revision, prev.revision
                    ))));
                }

                let encoded = serde_json::to_vec(&new).map_err(|e| abort(e.into()))?;
                let entry = LedgerEntry::for_result(&new).map_err(|e| abort(e.into()))?;
                revisions.insert(revision_key(request_id, new.revision), encoded)?;
                latest.insert(request_id.as_bytes(), &new.revision.to_be_bytes()[..])?;
                let seq = stage_leaf(leaves, head, &entry)?;
                Ok((prev, new, seq))
            },
        );
        unwrap_transaction(outcome)
    }

    // ------------------------------------------------------------------
    // 查询
    // ------------------------------------------------------------------

    /// 管理员队列：按创建时间倒序翻页
    pub fn queue(&self, offset: usize, limit: usize) -> Result<Vec<QueueItem>, StoreError> {
        let mut items = Vec::new();
        for entry in self.timeline.iter().values().rev().skip(offset).take(limit) {
            let request_id = String::from_utf8_lossy(&entry?).into_owned();
            let meta = self.meta(&request_id)?;
            let latest = self.latest(&request_id)?;
            items.push(QueueItem {
                address: meta.address.display_line(),
                status: latest.review_status(),
                acs: latest.acs,
                vl: latest.vl,
                vl_label: latest.vl.label(),
                escalation_path: latest.escalation_path,
                created_at: meta.created_at,
                request_id,
            });
        }
        Ok(items)
    }

    /// 某个主体的历史结果，最新在前
    pub fn history(&self, subject_id: &str, limit: usize) -> Result<Vec<HistoryItem>, StoreError> {
        let mut items = Vec::new();
        for entry in self
            .subjects
            .scan_prefix(subject_prefix(subject_id))
            .values()
            .rev()
            .take(limit)
        {
            let request_id = String::from_utf8_lossy(&entry?).into_owned();
            let result = self.latest(&request_id)?;
            let meta = self.meta(&request_id)?;
            items.push(HistoryItem {
                request_id,
                address: meta.address,
                acs: result.acs,
                vl: result.vl,
                vl_label: result.vl.label(),
                escalation_path: result.escalation_path,
                token_available: result.token_available,
                created_at: meta.created_at,
            });
        }
        Ok(items)
    }

    /// 同一城市其他请求的最新 ACS
    pub fn category_peers(&self, category: &str, exclude: &str) -> Result<Vec<f64>, StoreError> {
        let mut peers = Vec::new();
        for entry in self.requests.iter().values() {
            let meta: RequestMeta = serde_json::from_slice(&entry?)?;
            if meta.request_id == exclude || meta.address.category_key() != category {
                continue;
            }
            peers.push(self.latest(&meta.request_id)?.acs);
        }
        Ok(peers)
    }

    pub fn dashboard(&self, now: DateTime<Utc>) -> Result<DashboardStats, StoreError> {
        let mut stats = DashboardStats {
            total_validations: 0,
            pending_validations: 0,
            avg_acs: 0.0,
            vl_distribution: VerificationLevel::ALL.iter().map(|vl| (*vl, 0)).collect(),
            recent_validations: 0,
        };
        let since = now - Duration::hours(24);
        let mut acs_sum = 0.0;

        for entry in self.requests.iter().values() {
            let meta: RequestMeta = serde_json::from_slice(&entry?)?;
            let result = self.latest(&meta.request_id)?;
            stats.total_validations += 1;
            if result.review_status() == ReviewStatus::AwaitingReview {
                stats.pending_validations += 1;
            }
            if meta.created_at >= since {
                stats.recent_validations += 1;
            }
            acs_sum += result.acs;
            *stats.vl_distribution.entry(result.vl).or_insert(0) += 1;
        }
        if stats.total_validations > 0 {
            stats.avg_acs = acs_sum / stats.total_validations as f64;
        }
        Ok(stats)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

// 分配下一个账本序号并写入叶子。所有发布都读写同一个 head key，提交顺序即序号顺序。
fn stage_leaf(
    leaves: &TransactionalTree,
    head: &TransactionalTree,
    entry: &LedgerEntry,
) -> ConflictableTransactionResult<u64, StoreError> {
    let seq = match head.get(ledger::HEAD_KEY)? {
        Some(raw) => ledger::decode_seq(&raw).map_err(|e| abort(e.into()))?,
        None => 0,
    };
    let encoded = serde_json::to_vec(entry).map_err(|e| abort(e.into()))?;
    leaves.insert(&ledger::seq_key(seq)[..], encoded)?;
    head.insert(ledger::HEAD_KEY, &(seq + 1).to_be_bytes()[..])?;
    Ok(seq)
}

fn abort(err: StoreError) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(err)
}

fn unwrap_transaction<T>(outcome: Result<T, TransactionError<StoreError>>) -> Result<T, StoreError> {
    match outcome {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(StoreError::Storage(e)),
    }
}

fn time_key(at: DateTime<Utc>) -> [u8; 8] {
    // 1970 年之前的时间不会出现，截到 0
    (at.timestamp_micros().max(0) as u64).to_be_bytes()
}

fn subject_prefix(subject_id: &str) -> Vec<u8> {
    [subject_id.as_bytes(), &[0u8][..]].concat()
}

fn revision_prefix(request_id: &str) -> Vec<u8> {
    [request_id.as_bytes(), &[0u8][..]].concat()
}

fn revision_key(request_id: &str, revision: u32) -> Vec<u8> {
    [revision_prefix(request_id).as_slice(), &revision.to_be_bytes()[..]].concat()
}

fn decode_revision(raw: &[u8]) -> Result<u32, StoreError> {
    let bytes: [u8; 4] = raw
        .try_into()
        .map_err(|_| StoreError::Corrupt("revision pointer must be 4 bytes".to_string()))?;
    Ok(u32::from_be_bytes(bytes))
}
