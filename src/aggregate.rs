use crate::error::ScoringError;
use crate::evidence::EvidenceRecord;

/// 聚合函数：把证据序列合成为地址置信分 (ACS)
///
/// $$ ACS = \frac{\sum score_i \cdot weight_i}{\sum weight_i} $$
///
/// 按实际出现的权重之和归一化，缺失的信号类别不会把分数拉低。
/// 结果保持浮点，展示时再取整。
pub fn aggregate(evidence: &[EvidenceRecord]) -> Result<f64, ScoringError> {
    if evidence.is_empty() {
        return Err(ScoringError::NoEvidence);
    }

    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for record in evidence {
        record.validate()?;
        weighted += record.score * record.weight;
        total_weight += record.weight;
    }

    if total_weight <= 0.0 {
        return Err(ScoringError::DegenerateWeights);
    }

    // 浮点误差可能让结果略微越过边界
    Ok((weighted / total_weight).clamp(0.0, 100.0))
}
