use crate::classify::VerificationLevel;
use crate::evidence::{EvidenceRecord, EvidenceType};

/// 各类证据的"偏低"阈值，低于即产出 `<type>_low`
pub fn low_threshold(kind: EvidenceType) -> f64 {
    match kind {
        EvidenceType::Geo => 50.0,
        EvidenceType::GeoPrecision => 50.0,
        EvidenceType::Temporal => 50.0,
        EvidenceType::TemporalDecay => 40.0,
        EvidenceType::Iot => 30.0,
        EvidenceType::Doc => 50.0,
        EvidenceType::Crowd => 40.0,
        EvidenceType::Linguistic => 50.0,
        EvidenceType::CrossCorpus => 40.0,
        EvidenceType::History => 30.0,
    }
}

/// 原因码 -> 建议 的固定查找表
pub fn suggestion_for(code: &str) -> Option<&'static str> {
    let text = match code {
        "geo_low" => "Add a more precise pin/landmark",
        "geo_missing" => "Verify your DIGIPIN code so the location can be matched",
        "geo_precision_low" => "Move the map pin closer to the building entrance",
        "geo_precision_missing" => "Drop a pin on the map to confirm the exact location",
        "temporal_low" => "Request a test delivery to establish address history",
        "temporal_missing" => "Request a test delivery to establish address history",
        "temporal_decay_low" => "Recent deliveries are sparse; schedule a delivery to refresh history",
        "temporal_decay_missing" => "No recent delivery activity was found for this address",
        "iot_low" => "Enable location services on your device for IoT verification",
        "iot_missing" => "Enable location services on your device for IoT verification",
        "doc_low" => "Upload property tax receipt or utility bill for documentary proof",
        "doc_missing" => "Upload property tax receipt or utility bill for documentary proof",
        "crowd_low" => "Request verification from local postman or community validator",
        "crowd_missing" => "Request verification from local postman or community validator",
        "linguistic_low" => "Include nearby landmarks (temple, school, shop) in your address",
        "linguistic_missing" => "Write the address in full, including locality and landmarks",
        "cross_corpus_low" => "Evidence sources disagree; double-check locality, city and PIN",
        "cross_corpus_missing" => "Provide more independent evidence so sources can be cross-checked",
        "history_low" => "Earlier validations of this address scored low; update the address details",
        "history_missing" => "First validation for this address; later confirmations will raise trust",
        _ => return None,
    };
    Some(text)
}

/// 原因码与建议
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Explanation {
    pub reason_codes: Vec<String>,
    pub suggestions: Vec<String>,
    /// 低于阈值的证据条数
    pub low_count: usize,
}

/// 从证据推导原因码
///
/// 先按证据顺序输出 `<type>_low`，再按类别顺序输出 `<type>_missing`。
pub fn reason_codes(evidence: &[EvidenceRecord]) -> (Vec<String>, usize) {
    let mut codes = Vec::new();
    let mut low_count = 0;

    for record in evidence {
        if record.score < low_threshold(record.kind) {
            low_count += 1;
            let code = format!("{}_low", record.kind);
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
    }

    for kind in EvidenceType::ALL {
        if !evidence.iter().any(|e| e.kind == kind) {
            codes.push(format!("{kind}_missing"));
        }
    }

    (codes, low_count)
}

/// 一对一从原因码生成建议；ACS 满分，或 VL3 且没有偏低证据时不给建议
pub fn suggestions(codes: &[String], acs: f64, vl: VerificationLevel, low_count: usize) -> Vec<String> {
    if acs >= 100.0 || (vl == VerificationLevel::VL3 && low_count == 0) {
        return Vec::new();
    }
    codes
        .iter()
        .filter_map(|code| suggestion_for(code))
        .map(str::to_string)
        .collect()
}

pub fn explain(evidence: &[EvidenceRecord], acs: f64, vl: VerificationLevel) -> Explanation {
    let (reason_codes, low_count) = reason_codes(evidence);
    let suggestions = suggestions(&reason_codes, acs, vl, low_count);
    Explanation {
        reason_codes,
        suggestions,
        low_count,
    }
}
