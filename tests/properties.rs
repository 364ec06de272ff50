use chrono::Utc;
use digitrust_core::{
    aggregate::aggregate,
    classify::{classify, VlBands},
    engine::{ScoringEngine, Submission},
    evidence::{EvidenceRecord, EvidenceType},
    fraud::RiskLevel,
    result::AdminReviewAction,
    router::{route, EscalationPath, RoutingInput, RoutingPolicy},
};
use proptest::prelude::*;

fn record() -> impl Strategy<Value = EvidenceRecord> {
    (
        prop::sample::select(EvidenceType::ALL.to_vec()),
        0.0f64..=100.0,
        0.01f64..=1.0,
    )
        .prop_map(|(kind, score, weight)| EvidenceRecord::new(kind, score, weight).unwrap())
}

fn evidence() -> impl Strategy<Value = Vec<EvidenceRecord>> {
    prop::collection::vec(record(), 1..12)
}

fn risk() -> impl Strategy<Value = Option<RiskLevel>> {
    prop::option::of(prop::sample::select(vec![
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
    ]))
}

proptest! {
    #[test]
    fn aggregate_is_the_weighted_mean(evidence in evidence()) {
        let acs = aggregate(&evidence).unwrap();
        let num: f64 = evidence.iter().map(|e| e.score * e.weight).sum();
        let den: f64 = evidence.iter().map(|e| e.weight).sum();
        prop_assert!((acs - num / den).abs() < 1e-9);

        let lo = evidence.iter().map(|e| e.score).fold(f64::INFINITY, f64::min);
        let hi = evidence.iter().map(|e| e.score).fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(acs >= lo - 1e-9 && acs <= hi + 1e-9);
    }

    #[test]
    fn aggregate_ignores_order_and_uniform_scaling(evidence in evidence(), factor in 0.1f64..=1.0) {
        let acs = aggregate(&evidence).unwrap();

        let mut reversed = evidence.clone();
        reversed.reverse();
        prop_assert!((aggregate(&reversed).unwrap() - acs).abs() < 1e-9);

        let scaled: Vec<_> = evidence
            .iter()
            .map(|e| EvidenceRecord::new(e.kind, e.score, e.weight * factor).unwrap())
            .collect();
        prop_assert!((aggregate(&scaled).unwrap() - acs).abs() < 1e-9);
    }

    #[test]
    fn classification_is_monotone(a in 0.0f64..=100.0, b in 0.0f64..=100.0) {
        let bands = VlBands::default();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(classify(lo, &bands) <= classify(hi, &bands));
    }

    #[test]
    fn high_fraud_always_goes_to_fraud_queue(
        acs in 0.0f64..=100.0,
        radius in prop::option::of(1.0f64..1000.0),
    ) {
        let input = RoutingInput {
            acs,
            fraud_level: Some(RiskLevel::High),
            position_confidence_meters: radius,
        };
        prop_assert_eq!(route(&input, &RoutingPolicy::default()), EscalationPath::FraudQueue);
    }

    #[test]
    fn auto_token_needs_the_threshold(
        acs in 0.0f64..=100.0,
        fraud in risk(),
        radius in prop::option::of(1.0f64..1000.0),
    ) {
        let policy = RoutingPolicy::default();
        let input = RoutingInput { acs, fraud_level: fraud, position_confidence_meters: radius };
        let path = route(&input, &policy);
        if path == EscalationPath::AutoToken {
            prop_assert!(acs >= policy.token_threshold);
            prop_assert_ne!(fraud, Some(RiskLevel::High));
        }
        if path == EscalationPath::PostmanQueue {
            prop_assert!(acs < policy.crowd_min_acs);
        }
    }

    #[test]
    fn repeating_a_review_changes_nothing_but_the_revision(
        evidence in evidence(),
        postman in any::<bool>(),
        delivery in any::<bool>(),
    ) {
        let engine = ScoringEngine::default();
        let now = Utc::now();
        let initial = engine
            .evaluate("vr_prop", Submission { evidence, ..Default::default() }, now)
            .unwrap();
        let action = AdminReviewAction {
            request_id: "vr_prop".into(),
            admin_id: "adm".into(),
            postman_confirmed: postman,
            delivery_confirmed: delivery,
            ..Default::default()
        };

        let once = engine.apply_review(&initial, &action, now).unwrap();
        let twice = engine.apply_review(&once, &action, now).unwrap();
        prop_assert_eq!(twice.revision, initial.revision + 2);
        prop_assert_eq!(once.acs, twice.acs);
        prop_assert_eq!(once.vl, twice.vl);
        prop_assert_eq!(once.escalation_path, twice.escalation_path);
        prop_assert_eq!(once.token_available, twice.token_available);
        prop_assert!(once.acs <= 100.0);
        prop_assert!(once.acs >= initial.acs);
    }
}
