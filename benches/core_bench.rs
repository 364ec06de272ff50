use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion};
use digitrust_core::{
    address::{Address, Consent},
    aggregate::aggregate,
    engine::{ScoringEngine, Submission},
    evidence::{EvidenceRecord, EvidenceType},
    fraud::RiskLevel,
    result::AdminReviewAction,
    router::{route, RoutingInput, RoutingPolicy},
    store::{RequestMeta, ResultStore},
};
use std::hint::black_box;

fn sample_evidence() -> Vec<EvidenceRecord> {
    [
        (EvidenceType::Geo, 70.0, 0.5),
        (EvidenceType::Temporal, 55.0, 0.3),
        (EvidenceType::Iot, 48.0, 0.2),
        (EvidenceType::Doc, 80.0, 0.4),
        (EvidenceType::Crowd, 35.0, 0.1),
        (EvidenceType::Linguistic, 62.0, 0.2),
    ]
    .into_iter()
    .map(|(kind, score, weight)| EvidenceRecord::new(kind, score, weight).unwrap())
    .collect()
}

fn bench_aggregate(c: &mut Criterion) {
    let evidence = sample_evidence();
    c.bench_function("aggregate_weighted_mean", |b| {
        b.iter(|| aggregate(black_box(&evidence)).unwrap())
    });
}

fn bench_route(c: &mut Criterion) {
    let policy = RoutingPolicy::default();
    let input = RoutingInput {
        acs: 52.0,
        fraud_level: Some(RiskLevel::Medium),
        position_confidence_meters: Some(120.0),
    };
    c.bench_function("route_escalation", |b| {
        b.iter(|| route(black_box(&input), &policy))
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let engine = ScoringEngine::default();
    let now = Utc::now();
    let deliveries: Vec<_> = (0..8).map(|d| now - chrono::Duration::days(d * 9)).collect();

    c.bench_function("evaluate_submission", |b| {
        b.iter(|| {
            let submission = Submission {
                evidence: sample_evidence(),
                position_confidence_meters: Some(90.0),
                deliveries: deliveries.clone(),
                ..Default::default()
            };
            engine.evaluate("vr_bench", submission, now).unwrap()
        })
    });
}

fn bench_supersede(c: &mut Criterion) {
    // 临时库，进程退出即删除
    let store = ResultStore::temporary().unwrap();
    let engine = ScoringEngine::default();
    let now = Utc::now();
    let initial = engine
        .evaluate(
            "vr_bench",
            Submission {
                evidence: sample_evidence(),
                ..Default::default()
            },
            now,
        )
        .unwrap();
    let meta = RequestMeta {
        request_id: "vr_bench".to_string(),
        subject_id: "bench".to_string(),
        address: Address::default(),
        consent: Consent {
            purpose: "kyc".to_string(),
            validity_days: 365,
        },
        created_at: now,
    };
    store.publish(&meta, &initial).unwrap();

    let action = AdminReviewAction {
        request_id: "vr_bench".to_string(),
        admin_id: "bench".to_string(),
        postman_confirmed: true,
        ..Default::default()
    };

    c.bench_function("store_supersede_revision", |b| {
        b.iter(|| {
            store
                .supersede("vr_bench", |prev| engine.apply_review(prev, &action, Utc::now()))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_aggregate, bench_route, bench_evaluate, bench_supersede);
criterion_main!(benches);
