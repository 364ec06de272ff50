use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use digitrust_core::{
    api::{self, AppState},
    engine::ScoringEngine,
    ledger::RevisionLedger,
    signer::RevisionSigner,
    store::ResultStore,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceExt;

fn state() -> Arc<AppState> {
    let store = ResultStore::temporary().unwrap();
    let ledger = RevisionLedger::open(store.ledger_tree()).unwrap();
    Arc::new(AppState {
        engine: ScoringEngine::default(),
        store,
        ledger: Arc::new(Mutex::new(ledger)),
        signer: Arc::new(RevisionSigner::generate()),
    })
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn post(state: &Arc<AppState>, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(api::app(state.clone()), req).await
}

async fn get(state: &Arc<AppState>, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(api::app(state.clone()), req).await
}

fn validate_body(user: &str, city: &str, evidence: Value) -> Value {
    json!({
        "user_id": user,
        "address": {
            "house_no": "12",
            "street": "MG Road",
            "locality": "Swaraj Round",
            "city": city,
            "pin": "680001"
        },
        "consent": { "purpose": "kyc" },
        "evidence": evidence
    })
}

fn reference_evidence() -> Value {
    json!([
        { "type": "geo", "score": 80.0, "weight": 0.4 },
        { "type": "doc", "score": 60.0, "weight": 0.3 },
        { "type": "crowd", "score": 40.0, "weight": 0.3 }
    ])
}

async fn validate(state: &Arc<AppState>, user: &str, city: &str, evidence: Value) -> Value {
    let (status, body) = post(state, "/api/validate", validate_body(user, city, evidence)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body
}

fn confirm(request_id: &str, postman: bool, delivery: bool, mark_vl: Option<&str>) -> Value {
    json!({
        "request_id": request_id,
        "admin_id": "adm_7",
        "postman_confirmed": postman,
        "delivery_confirmed": delivery,
        "mark_vl": mark_vl,
        "notes": "visited"
    })
}

#[tokio::test]
async fn validate_scores_the_reference_submission() {
    let state = state();
    let body = validate(&state, "u1", "Thrissur", reference_evidence()).await;

    assert!((body["acs"].as_f64().unwrap() - 62.0).abs() < 1e-9);
    assert_eq!(body["vl"], "VL2");
    assert_eq!(body["escalation_path"], "crowd_validation");
    assert_eq!(body["token_available"], false);
    assert_eq!(body["revision"], 0);
    assert_eq!(body["evidence"].as_array().unwrap().len(), 3);
    assert!(body["request_id"].as_str().unwrap().starts_with("vr_"));
    assert!(body["receipt"]["signature"].as_str().unwrap().len() == 128);

    let reasons: Vec<&str> = body["reason_codes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert!(reasons.contains(&"temporal_missing"));
    assert!(!reasons.contains(&"geo_low"));
}

#[tokio::test]
async fn empty_evidence_is_unprocessable() {
    let state = state();
    let (status, body) = post(&state, "/api/validate", validate_body("u1", "Thrissur", json!([]))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "NO_EVIDENCE");

    // 失败的请求不落库
    let (_, queue) = get(&state, "/api/admin/queue").await;
    assert!(queue["queue"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_evidence_type_is_unprocessable() {
    let state = state();
    let evidence = json!([{ "type": "satellite", "score": 50.0, "weight": 1.0 }]);
    let (status, body) = post(&state, "/api/validate", validate_body("u1", "Thrissur", evidence)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_EVIDENCE");
}

#[tokio::test]
async fn zero_weights_are_unprocessable() {
    let state = state();
    let evidence = json!([{ "type": "geo", "score": 50.0, "weight": 0.0 }]);
    let (status, body) = post(&state, "/api/validate", validate_body("u1", "Thrissur", evidence)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "DEGENERATE_WEIGHTS");
}

#[tokio::test]
async fn result_lookup_and_not_found() {
    let state = state();
    let created = validate(&state, "u1", "Thrissur", reference_evidence()).await;
    let id = created["request_id"].as_str().unwrap();

    let (status, body) = get(&state, &format!("/api/result/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["acs"], created["acs"]);
    assert!(body.get("receipt").is_none());

    let (status, body) = get(&state, "/api/result/vr_nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn admin_confirmation_is_idempotent() {
    let state = state();
    let evidence = json!([{ "type": "geo", "score": 50.0, "weight": 1.0 }]);
    let created = validate(&state, "u1", "Thrissur", evidence).await;
    let id = created["request_id"].as_str().unwrap();
    assert_eq!(created["escalation_path"], "crowd_validation");

    let (status, diff) = post(&state, "/api/admin/confirm", confirm(id, true, false, None)).await;
    assert_eq!(status, StatusCode::OK, "{diff}");
    assert_eq!(diff["old_acs"], 50.0);
    assert_eq!(diff["new_acs"], 65.0);
    assert_eq!(diff["revision"], 1);

    let (_, again) = post(&state, "/api/admin/confirm", confirm(id, true, false, None)).await;
    assert_eq!(again["new_acs"], 65.0);
    assert_eq!(again["revision"], 2);

    let (_, latest) = get(&state, &format!("/api/result/{id}")).await;
    assert_eq!(latest["escalation_path"], "auto_token");
    assert_eq!(latest["token_available"], true);
    assert_eq!(latest["last_review"]["admin_id"], "adm_7");

    let (_, revisions) = get(&state, &format!("/api/result/{id}/revisions")).await;
    assert_eq!(revisions.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn unknown_override_keeps_the_prior_revision() {
    let state = state();
    let created = validate(&state, "u1", "Thrissur", reference_evidence()).await;
    let id = created["request_id"].as_str().unwrap();

    let (status, body) = post(&state, "/api/admin/confirm", confirm(id, true, false, Some("VL9"))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "UNKNOWN_OVERRIDE");

    let (_, latest) = get(&state, &format!("/api/result/{id}")).await;
    assert_eq!(latest["revision"], 0);
    assert_eq!(latest["acs"], created["acs"]);

    // 事务回滚，账本里也没有多出叶子
    let (_, health) = get(&state, "/health").await;
    assert_eq!(health["ledger_leaves"], 1);
}

#[tokio::test]
async fn confirming_an_unknown_request_is_not_found() {
    let state = state();
    let (status, _) = post(&state, "/api/admin/confirm", confirm("vr_ghost", true, true, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn queue_lists_newest_first_and_pages() {
    let state = state();
    let first = validate(&state, "u1", "Thrissur", reference_evidence()).await;
    let second = validate(&state, "u2", "Kochi", reference_evidence()).await;

    let (status, body) = get(&state, "/api/admin/queue").await;
    assert_eq!(status, StatusCode::OK);
    let queue = body["queue"].as_array().unwrap();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue[0]["request_id"], second["request_id"]);
    assert_eq!(queue[1]["request_id"], first["request_id"]);
    assert_eq!(queue[0]["status"], "awaiting_review");

    let (_, page) = get(&state, "/api/admin/queue?offset=1&limit=1").await;
    let page = page["queue"].as_array().unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["request_id"], first["request_id"]);
}

#[tokio::test]
async fn history_requires_a_subject() {
    let state = state();
    validate(&state, "u1", "Thrissur", reference_evidence()).await;
    validate(&state, "u2", "Thrissur", reference_evidence()).await;

    let (status, body) = get(&state, "/api/history").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let req = Request::builder()
        .uri("/api/history")
        .header(api::SUBJECT_HEADER, "u1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(api::app(state.clone()), req).await;
    assert_eq!(status, StatusCode::OK);
    let history = body["history"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["vl"], "VL2");
}

#[tokio::test]
async fn category_comparison_uses_same_city_peers() {
    let state = state();
    let first = validate(&state, "u1", "Thrissur", reference_evidence()).await;
    assert!(first["category_avg_comparison"].is_null());

    let evidence = json!([{ "type": "geo", "score": 77.0, "weight": 1.0 }]);
    let second = validate(&state, "u2", " thrissur ", evidence).await;
    let cmp = &second["category_avg_comparison"];
    assert_eq!(cmp["category"], "thrissur");
    assert!((cmp["average_acs"].as_f64().unwrap() - 62.0).abs() < 1e-9);
    assert!((cmp["difference"].as_f64().unwrap() - 15.0).abs() < 1e-9);
}

#[tokio::test]
async fn every_revision_gets_a_verifiable_audit_proof() {
    let state = state();
    let created = validate(&state, "u1", "Thrissur", reference_evidence()).await;
    let id = created["request_id"].as_str().unwrap();
    let (_, confirmed) = post(&state, "/api/admin/confirm", confirm(id, true, true, None)).await;

    for receipt in [&created["receipt"], &confirmed["receipt"]] {
        let pos = receipt["leaf_pos"].as_u64().unwrap();
        let (status, proof) = get(&state, &format!("/api/audit/{pos}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(proof["proof_valid"], true);
        assert_eq!(proof["entry"]["request_id"], id);
        assert_eq!(proof["entry"]["leaf"], receipt["leaf"]);
    }

    let (status, _) = get(&state, "/api/audit/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dashboard_and_health_summarise_the_store() {
    let state = state();
    validate(&state, "u1", "Thrissur", reference_evidence()).await;
    let evidence = json!([{ "type": "geo", "score": 20.0, "weight": 1.0 }]);
    validate(&state, "u2", "Kochi", evidence).await;

    let (status, stats) = get(&state, "/api/admin/dashboard").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_validations"], 2);
    assert_eq!(stats["pending_validations"], 2);
    assert_eq!(stats["recent_validations"], 2);
    assert!((stats["avg_acs"].as_f64().unwrap() - 41.0).abs() < 1e-9);
    assert_eq!(stats["vl_distribution"]["VL2"], 1);
    assert_eq!(stats["vl_distribution"]["VL0"], 1);

    let (status, health) = get(&state, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["ledger_leaves"], 2);
}

#[tokio::test]
async fn admin_review_detail_shows_request_and_trail() {
    let state = state();
    let created = validate(&state, "u1", "Thrissur", reference_evidence()).await;
    let id = created["request_id"].as_str().unwrap();

    let (status, detail) = get(&state, &format!("/api/admin/review/{id}")).await;
    assert_eq!(status, StatusCode::OK, "{detail}");
    assert_eq!(detail["status"], "awaiting_review");
    assert_eq!(detail["audit_trail"].as_array().unwrap().len(), 1);

    post(&state, "/api/admin/confirm", confirm(id, true, false, None)).await;

    let (status, detail) = get(&state, &format!("/api/admin/review/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["request_id"], id);
    assert_eq!(detail["subject_id"], "u1");
    assert_eq!(detail["status"], "reviewed");
    assert_eq!(detail["consent"]["purpose"], "kyc");
    assert_eq!(detail["address"]["city"], "Thrissur");
    assert!(detail["created_at"].is_string());
    assert_eq!(detail["result"]["revision"], 1);
    assert_eq!(detail["result"]["evidence"].as_array().unwrap().len(), 3);

    let trail = detail["audit_trail"].as_array().unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0]["revision"], 1);
    assert_eq!(trail[0]["review"]["admin_id"], "adm_7");
    assert!(trail[1]["review"].is_null());
    assert_eq!(trail[1]["ledger_pos"], created["receipt"]["leaf_pos"]);
    assert!(trail[0]["ledger_pos"].is_u64());

    let (status, body) = get(&state, "/api/admin/review/vr_nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn replayed_ledger_matches_the_live_one() {
    let state = state();
    let created = validate(&state, "u1", "Thrissur", reference_evidence()).await;
    let id = created["request_id"].as_str().unwrap();
    post(&state, "/api/admin/confirm", confirm(id, false, true, None)).await;
    validate(&state, "u2", "Kochi", reference_evidence()).await;

    let live = state.ledger.lock().await.root().unwrap();
    let replayed = RevisionLedger::open(state.store.ledger_tree()).unwrap();
    assert_eq!(replayed.len(), 3);
    assert_eq!(replayed.root().unwrap(), live);
    assert!(live.is_some());
}
