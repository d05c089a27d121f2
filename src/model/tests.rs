use super::*;
use crate::transport::mock::{ok_payload, rejected_payload, MockTransport};
use crate::transport::Envelope;
use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;

fn thing_kind() -> Arc<ModelKind> {
    Arc::new(ModelKind::new("thing", "/thing"))
}

fn thing(transport: SharedTransport, data: Value) -> Model {
    Model::new(thing_kind(), transport, data, ModelOptions::default())
}

/// Mock that answers every call with the record `{ id: 5, name: <q param or "X"> }`
fn echo_transport() -> MockTransport {
    MockTransport::new(|call| {
        let name = call.params.get("q").cloned().unwrap_or(json!("X"));
        Ok(ok_payload(json!({"id": 5, "name": name})))
    })
}

fn event_names(rx: &mut broadcast::Receiver<ModelEvent>) -> Vec<String> {
    let mut names = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => names.push(event.name()),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    names
}

// ── Fetch ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_applies_record() {
    let transport = MockTransport::returning(json!({"id": 5, "name": "X"})).shared();
    let model = thing(transport.clone(), Value::Null);

    let outcome = model.fetch(RequestOptions::new().with_id(5)).await;

    assert!(outcome.is_success());
    assert_eq!(model.get("name"), Some(json!("X")));
    assert_eq!(model.id(), Some(json!(5)));
    assert!(model.errors().is_empty());
    assert!(!model.is_dirty());
    assert!(!model.is_loading());

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "GET");
    assert_eq!(calls[0].url, "/thing/5");
}

#[tokio::test]
async fn test_fetch_uses_own_identity() {
    let transport = echo_transport().shared();
    let model = thing(transport.clone(), json!({"id": 5}));

    assert!(model.fetch(RequestOptions::new()).await.is_success());
    assert_eq!(transport.calls()[0].url, "/thing/5");
}

#[tokio::test]
async fn test_rejected_fetch_keeps_attributes() {
    let transport = MockTransport::new(|_| {
        Ok(Envelope::ok(json!({"status": false, "error": "not allowed"})))
    })
    .shared();
    let model = thing(transport, json!({"id": 5, "name": "X"}));

    let outcome = model.fetch(RequestOptions::new()).await;

    assert!(matches!(outcome, RequestOutcome::Rejected(_)));
    assert_eq!(model.get("name"), Some(json!("X")));
    assert_eq!(
        Value::Object(model.errors()),
        json!({"status": false, "error": "not allowed"})
    );
    assert_eq!(
        outcome.failure().map(|f| f.error),
        Some("not allowed".to_string())
    );
}

#[tokio::test]
async fn test_fetch_without_identity_fails_before_network() {
    let transport = echo_transport().shared();
    let model = thing(transport.clone(), Value::Null);
    let mut rx = model.subscribe();

    let outcome = model.fetch(RequestOptions::new()).await;

    assert_eq!(
        serde_json::to_value(outcome.failure().unwrap()).unwrap(),
        json!({"success": false, "error": "ID required", "status": 400})
    );
    assert_eq!(model.errors()["fetch"], json!("ID required"));
    assert_eq!(transport.call_count(), 0);
    assert_eq!(event_names(&mut rx), vec!["fetch:error"]);
}

#[tokio::test]
async fn test_fetch_without_identity_allowed_when_waived() {
    let transport = MockTransport::returning(json!({"theme": "dark"})).shared();
    let kind = Arc::new(ModelKind::new("settings", "/settings").with_requires_id(false));
    let model = Model::new(kind, transport.clone(), Value::Null, ModelOptions::default());

    assert!(model.fetch(RequestOptions::new()).await.is_success());
    assert_eq!(transport.calls()[0].url, "/settings");
    assert_eq!(model.get("theme"), Some(json!("dark")));
}

#[tokio::test]
async fn test_transport_failure_recorded() {
    let transport =
        MockTransport::new(|_| Ok(Envelope::failure(503, "Service Unavailable"))).shared();
    let model = thing(transport, json!({"id": 5, "name": "X"}));

    let outcome = model.fetch(RequestOptions::new()).await;

    let failure = outcome.failure().unwrap();
    assert_eq!(failure.status, 503);
    assert_eq!(failure.error, "Service Unavailable");
    assert_eq!(model.errors()["fetch"], json!("Service Unavailable"));
    assert_eq!(model.get("name"), Some(json!("X")));
}

#[tokio::test]
async fn test_timeout_reports_408() {
    let transport = MockTransport::new(|_| Err(TransportError::Timeout)).shared();
    let model = thing(transport, json!({"id": 5}));

    let outcome = model.fetch(RequestOptions::new()).await;
    assert_eq!(outcome.failure().map(|f| f.status), Some(408));
    assert!(model.errors().contains_key("fetch"));
}

#[tokio::test]
async fn test_new_fetch_clears_previous_errors() {
    let transport = echo_transport().shared();
    let model = thing(transport, Value::Null);

    model.fetch(RequestOptions::new()).await;
    assert!(model.errors().contains_key("fetch"));

    assert!(model.fetch(RequestOptions::new().with_id(5)).await.is_success());
    assert!(model.errors().is_empty());
}

#[tokio::test]
async fn test_graph_and_params_reach_transport() {
    let transport = echo_transport().shared();
    let model = thing(transport.clone(), json!({"id": 5}));

    model
        .fetch(RequestOptions::new().with_param("q", "ada").with_graph("basic"))
        .await;

    let call = &transport.calls()[0];
    assert_eq!(Value::Object(call.params.clone()), json!({"q": "ada", "graph": "basic"}));
}

#[tokio::test]
async fn test_url_override() {
    let transport = echo_transport().shared();
    let model = thing(transport.clone(), Value::Null);

    assert!(model
        .fetch(RequestOptions::new().with_url("/custom/thing"))
        .await
        .is_success());
    assert_eq!(transport.calls()[0].url, "/custom/thing");
}

#[tokio::test]
async fn test_fetch_events() {
    let transport = echo_transport().shared();
    let model = thing(transport, Value::Null);
    let mut rx = model.subscribe();

    model.fetch(RequestOptions::new().with_id(5)).await;

    let names = event_names(&mut rx);
    assert_eq!(names.first().map(String::as_str), Some("fetch:start"));
    assert!(names.contains(&"change:name".to_string()));
    assert_eq!(names.last().map(String::as_str), Some("fetched"));
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_identical_fetches_share_one_call() {
    let transport = echo_transport().with_delay(50).shared();
    let model = thing(transport.clone(), json!({"id": 5}));

    let (first, second) = tokio::join!(
        model.fetch(RequestOptions::new()),
        model.fetch(RequestOptions::new())
    );

    assert!(first.is_success());
    assert!(second.is_success());
    assert_eq!(first.envelope(), second.envelope());
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_different_params_supersede() {
    let transport = echo_transport().with_delay(50).shared();
    let model = thing(transport.clone(), json!({"id": 5}));

    let (first, second) = tokio::join!(
        model.fetch(RequestOptions::new().with_param("q", "a")),
        model.fetch(RequestOptions::new().with_param("q", "b"))
    );

    assert!(first.is_cancelled());
    assert!(second.is_success());
    assert_eq!(model.get("name"), Some(json!("b")));
    let last = transport.calls().pop().unwrap();
    assert_eq!(last.params.get("q"), Some(&json!("b")));
    assert!(!model.is_fetching());
}

#[tokio::test(start_paused = true)]
async fn test_debounced_fetches_collapse() {
    let transport = echo_transport().shared();
    let model = thing(transport.clone(), json!({"id": 5}));

    let mut handles = Vec::new();
    for q in ["a", "b", "c"] {
        let model = model.clone();
        handles.push(tokio::spawn(async move {
            model
                .fetch(RequestOptions::new().with_param("q", q).debounced(50))
                .await
        }));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }

    assert!(outcomes[0].is_cancelled());
    assert!(outcomes[1].is_cancelled());
    assert!(outcomes[2].is_success());

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].params.get("q"), Some(&json!("c")));
    assert_eq!(model.get("name"), Some(json!("c")));
}

#[tokio::test(start_paused = true)]
async fn test_kind_default_debounce() {
    let transport = echo_transport().shared();
    let kind = Arc::new(
        ModelKind::new("thing", "/thing").with_default_debounce(Duration::from_millis(30)),
    );
    let model = Model::new(kind, transport.clone(), json!({"id": 5}), ModelOptions::default());

    let first = {
        let model = model.clone();
        tokio::spawn(async move { model.fetch(RequestOptions::new().with_param("q", "a")).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = model.fetch(RequestOptions::new().with_param("q", "b")).await;

    assert!(first.await.unwrap().is_cancelled());
    assert!(second.is_success());
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_back_to_back_fetch_is_throttled() {
    let transport = echo_transport().shared();
    let model = thing(transport.clone(), json!({"id": 5}));

    assert!(model.fetch(RequestOptions::new()).await.is_success());
    model.set("name", json!("local"));

    let second = model.fetch(RequestOptions::new()).await;
    assert!(second.is_skipped());
    assert_eq!(transport.call_count(), 1);
    assert_eq!(model.get("name"), Some(json!("local")));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(model.fetch(RequestOptions::new()).await.is_success());
    assert_eq!(transport.call_count(), 2);
    assert_eq!(model.get("name"), Some(json!("X")));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_aborts_in_flight_fetch() {
    let transport = echo_transport().with_delay(50).shared();
    let model = thing(transport.clone(), json!({"id": 5, "name": "old"}));

    let pending = {
        let model = model.clone();
        tokio::spawn(async move { model.fetch(RequestOptions::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert!(model.is_fetching());
    assert!(model.is_loading());
    assert!(model.cancel());

    assert!(pending.await.unwrap().is_cancelled());
    assert_eq!(transport.call_count(), 1);
    assert_eq!(model.get("name"), Some(json!("old")));
    assert!(!model.is_fetching());
    assert!(!model.is_loading());
    assert!(!model.cancel());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_drops_pending_debounce() {
    let transport = echo_transport().shared();
    let model = thing(transport.clone(), json!({"id": 5}));

    let pending = {
        let model = model.clone();
        tokio::spawn(async move { model.fetch(RequestOptions::new().debounced(50)).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert!(model.cancel());
    assert!(pending.await.unwrap().is_cancelled());
    assert_eq!(transport.call_count(), 0);
}

// ── Save ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_save_new_model_posts() {
    let transport = MockTransport::new(|call| {
        let mut record = call.body.clone().unwrap_or_default();
        record["id"] = json!(9);
        Ok(ok_payload(record))
    })
    .shared();
    let model = thing(transport.clone(), Value::Null);
    model.set("name", json!("Y"));
    let mut rx = model.subscribe();

    let outcome = model.save(Value::Null, RequestOptions::new()).await;

    assert!(outcome.is_success());
    let call = &transport.calls()[0];
    assert_eq!(call.method, "POST");
    assert_eq!(call.url, "/thing");
    assert_eq!(call.body, Some(json!({"name": "Y"})));

    assert_eq!(model.id(), Some(json!(9)));
    assert!(!model.is_dirty());
    assert_eq!(event_names(&mut rx).last().map(String::as_str), Some("saved"));
}

#[tokio::test]
async fn test_save_existing_model_puts_and_merges_body() {
    let transport = MockTransport::new(|_| Ok(ok_payload(Value::Null))).shared();
    let model = thing(transport.clone(), json!({"id": 5, "name": "X"}));

    let outcome = model
        .save(json!({"name": "Z"}), RequestOptions::new())
        .await;

    assert!(outcome.is_success());
    let call = &transport.calls()[0];
    assert_eq!(call.method, "PUT");
    assert_eq!(call.url, "/thing/5");
    assert_eq!(call.body, Some(json!({"name": "Z"})));

    assert_eq!(model.get("name"), Some(json!("Z")));
    assert!(!model.is_dirty());
}

#[tokio::test]
async fn test_save_created_flag() {
    let transport = MockTransport::returning(json!({"id": 9})).shared();
    let model = thing(transport, Value::Null);
    let mut rx = model.subscribe();

    model.save(json!({"name": "Y"}), RequestOptions::new()).await;

    let mut created = None;
    while let Ok(event) = rx.try_recv() {
        if let ModelEvent::Saved { created: flag, .. } = event {
            created = Some(flag);
        }
    }
    assert_eq!(created, Some(true));
}

#[tokio::test]
async fn test_save_rejects_non_object_body() {
    let transport = echo_transport().shared();
    let model = thing(transport.clone(), json!({"id": 5}));

    let outcome = model.save(json!([1, 2]), RequestOptions::new()).await;

    assert_eq!(outcome.failure().map(|f| f.status), Some(400));
    assert!(model.errors().contains_key("save"));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_save_rejection_sets_field_errors() {
    let transport = MockTransport::new(|_| {
        Ok(Envelope::ok(
            json!({"status": false, "error": "invalid", "name": "too short"}),
        ))
    })
    .shared();
    let model = thing(transport, json!({"id": 5}));
    model.set("name", json!("Y"));

    let outcome = model.save(Value::Null, RequestOptions::new()).await;

    assert!(matches!(outcome, RequestOutcome::Rejected(_)));
    assert_eq!(model.errors()["name"], json!("too short"));
    assert!(model.is_dirty());
}

#[tokio::test(start_paused = true)]
async fn test_loading_during_save() {
    let transport = echo_transport().with_delay(20).shared();
    let model = thing(transport, json!({"id": 5}));

    let pending = {
        let model = model.clone();
        tokio::spawn(async move { model.save(json!({"name": "Y"}), RequestOptions::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(model.is_loading());
    assert!(!model.is_fetching());

    assert!(pending.await.unwrap().is_success());
    assert!(!model.is_loading());
}

// ── Destroy ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_destroy_clears_state() {
    let transport = MockTransport::new(|_| Ok(ok_payload(Value::Null))).shared();
    let model = thing(transport.clone(), json!({"id": 5, "name": "X"}));
    let mut rx = model.subscribe();

    let outcome = model.destroy(RequestOptions::new()).await;

    assert!(outcome.is_success());
    assert_eq!(transport.calls()[0].method, "DELETE");
    assert_eq!(transport.calls()[0].url, "/thing/5");
    assert_eq!(model.get("id"), None);
    assert_eq!(model.to_json(), json!({}));
    assert_eq!(event_names(&mut rx), vec!["destroyed"]);
}

#[tokio::test]
async fn test_destroy_without_identity() {
    let transport = echo_transport().shared();
    let model = thing(transport.clone(), json!({"name": "X"}));

    let outcome = model.destroy(RequestOptions::new()).await;

    let failure = outcome.failure().unwrap();
    assert!(!failure.success);
    assert_eq!(failure.status, 400);
    assert!(model.errors().contains_key("destroy"));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_destroy_rejected_leaves_model() {
    let transport = MockTransport::new(|_| Ok(rejected_payload("locked"))).shared();
    let model = thing(transport, json!({"id": 5, "name": "X"}));

    let outcome = model.destroy(RequestOptions::new()).await;

    assert!(matches!(outcome, RequestOutcome::Rejected(_)));
    assert_eq!(model.errors()["destroy"], json!("locked"));
    assert_eq!(model.errors()["error"], json!("locked"));
    assert_eq!(model.id(), Some(json!(5)));
    assert_eq!(model.get("name"), Some(json!("X")));
}

#[tokio::test]
async fn test_destroy_transport_failure() {
    let transport = MockTransport::new(|_| {
        Err(TransportError::Network("connection reset".to_string()))
    })
    .shared();
    let model = thing(transport, json!({"id": 5}));

    let outcome = model.destroy(RequestOptions::new()).await;

    assert_eq!(outcome.failure().map(|f| f.status), Some(500));
    assert!(model.errors().contains_key("destroy"));
    assert_eq!(model.id(), Some(json!(5)));
}

// ── Construction / URLs ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_find_fetches_record() {
    let transport = echo_transport().shared();
    let model = Model::find(thing_kind(), transport, 5, RequestOptions::new()).await;

    assert_eq!(model.get("name"), Some(json!("X")));
    assert!(model.errors().is_empty());
}

#[tokio::test]
async fn test_find_failure_is_reported_on_model() {
    let transport =
        MockTransport::new(|_| Ok(Envelope::failure(404, "404 Not Found"))).shared();
    let model = Model::find(thing_kind(), transport, 5, RequestOptions::new()).await;

    assert_eq!(model.errors()["fetch"], json!("404 Not Found"));
}

#[test]
fn test_create_makes_no_calls() {
    let transport = echo_transport().shared();
    let model = Model::create(
        thing_kind(),
        transport.clone(),
        json!({"name": "new"}),
        ModelOptions::default(),
    );

    assert_eq!(model.id(), None);
    assert!(!model.is_dirty());
    assert_eq!(transport.call_count(), 0);
}

#[test]
fn test_url_building() {
    let transport = echo_transport().shared();
    let model = thing(transport.clone(), json!({"id": 5}));
    assert_eq!(model.url(None), "/thing/5");
    assert_eq!(model.url(Some(&json!("a b"))), "/thing/a%20b");

    let templated = Model::new(
        thing_kind(),
        transport,
        Value::Null,
        ModelOptions::default().with_endpoint("/org/{id}/profile"),
    );
    assert_eq!(templated.url(Some(&json!(7))), "/org/7/profile");
    assert_eq!(templated.url(None), "/org/profile");
}

#[test]
fn test_options_override_kind() {
    let transport = echo_transport().shared();
    let model = Model::new(
        thing_kind(),
        transport,
        json!({"uuid": "abc", "id": 1}),
        ModelOptions::default().with_id_attribute("uuid"),
    );

    assert_eq!(model.id(), Some(json!("abc")));
    assert_eq!(model.endpoint(), "/thing");
}

#[tokio::test]
async fn test_timestamps_record_sync_time() {
    let transport = echo_transport().shared();
    let kind = Arc::new(ModelKind::new("thing", "/thing").with_timestamps(true));
    let model = Model::new(kind, transport, json!({"id": 5}), ModelOptions::default());

    assert!(model.synced_at().is_none());
    model.fetch(RequestOptions::new()).await;
    assert!(model.synced_at().is_some());
}

#[test]
fn test_computed_field_from_kind() {
    let transport = echo_transport().shared();
    let kind = Arc::new(ModelKind::new("thing", "/thing").with_computed("label", |store| {
        let name = store.get("name|upper").unwrap_or(Value::Null);
        json!(format!("#{}", name.as_str().unwrap_or("")))
    }));
    let model = Model::new(kind, transport, json!({"name": "ada"}), ModelOptions::default());

    assert_eq!(model.get("label"), Some(json!("#ADA")));
}

#[test]
fn test_pipe_formatting_through_model() {
    let transport = echo_transport().shared();
    let model = thing(transport, json!({"price": 1234.5}));

    assert_eq!(model.get("price|currency"), Some(json!("$1,234.50")));
    assert_eq!(model.get("price"), Some(json!(1234.5)));
}
