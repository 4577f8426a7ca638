use autorest::{
    autoconfigure, ApiSettings, AppState, ComputedProperty, CustomEndpoint, ExposureOverrides, FieldDef, FieldType,
    ListQuery, MemoryStore, ModelDef, SchemaModule,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const SUPER: i64 = 0;
const EDITOR: i64 = 1;
const VIEWER: i64 = 2;

fn older_than(args: &BTreeMap<String, String>) -> Result<ListQuery, String> {
    let age = args.get("age").ok_or("`age` is required")?;
    let age: i64 = age.parse().map_err(|_| format!("invalid age `{}`", age))?;
    Ok(ListQuery::default().filter("age", json!(age)))
}

fn module() -> Arc<SchemaModule> {
    Arc::new(
        SchemaModule::new("family")
            .with(
                ModelDef::new("Parent", "parent")
                    .field(FieldDef::string("name").unique())
                    .field(FieldDef::string("code"))
                    .field(FieldDef::has_many("children", "Child", "parent_id"))
                    .exposed(ExposureOverrides::new().read_only("code")),
            )
            .with(
                ModelDef::new("Child", "child")
                    .field(FieldDef::string("name"))
                    .field(FieldDef::integer("age"))
                    .field(FieldDef::belongs_to("parent", "Parent", "parent_id"))
                    .property(
                        ComputedProperty::new("kind")
                            .returns(FieldType::String)
                            .unbound_getter(|| json!("child")),
                    )
                    .exposed(
                        ExposureOverrides::new()
                            .queryable("mother", "parent")
                            .custom_endpoint(CustomEndpoint::new("aged", "Child", "Children of an exact age", older_than)),
                    ),
            )
            .with(
                ModelDef::new("Node", "node")
                    .field(FieldDef::string("label"))
                    .field(FieldDef::belongs_to("parent", "Node", "parent_id"))
                    .exposed(ExposureOverrides::new()),
            ),
    )
}

fn app_with(settings: ApiSettings) -> (Router, MemoryStore) {
    let module = module();
    let store = MemoryStore::new(module.clone());
    let state = AppState::new(Arc::new(store.clone()), module, settings).unwrap();
    (autoconfigure(state).unwrap(), store)
}

fn app() -> (Router, MemoryStore) {
    app_with(ApiSettings::default())
}

async fn call(app: &Router, method: &str, uri: &str, level: Option<i64>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(level) = level {
        builder = builder.header("X-API-KEY", level.to_string());
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn create_parent(app: &Router, name: &str) -> Value {
    let (status, body) = call(app, "POST", "/api/parent/", Some(EDITOR), Some(json!({ "name": name }))).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body
}

#[tokio::test]
async fn list_paginates_and_counts_all_matches() {
    let (app, _) = app();
    for i in 0..5 {
        create_parent(&app, &format!("p{}", i)).await;
    }
    let (status, body) = call(&app, "GET", "/api/parent/?_page=2&_pagelength=2", Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::OK);
    let items = body["result"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["id"], json!(3));
    assert_eq!(
        items[0]["_links"],
        json!([{"href": "/api/parent/3", "rel": "view record data", "method": "GET"}])
    );
    assert_eq!(body["info"]["page"], json!(2));
    assert_eq!(body["info"]["total_pages"], json!(3));
    assert_eq!(body["info"]["total_results"], json!(5));
    assert_eq!(body["info"]["message"], json!("Successfully retrieved page (2/3) of parent data"));

    let (status, body) = call(&app, "GET", "/api/parent/?_page=9", Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], json!([]));

    let (status, body) = call(&app, "GET", "/api/parent/?_pagelength=x", Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn read_only_field_is_rejected_without_writing() {
    let (app, store) = app();
    let (status, body) = call(
        &app,
        "POST",
        "/api/parent/",
        Some(EDITOR),
        Some(json!({"name": "a", "code": "x", "colour": "red"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["info"]["message"],
        json!(["Attribute `code` is read-only.", "Attribute `colour` not found on model."])
    );
    assert_eq!(store.committed_count("parent").unwrap(), 0);
}

#[tokio::test]
async fn missing_body_is_a_validation_error() {
    let (app, _) = app();
    let (status, body) = call(&app, "POST", "/api/parent/", Some(EDITOR), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["info"]["message"],
        json!("No update parameters found. Did you pass valid JSON in the request body?")
    );
}

#[tokio::test]
async fn duplicate_unique_value_conflicts_and_keeps_first_record() {
    let (app, store) = app();
    create_parent(&app, "alpha").await;
    let (status, body) = call(&app, "POST", "/api/parent/", Some(EDITOR), Some(json!({"name": "alpha"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        body["info"]["message"],
        json!("The \"name\" value must be unique, and another record with \"name\" = \"alpha\" already exists.")
    );
    assert_eq!(store.committed_count("parent").unwrap(), 1);
    let (status, body) = call(&app, "GET", "/api/parent/1", Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["name"], json!("alpha"));
}

#[tokio::test]
async fn session_collects_creates_until_saved() {
    let (app, store) = app();
    let (status, body) = call(&app, "GET", "/api/session/new", Some(EDITOR), None).await;
    assert_eq!(status, StatusCode::OK);
    let session = body["result"]["session_id"].as_str().unwrap().to_string();
    assert!(body["info"]["message"].as_str().unwrap().contains("30 minutes"));

    for name in ["a", "b"] {
        let (status, body) = call(
            &app,
            "POST",
            &format!("/api/child/?_session={}", session),
            Some(EDITOR),
            Some(json!({"name": name, "age": 3})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        assert_eq!(body["info"]["session"], json!(session));
    }
    assert_eq!(store.committed_count("child").unwrap(), 0);

    let (status, body) = call(&app, "GET", &format!("/api/session/save/{}", session), Some(EDITOR), None).await;
    assert_eq!(status, StatusCode::OK);
    let created = body["result"]["CREATE"].as_array().unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0]["TYPE"], json!("child"));
    assert_eq!(created[1]["DATA"]["name"], json!("b"));
    assert_eq!(body["result"]["UPDATE"], json!([]));
    assert_eq!(store.committed_count("child").unwrap(), 2);

    let (status, _) = call(&app, "GET", &format!("/api/session/save/{}", session), Some(EDITOR), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rollback_can_keep_the_session_open() {
    let (app, store) = app();
    let (_, body) = call(&app, "GET", "/api/session/new", Some(EDITOR), None).await;
    let session = body["result"]["session_id"].as_str().unwrap().to_string();
    let uri = format!("/api/parent/?_session={}", session);
    call(&app, "POST", &uri, Some(EDITOR), Some(json!({"name": "gone"}))).await;

    let (status, body) = call(
        &app,
        "GET",
        &format!("/api/session/rollback/{}?close=n", session),
        Some(EDITOR),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["CREATE"].as_array().unwrap().len(), 1);
    assert_eq!(body["info"]["session"], json!(session));

    let (status, _) = call(&app, "POST", &uri, Some(EDITOR), Some(json!({"name": "kept"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    call(&app, "GET", &format!("/api/session/save/{}", session), Some(EDITOR), None).await;
    assert_eq!(store.committed_count("parent").unwrap(), 1);
}

#[tokio::test]
async fn closing_rollback_does_not_echo_the_session() {
    let (app, store) = app();
    let (_, body) = call(&app, "GET", "/api/session/new", Some(EDITOR), None).await;
    let session = body["result"]["session_id"].as_str().unwrap().to_string();
    call(&app, "POST", &format!("/api/parent/?_session={}", session), Some(EDITOR), Some(json!({"name": "x"}))).await;

    let (status, body) = call(&app, "GET", &format!("/api/session/rollback/{}", session), Some(EDITOR), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["info"]["session"], Value::Null);
    assert_eq!(store.committed_count("parent").unwrap(), 0);
    let (status, _) = call(&app, "GET", &format!("/api/session/save/{}", session), Some(EDITOR), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mistyped_filter_in_session_keeps_earlier_work() {
    let (app, store) = app();
    let (_, body) = call(&app, "GET", "/api/session/new", Some(EDITOR), None).await;
    let session = body["result"]["session_id"].as_str().unwrap().to_string();
    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/child/?_session={}", session),
        Some(EDITOR),
        Some(json!({"name": "kept", "age": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(
        &app,
        "GET",
        &format!("/api/child/details?age=twelve&_session={}", session),
        Some(VIEWER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["info"]["message"], json!("Invalid value for `age`: expected an integer"));

    let (status, body) = call(&app, "GET", &format!("/api/session/save/{}", session), Some(EDITOR), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["CREATE"].as_array().unwrap().len(), 1);
    assert_eq!(store.committed_count("child").unwrap(), 1);
}

#[tokio::test]
async fn duplicate_across_sessions_conflicts_on_second_save() {
    let (app, store) = app();
    let mut sessions = Vec::new();
    for _ in 0..2 {
        let (_, body) = call(&app, "GET", "/api/session/new", Some(EDITOR), None).await;
        let session = body["result"]["session_id"].as_str().unwrap().to_string();
        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/parent/?_session={}", session),
            Some(EDITOR),
            Some(json!({"name": "dup"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        sessions.push(session);
    }

    let (status, _) = call(&app, "GET", &format!("/api/session/save/{}", sessions[0]), Some(EDITOR), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&app, "GET", &format!("/api/session/save/{}", sessions[1]), Some(EDITOR), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], json!(false));
    assert_eq!(store.committed_count("parent").unwrap(), 1);
    let (_, body) = call(&app, "GET", "/api/parent/", Some(VIEWER), None).await;
    assert_eq!(body["info"]["total_results"], json!(1));
}

#[tokio::test(start_paused = true)]
async fn idle_session_expires_and_loses_its_writes() {
    let (app, store) = app_with(ApiSettings {
        session_timeout: Duration::from_secs(60),
        ..ApiSettings::default()
    });
    let (_, body) = call(&app, "GET", "/api/session/new", Some(EDITOR), None).await;
    let session = body["result"]["session_id"].as_str().unwrap().to_string();
    let uri = format!("/api/parent/?_session={}", session);
    let (status, _) = call(&app, "POST", &uri, Some(EDITOR), Some(json!({"name": "late"}))).await;
    assert_eq!(status, StatusCode::CREATED);

    tokio::time::advance(Duration::from_secs(61)).await;
    let (status, body) = call(&app, "POST", &uri, Some(EDITOR), Some(json!({"name": "later"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body["info"]["message"],
        json!(format!("No active DB session was found with ID '{}'", session))
    );
    assert_eq!(store.committed_count("parent").unwrap(), 0);
}

#[tokio::test]
async fn relationships_round_trip_through_the_api() {
    let (app, _) = app();
    for name in ["x", "y"] {
        let (status, _) = call(&app, "POST", "/api/child/", Some(EDITOR), Some(json!({"name": name}))).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, body) = call(
        &app,
        "POST",
        "/api/parent/",
        Some(EDITOR),
        Some(json!({"name": "mum", "children": [2, 1]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let mut children: Vec<i64> = body["result"]["children"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_i64)
        .collect();
    children.sort();
    assert_eq!(children, [1, 2]);
    assert_eq!(body["info"]["message"], json!("Successfully created parent record 1"));

    let (_, body) = call(&app, "GET", "/api/child/1", Some(VIEWER), None).await;
    assert_eq!(body["result"]["parent"]["name"], json!("mum"));
    assert_eq!(body["result"]["kind"], json!("child"));
    let rels: Vec<&str> = body["result"]["_links"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|l| l["rel"].as_str())
        .collect();
    assert_eq!(rels, ["delete record", "edit record"]);

    let (status, body) = call(
        &app,
        "POST",
        "/api/parent/",
        Some(EDITOR),
        Some(json!({"name": "dad", "children": [1, 42]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["info"]["message"],
        json!("Could not find `parent.children` records with value(s) 42")
    );
}

#[tokio::test]
async fn detailed_list_filters_sorts_and_searches() {
    let (app, _) = app();
    create_parent(&app, "mum").await;
    for (name, age, parent) in [("zed", 4, Some(1)), ("amy", 9, Some(1)), ("bob", 4, None)] {
        let (status, _) = call(
            &app,
            "POST",
            "/api/child/",
            Some(EDITOR),
            Some(json!({"name": name, "age": age, "parent": parent})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, body) = call(&app, "GET", "/api/child/details?mother=1&_sortby=name", Some(VIEWER), None).await;
    let names: Vec<&str> = body["result"].as_array().unwrap().iter().filter_map(|c| c["name"].as_str()).collect();
    assert_eq!(names, ["amy", "zed"]);
    assert_eq!(body["info"]["total_results"], json!(2));

    let (_, body) = call(&app, "GET", "/api/child/details?age=4&_query=B", Some(VIEWER), None).await;
    assert_eq!(body["info"]["total_results"], json!(1));
    assert_eq!(body["result"][0]["name"], json!("bob"));

    let (status, body) = call(&app, "GET", "/api/child/details?hair=red&eyes=blue", Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["info"]["message"],
        json!(["Attribute `eyes` not found", "Attribute `hair` not found"])
    );

    let (status, _) = call(&app, "GET", "/api/child/details?_sortby=parent", Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn custom_endpoint_serves_its_query() {
    let (app, _) = app();
    for age in [3, 5, 5] {
        call(&app, "POST", "/api/child/", Some(EDITOR), Some(json!({"name": "c", "age": age}))).await;
    }
    let (status, body) = call(&app, "GET", "/api/child/aged?age=5", Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["info"]["total_results"], json!(2));
    assert_eq!(body["result"][0]["age"], json!(5));

    let (status, body) = call(&app, "GET", "/api/child/aged", Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["info"]["message"], json!("`age` is required"));
}

#[tokio::test]
async fn update_and_delete_by_id() {
    let (app, _) = app();
    create_parent(&app, "old").await;
    let (status, body) = call(&app, "POST", "/api/parent/1", Some(EDITOR), Some(json!({"name": "new"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["name"], json!("new"));
    assert_eq!(body["info"]["message"], json!("Successfully updated parent record 1"));

    let (status, _) = call(&app, "DELETE", "/api/parent/1", Some(EDITOR), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = call(&app, "DELETE", "/api/parent/1", Some(SUPER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["name"], json!("new"));

    let (status, body) = call(&app, "GET", "/api/parent/1", Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["info"]["message"], json!("Record with ID `1` not found"));
    let (status, _) = call(&app, "GET", "/api/parent/abc", Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_or_weak_credentials_are_unauthorized() {
    let (app, store) = app();
    let (status, body) = call(&app, "GET", "/api/parent/", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["info"]["message"], json!("Access level insufficient"));

    let (status, _) = call(&app, "POST", "/api/parent/", Some(VIEWER), Some(json!({"name": "a"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(store.committed_count("parent").unwrap(), 0);
    let (status, _) = call(&app, "GET", "/api/session/new", Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_route_gets_the_error_envelope() {
    let (app, _) = app();
    let (status, body) = call(&app, "GET", "/api/nothing/here", Some(SUPER), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["info"]["code"], json!(404));
}

#[tokio::test]
async fn self_referencing_model_registers_without_its_recursive_branch() {
    let (app, _) = app();
    let (status, doc) = call(&app, "GET", "/api/openapi.json", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let node = &doc["components"]["schemas"]["node"]["properties"];
    assert!(node["label"].is_object());
    assert!(node.get("parent").is_none());
    assert!(doc["paths"]["/api/child/{id}"]["delete"].is_object());
    assert!(doc["paths"]["/api/session/rollback/{id}"]["get"].is_object());

    let (status, body) = call(&app, "POST", "/api/node/", Some(EDITOR), Some(json!({"label": "root"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["result"].get("parent").is_none());
}

#[tokio::test]
async fn health_and_readiness() {
    let (app, _) = app();
    let (status, body) = call(&app, "GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
    let (status, body) = call(&app, "GET", "/api/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], json!("ok"));
}

#[test]
fn instance_only_computed_property_fails_generation() {
    fn size(_: &autorest::Record) -> Value {
        json!(1)
    }
    let module = Arc::new(
        SchemaModule::new("bad").with(
            ModelDef::new("Box", "box")
                .property(ComputedProperty::new("size").returns(FieldType::Integer).getter(size))
                .exposed(ExposureOverrides::new()),
        ),
    );
    let store = MemoryStore::new(module.clone());
    let state = AppState::new(Arc::new(store), module, ApiSettings::default()).unwrap();
    let err = autoconfigure(state).err().unwrap();
    assert!(err.to_string().contains("box.size") || err.to_string().contains("Box.size"));
}
