//! Firestore backend against an in-process fake of the emulator REST API.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, post},
};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;

use waitlist_gateway::email::EmailAddress;
use waitlist_gateway::store::{
    DEFAULT_COLLECTION, DEFAULT_DATABASE, FirestoreSettings, FirestoreStore, FirestoreTarget,
    WaitlistStore,
};

type Docs = Arc<DashMap<String, Value>>;

#[derive(Deserialize)]
struct CreateParams {
    #[serde(rename = "documentId")]
    document_id: String,
}

fn firestore_error(status: StatusCode, code: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "code": status.as_u16(), "message": code, "status": code } })),
    )
        .into_response()
}

async fn create_document(
    State(docs): State<Docs>,
    Path((_project, _database, _collection)): Path<(String, String, String)>,
    Query(params): Query<CreateParams>,
    Json(body): Json<Value>,
) -> Response {
    match docs.entry(params.document_id) {
        dashmap::mapref::entry::Entry::Occupied(_) => firestore_error(StatusCode::CONFLICT, "ALREADY_EXISTS"),
        dashmap::mapref::entry::Entry::Vacant(slot) => {
            slot.insert(body.clone());
            Json(body).into_response()
        }
    }
}

async fn run_query(State(docs): State<Docs>, Json(query): Json<Value>) -> Response {
    assert_eq!(query["structuredQuery"]["from"][0]["collectionId"], DEFAULT_COLLECTION);
    assert_eq!(query["structuredQuery"]["orderBy"][0]["direction"], "DESCENDING");

    let mut rows: Vec<Value> = docs.iter().map(|doc| doc.value().clone()).collect();
    rows.sort_by(|a, b| {
        let key = |v: &Value| v["fields"]["createdAt"]["stringValue"].as_str().unwrap_or_default().to_string();
        key(b).cmp(&key(a))
    });
    let rows: Vec<Value> = rows.into_iter().map(|doc| json!({ "document": doc })).collect();
    Json(rows).into_response()
}

async fn delete_document(
    State(docs): State<Docs>,
    Path((_project, _database, _collection, id)): Path<(String, String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    assert_eq!(params.get("currentDocument.exists").map(String::as_str), Some("true"));
    match docs.remove(&id) {
        Some(_) => Json(json!({})).into_response(),
        None => firestore_error(StatusCode::NOT_FOUND, "NOT_FOUND"),
    }
}

async fn unavailable() -> Response {
    firestore_error(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE")
}

async fn spawn_fake(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr.to_string()
}

async fn fake_emulator() -> (FirestoreStore, Docs) {
    let docs: Docs = Arc::new(DashMap::new());
    let router = Router::new()
        .route(
            "/v1/projects/{project}/databases/{database}/documents:runQuery",
            post(run_query),
        )
        .route(
            "/v1/projects/{project}/databases/{database}/documents/{collection}",
            post(create_document),
        )
        .route(
            "/v1/projects/{project}/databases/{database}/documents/{collection}/{id}",
            delete(delete_document),
        )
        .with_state(Arc::clone(&docs));

    (connect(spawn_fake(router).await), docs)
}

fn connect(host: String) -> FirestoreStore {
    FirestoreStore::connect(
        FirestoreSettings {
            project_id: "demo-waitlist".into(),
            database_id: DEFAULT_DATABASE.into(),
            collection: DEFAULT_COLLECTION.into(),
            target: FirestoreTarget::Emulator { host },
        },
        reqwest::Client::new(),
    )
    .unwrap()
}

fn email(raw: &str) -> EmailAddress {
    EmailAddress::parse(raw).unwrap()
}

#[tokio::test]
async fn create_then_duplicate() {
    let (store, docs) = fake_emulator().await;

    assert!(store.create(&email("a@b.com")).await.unwrap().created);
    assert!(!store.create(&email(" A@b.COM")).await.unwrap().created);

    assert_eq!(docs.len(), 1);
    let stored = docs.get("a@b.com").unwrap();
    assert_eq!(stored["fields"]["email"]["stringValue"], "a@b.com");
    assert!(stored["fields"]["createdAt"]["stringValue"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn concurrent_creates_have_one_winner() {
    let (store, docs) = fake_emulator().await;
    let store = Arc::new(store);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.create(&email("race@example.com")).await })
        })
        .collect();

    let mut created = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().created {
            created += 1;
        }
    }
    assert_eq!(created, 1);
    assert_eq!(docs.len(), 1);
}

#[tokio::test]
async fn list_and_delete() {
    let (store, _docs) = fake_emulator().await;

    store.create(&email("old@b.com")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store.create(&email("new@b.com")).await.unwrap();

    let emails: Vec<_> = store.list().await.unwrap().into_iter().map(|e| e.email).collect();
    assert_eq!(emails, vec!["new@b.com".to_string(), "old@b.com".to_string()]);

    assert_eq!(store.delete(&email("old@b.com")).await.unwrap().removed, 1);
    assert_eq!(store.delete(&email("old@b.com")).await.unwrap().removed, 0);
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn backend_errors_surface_as_unavailable() {
    let router = Router::new().fallback(unavailable);
    let store = connect(spawn_fake(router).await);

    let err = store.create(&email("a@b.com")).await.unwrap_err();
    assert_eq!(err.backend(), "firestore");
    assert!(err.to_string().contains("UNAVAILABLE"));
    assert!(store.list().await.is_err());
    assert!(store.delete(&email("a@b.com")).await.is_err());
}

#[tokio::test]
async fn unreachable_emulator_is_unavailable() {
    // bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let host = listener.local_addr().unwrap().to_string();
    drop(listener);

    let store = connect(host);
    assert!(store.create(&email("a@b.com")).await.is_err());
}
