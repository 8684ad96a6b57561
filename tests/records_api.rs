use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use httpmock::{
    Method::{POST, PUT},
    MockServer,
};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tower::ServiceExt;
use uuid::Uuid;
use vector_records::{
    api::create_router,
    embedding::OpenAiEmbeddingClient,
    metadata::{CollectionInfo, MetadataError, MetadataStore},
    qdrant::{QdrantService, compute_content_hash},
    queue::{ProcessFileJob, QueueError, TaskQueue},
    records::RecordService,
};

const MODEL: &str = "team-model";

#[derive(Default)]
struct MemoryMetadata {
    fields: Mutex<Vec<String>>,
    tasks: Mutex<Vec<(Uuid, &'static str)>>,
}

#[async_trait]
impl MetadataStore for MemoryMetadata {
    async fn find_collection(
        &self,
        app_id: &str,
        team_id: &str,
        name: &str,
    ) -> Result<Option<CollectionInfo>, MetadataError> {
        Ok((team_id == "team-1" && name == "docs").then(|| CollectionInfo {
            app_id: app_id.to_string(),
            team_id: team_id.to_string(),
            name: name.to_string(),
            embedding_model: MODEL.to_string(),
            metadata_fields: Vec::new(),
        }))
    }

    async fn find_collection_by_name(
        &self,
        app_id: &str,
        name: &str,
    ) -> Result<Option<CollectionInfo>, MetadataError> {
        self.find_collection(app_id, "team-1", name).await
    }

    async fn add_metadata_fields(
        &self,
        _app_id: &str,
        _team_id: &str,
        _name: &str,
        fields: &[String],
    ) -> Result<(), MetadataError> {
        let mut known = self.fields.lock().await;
        for field in fields {
            if !known.contains(field) {
                known.push(field.clone());
            }
        }
        Ok(())
    }

    async fn create_task(
        &self,
        _app_id: &str,
        _team_id: &str,
        _collection_name: &str,
        task_id: Uuid,
    ) -> Result<(), MetadataError> {
        self.tasks.lock().await.push((task_id, "pending"));
        Ok(())
    }

    async fn update_task_progress(&self, _task_id: Uuid, _progress: f32) -> Result<(), MetadataError> {
        Ok(())
    }

    async fn complete_task(&self, _task_id: Uuid) -> Result<(), MetadataError> {
        Ok(())
    }

    async fn fail_task(&self, _task_id: Uuid, _message: &str) -> Result<(), MetadataError> {
        Ok(())
    }
}

#[derive(Default)]
struct MemoryQueue {
    jobs: Mutex<Vec<ProcessFileJob>>,
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn submit(&self, job: &ProcessFileJob) -> Result<String, QueueError> {
        self.jobs.lock().await.push(job.clone());
        Ok("1700000000000-0".to_string())
    }
}

struct Harness {
    server: MockServer,
    app: Router,
    metadata: Arc<MemoryMetadata>,
    queue: Arc<MemoryQueue>,
}

async fn harness() -> Harness {
    let server = MockServer::start_async().await;
    let metadata = Arc::new(MemoryMetadata::default());
    let queue = Arc::new(MemoryQueue::default());
    let embedding = OpenAiEmbeddingClient::new(Some(server.url("/v1").as_str()), Some("sk-test".into()))
        .expect("embedding client");
    let qdrant = QdrantService::new(&server.base_url(), None).expect("qdrant client");
    let service = RecordService::new(
        Arc::new(embedding),
        Arc::new(qdrant),
        metadata.clone(),
        queue.clone(),
        reqwest::Client::new(),
    );
    Harness {
        app: create_router(Arc::new(service)),
        server,
        metadata,
        queue,
    }
}

fn request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-team-id", "team-1")
        .header("x-app-id", "app-1")
        .header("x-user-id", "user-1")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("router response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    (status, serde_json::from_slice(&bytes).expect("json body"))
}

#[tokio::test]
async fn text_record_is_embedded_and_upserted() {
    let h = harness().await;
    let embeddings = h
        .server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/embeddings")
                .header("authorization", "Bearer sk-test")
                .body_contains(MODEL);
            then.status(200).json_body(json!({
                "data": [{ "index": 0, "embedding": [0.1, 0.2, 0.3] }]
            }));
        })
        .await;
    let upsert = h
        .server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/collections/app-1_docs/points")
                .query_param("wait", "true")
                .body_contains(&compute_content_hash("hello world"));
            then.status(200)
                .json_body(json!({ "result": { "status": "completed" }, "status": "ok" }));
        })
        .await;

    let (status, body) = send(
        &h.app,
        request(
            Method::POST,
            "/api/vector/collections/docs/records",
            json!({ "text": "hello world", "metadata": { "lang": "en" } }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "insert_count": 1,
            "delete_count": 0,
            "upsert_count": 1,
            "success_count": 1,
            "err_count": 0
        })
    );
    embeddings.assert_async().await;
    upsert.assert_async().await;
    let fields = h.metadata.fields.lock().await;
    assert!(fields.contains(&"lang".to_string()));
    assert!(fields.contains(&"userId".to_string()));
}

#[tokio::test]
async fn search_embeds_query_then_returns_hits() {
    let h = harness().await;
    let embeddings = h
        .server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings").body_contains("where is it");
            then.status(200).json_body(json!({
                "data": [{ "index": 0, "embedding": [0.5, 0.5, 0.0] }]
            }));
        })
        .await;
    let query = h
        .server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/collections/app-1_docs/points/query")
                .body_contains("metadata.lang");
            then.status(200).json_body(json!({
                "result": { "points": [{
                    "id": "4b3a1f0e-7c8d-5e6f-9a0b-1c2d3e4f5a6b",
                    "score": 0.87,
                    "payload": { "pk": "abc", "text": "it is here", "metadata": { "lang": "en" } }
                }]},
                "status": "ok"
            }));
        })
        .await;

    let (status, body) = send(
        &h.app,
        request(
            Method::POST,
            "/api/vector/collections/docs/search",
            json!({ "q": "where is it", "expr": "lang == 'en'", "limit": 3 }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["records"][0]["pk"], "abc");
    assert_eq!(body["records"][0]["text"], "it is here");
    assert_eq!(body["records"][0]["metadata"]["lang"], "en");
    embeddings.assert_async().await;
    query.assert_async().await;
}

#[tokio::test]
async fn deleting_a_missing_record_reports_zero() {
    let h = harness().await;
    let retrieve = h
        .server
        .mock_async(|when, then| {
            when.method(POST).path("/collections/app-1_docs/points");
            then.status(200).json_body(json!({ "result": [], "status": "ok" }));
        })
        .await;
    let delete = h
        .server
        .mock_async(|when, then| {
            when.method(POST).path("/collections/app-1_docs/points/delete");
            then.status(200).json_body(json!({ "result": {}, "status": "ok" }));
        })
        .await;

    let (status, body) = send(
        &h.app,
        request(
            Method::DELETE,
            "/api/vector/collections/docs/records/nope",
            Value::Null,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "delete_count": 0 }));
    retrieve.assert_async().await;
    assert_eq!(delete.hits_async().await, 0);
}

#[tokio::test]
async fn async_file_create_returns_task_id() {
    let h = harness().await;

    let (status, body) = send(
        &h.app,
        request(
            Method::POST,
            "/api/vector/collections/docs/records",
            json!({ "fileURL": "https://files.example/manual.txt" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let task_id: Uuid = body["taskId"]
        .as_str()
        .expect("task id")
        .parse()
        .expect("uuid");
    assert_eq!(h.metadata.tasks.lock().await.as_slice(), &[(task_id, "pending")]);
    let jobs = h.queue.jobs.lock().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].task_id, task_id);
    assert_eq!(jobs[0].metadata["userId"], "user-1");
}

#[tokio::test]
async fn create_without_input_is_rejected_before_embedding() {
    let h = harness().await;
    let embeddings = h
        .server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(200).json_body(json!({ "data": [] }));
        })
        .await;

    let (status, body) = send(
        &h.app,
        request(
            Method::POST,
            "/api/vector/collections/docs/records",
            json!({ "metadata": { "lang": "en" } }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BAD_REQUEST");
    assert_eq!(embeddings.hits_async().await, 0);
    assert!(h.metadata.tasks.lock().await.is_empty());
}

#[tokio::test]
async fn unknown_collection_is_not_found() {
    let h = harness().await;
    let (status, body) = send(
        &h.app,
        request(
            Method::PUT,
            "/api/vector/collections/elsewhere/records/pk-1",
            json!({ "text": "x" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].as_str().unwrap().contains("elsewhere"));
}
