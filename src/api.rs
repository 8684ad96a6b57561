//! HTTP surface for vector records.
//!
//! Every record endpoint is scoped to a collection and to the caller identity carried in the
//! `x-team-id`, `x-app-id`, and `x-user-id` headers:
//!
//! - `POST /api/vector/collections/:name/records` – Store a text, or ingest a file (queued by
//!   default, inline with `"async": false`).
//! - `POST /api/vector/collections/:name/records/upsert` – Embed and upsert a list of
//!   `{pk, text, metadata}` records.
//! - `POST /api/vector/collections/:name/query` – Page through records matching `expr`.
//! - `POST /api/vector/collections/:name/search` – Similarity search for `q`.
//! - `DELETE /api/vector/collections/:name/records/:pk` – Delete a record.
//! - `PUT /api/vector/collections/:name/records/:pk` – Re-embed and replace a record.
//! - `GET /healthz` – Liveness check.
//!
//! Errors render as `{"error": CODE, "message": text}`.

use crate::records::{
    BatchRecord, CreateRecordRequest, CreateRecordResponse, DeleteResponse, QueryRequest,
    QueryResponse, RecordApi, RecordError, RequestContext, SearchRequest, SearchResponse,
    UpsertCountResponse, UpsertRecordRequest,
};
use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;

/// Header carrying the caller's team id.
pub const TEAM_ID_HEADER: &str = "x-team-id";
/// Header carrying the caller's application id.
pub const APP_ID_HEADER: &str = "x-app-id";
/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Build the HTTP router exposing the record endpoints.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: RecordApi + 'static,
{
    Router::new()
        .route(
            "/api/vector/collections/:name/records",
            post(create_record::<S>),
        )
        .route(
            "/api/vector/collections/:name/records/upsert",
            post(upsert_records::<S>),
        )
        .route(
            "/api/vector/collections/:name/records/:pk",
            put(upsert_record::<S>).delete(delete_record::<S>),
        )
        .route("/api/vector/collections/:name/query", post(query_records::<S>))
        .route("/api/vector/collections/:name/search", post(search_records::<S>))
        .route("/healthz", get(healthz))
        .with_state(service)
}

/// Errors returned by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A required identity header is absent or empty.
    #[error("Missing identity header {0}")]
    MissingIdentity(&'static str),
    /// The body is not valid JSON for the endpoint.
    #[error("Invalid request body: {0}")]
    InvalidBody(#[from] JsonRejection),
    /// The record operation failed.
    #[error(transparent)]
    Record(#[from] RecordError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingIdentity(_) => StatusCode::UNAUTHORIZED,
            ApiError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            ApiError::Record(RecordError::InvalidRequest(_) | RecordError::InvalidFilter(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Record(RecordError::CollectionNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Record(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!(error = %message, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %message, "Request rejected");
        }
        let code = status
            .canonical_reason()
            .unwrap_or("Error")
            .to_ascii_uppercase()
            .replace(' ', "_");
        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RequestContext {
            team_id: identity_header(&parts.headers, TEAM_ID_HEADER)?,
            app_id: identity_header(&parts.headers, APP_ID_HEADER)?,
            user_id: identity_header(&parts.headers, USER_ID_HEADER)?,
        })
    }
}

fn identity_header(headers: &HeaderMap, name: &'static str) -> Result<String, ApiError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::MissingIdentity(name))
}

/// Store a text record or ingest a file.
async fn create_record<S>(
    State(service): State<Arc<S>>,
    ctx: RequestContext,
    Path(name): Path<String>,
    payload: Result<Json<CreateRecordRequest>, JsonRejection>,
) -> Result<Json<CreateRecordResponse>, ApiError>
where
    S: RecordApi,
{
    let Json(request) = payload?;
    let response = service.create(&ctx, &name, request).await?;
    Ok(Json(response))
}

/// Embed and upsert a batch of caller-keyed records.
async fn upsert_records<S>(
    State(service): State<Arc<S>>,
    ctx: RequestContext,
    Path(name): Path<String>,
    payload: Result<Json<Vec<BatchRecord>>, JsonRejection>,
) -> Result<Json<UpsertCountResponse>, ApiError>
where
    S: RecordApi,
{
    let Json(records) = payload?;
    let response = service.upsert_batch(&ctx, &name, records).await?;
    Ok(Json(response))
}

async fn query_records<S>(
    State(service): State<Arc<S>>,
    ctx: RequestContext,
    Path(name): Path<String>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError>
where
    S: RecordApi,
{
    let Json(request) = payload?;
    Ok(Json(service.query(&ctx, &name, request).await?))
}

async fn search_records<S>(
    State(service): State<Arc<S>>,
    ctx: RequestContext,
    Path(name): Path<String>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError>
where
    S: RecordApi,
{
    let Json(request) = payload?;
    Ok(Json(service.search(&ctx, &name, request).await?))
}

async fn delete_record<S>(
    State(service): State<Arc<S>>,
    ctx: RequestContext,
    Path((name, pk)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, ApiError>
where
    S: RecordApi,
{
    Ok(Json(service.delete(&ctx, &name, &pk).await?))
}

async fn upsert_record<S>(
    State(service): State<Arc<S>>,
    ctx: RequestContext,
    Path((name, pk)): Path<(String, String)>,
    payload: Result<Json<UpsertRecordRequest>, JsonRejection>,
) -> Result<Json<UpsertCountResponse>, ApiError>
where
    S: RecordApi,
{
    let Json(request) = payload?;
    Ok(Json(service.upsert_one(&ctx, &name, &pk, request).await?))
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qdrant::{ScoredRecord, UpsertSummary};
    use crate::records::{SearchHits, SearchQuery};
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request},
    };
    use serde_json::Map;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Create(RequestContext, String, Option<String>),
        Batch(String, usize),
        Query(String, Option<String>),
        Search(String, Option<SearchQuery>),
        Delete(String, String),
        Upsert(String, String, Option<String>),
    }

    #[derive(Default)]
    struct StubRecords {
        calls: Mutex<Vec<Call>>,
    }

    #[async_trait]
    impl RecordApi for StubRecords {
        async fn create(
            &self,
            ctx: &RequestContext,
            collection: &str,
            request: CreateRecordRequest,
        ) -> Result<CreateRecordResponse, RecordError> {
            if collection == "missing" {
                return Err(RecordError::CollectionNotFound(collection.to_string()));
            }
            if request.text.is_none() && request.file_url.is_none() {
                return Err(RecordError::InvalidRequest("either text or fileURL".into()));
            }
            self.calls.lock().await.push(Call::Create(
                ctx.clone(),
                collection.to_string(),
                request.text,
            ));
            Ok(CreateRecordResponse::Written(UpsertSummary::acknowledged(1)))
        }

        async fn upsert_batch(
            &self,
            _ctx: &RequestContext,
            collection: &str,
            records: Vec<BatchRecord>,
        ) -> Result<UpsertCountResponse, RecordError> {
            let count = records.len();
            self.calls
                .lock()
                .await
                .push(Call::Batch(collection.to_string(), count));
            Ok(UpsertCountResponse {
                upsert_count: count,
            })
        }

        async fn query(
            &self,
            _ctx: &RequestContext,
            collection: &str,
            request: QueryRequest,
        ) -> Result<QueryResponse, RecordError> {
            self.calls
                .lock()
                .await
                .push(Call::Query(collection.to_string(), request.expr));
            Ok(QueryResponse {
                records: Vec::new(),
            })
        }

        async fn search(
            &self,
            _ctx: &RequestContext,
            collection: &str,
            request: SearchRequest,
        ) -> Result<SearchResponse, RecordError> {
            self.calls
                .lock()
                .await
                .push(Call::Search(collection.to_string(), request.q));
            Ok(SearchResponse {
                records: SearchHits::Single(vec![ScoredRecord {
                    pk: "p".into(),
                    score: 0.9,
                    text: Some("hit".into()),
                    metadata: Map::new(),
                }]),
            })
        }

        async fn delete(
            &self,
            _ctx: &RequestContext,
            collection: &str,
            pk: &str,
        ) -> Result<DeleteResponse, RecordError> {
            self.calls
                .lock()
                .await
                .push(Call::Delete(collection.to_string(), pk.to_string()));
            Ok(DeleteResponse { delete_count: 1 })
        }

        async fn upsert_one(
            &self,
            _ctx: &RequestContext,
            collection: &str,
            pk: &str,
            request: UpsertRecordRequest,
        ) -> Result<UpsertCountResponse, RecordError> {
            self.calls.lock().await.push(Call::Upsert(
                collection.to_string(),
                pk.to_string(),
                request.text,
            ));
            Ok(UpsertCountResponse { upsert_count: 1 })
        }
    }

    fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(TEAM_ID_HEADER, "team")
            .header(APP_ID_HEADER, "app")
            .header(USER_ID_HEADER, "user")
            .header("content-type", "application/json");
        let body = body.map_or_else(Body::empty, |value| Body::from(value.to_string()));
        builder.body(body).expect("request")
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, json)
    }

    #[tokio::test]
    async fn create_passes_identity_and_returns_counts() {
        let service = Arc::new(StubRecords::default());
        let app = create_router(service.clone());

        let (status, body) = send(
            app,
            request(
                Method::POST,
                "/api/vector/collections/docs/records",
                Some(json!({ "text": "hello" })),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["upsert_count"], 1);
        assert_eq!(body["err_count"], 0);
        let calls = service.calls.lock().await;
        assert_eq!(
            calls.as_slice(),
            &[Call::Create(
                RequestContext {
                    team_id: "team".into(),
                    app_id: "app".into(),
                    user_id: "user".into(),
                },
                "docs".into(),
                Some("hello".into())
            )]
        );
    }

    #[tokio::test]
    async fn missing_identity_is_unauthorized() {
        let service = Arc::new(StubRecords::default());
        let app = create_router(service.clone());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/vector/collections/docs/query")
            .header(TEAM_ID_HEADER, "team")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .expect("request");

        let (status, body) = send(app, request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "UNAUTHORIZED");
        assert!(body["message"].as_str().unwrap().contains(APP_ID_HEADER));
        assert!(service.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn record_errors_map_to_status_codes() {
        let app = create_router(Arc::new(StubRecords::default()));
        let (status, body) = send(
            app.clone(),
            request(
                Method::POST,
                "/api/vector/collections/docs/records",
                Some(json!({ "metadata": {} })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "BAD_REQUEST");

        let (status, body) = send(
            app,
            request(
                Method::POST,
                "/api/vector/collections/missing/records",
                Some(json!({ "text": "x" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let app = create_router(Arc::new(StubRecords::default()));
        let mut bad = request(Method::POST, "/api/vector/collections/docs/search", None);
        *bad.body_mut() = Body::from("{not json");
        let (status, _) = send(app, bad).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn batch_upsert_accepts_a_list() {
        let service = Arc::new(StubRecords::default());
        let app = create_router(service.clone());
        let (status, body) = send(
            app,
            request(
                Method::POST,
                "/api/vector/collections/docs/records/upsert",
                Some(json!([
                    { "pk": "a", "text": "one", "metadata": {} },
                    { "pk": "b", "text": "two" }
                ])),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "upsert_count": 2 }));
        assert_eq!(
            service.calls.lock().await.as_slice(),
            &[Call::Batch("docs".into(), 2)]
        );
    }

    #[tokio::test]
    async fn query_and_search_routes_forward_bodies() {
        let service = Arc::new(StubRecords::default());
        let app = create_router(service.clone());

        let (status, body) = send(
            app.clone(),
            request(
                Method::POST,
                "/api/vector/collections/docs/query",
                Some(json!({ "expr": "pk == 'a'" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "records": [] }));

        let (status, body) = send(
            app,
            request(
                Method::POST,
                "/api/vector/collections/docs/search",
                Some(json!({ "q": "hello" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["records"][0]["pk"], "p");
        assert_eq!(body["records"][0]["text"], "hit");

        let calls = service.calls.lock().await;
        assert_eq!(calls[0], Call::Query("docs".into(), Some("pk == 'a'".into())));
        assert_eq!(
            calls[1],
            Call::Search("docs".into(), Some(SearchQuery::Single("hello".into())))
        );
    }

    #[tokio::test]
    async fn pk_routes_dispatch_by_method() {
        let service = Arc::new(StubRecords::default());
        let app = create_router(service.clone());

        let (status, body) = send(
            app.clone(),
            request(Method::DELETE, "/api/vector/collections/docs/records/abc", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "delete_count": 1 }));

        let (status, body) = send(
            app,
            request(
                Method::PUT,
                "/api/vector/collections/docs/records/abc",
                Some(json!({ "text": "new" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "upsert_count": 1 }));

        let calls = service.calls.lock().await;
        assert_eq!(calls[0], Call::Delete("docs".into(), "abc".into()));
        assert_eq!(
            calls[1],
            Call::Upsert("docs".into(), "abc".into(), Some("new".into()))
        );
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let app = create_router(Arc::new(StubRecords::default()));
        let request = Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .expect("request");
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
    }
}
