//! HTTP client wrapper for interacting with Qdrant.

use crate::qdrant::{
    VectorStore,
    payload::{
        build_payload, current_timestamp_rfc3339, point_id_for_pk, scored_record_from_payload,
        stored_record_from_payload,
    },
    types::{
        BatchQueryResponse, QdrantError, QueryResponse, RecordInsert, RetrieveResponse,
        ScoredRecord, StoredRecord, UpsertSummary,
    },
};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Map, Value, json};

/// Lightweight HTTP client for Qdrant record operations.
pub struct QdrantService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
}

impl QdrantService {
    /// Construct a new client for the Qdrant instance at `url`.
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("vector-records/0.2").build()?;

        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = %api_key
                .as_deref()
                .map(|value| !value.is_empty())
                .unwrap_or(false),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Insert or replace records, keyed by the UUID derived from each primary key.
    pub async fn upsert_records(
        &self,
        collection_name: &str,
        records: Vec<RecordInsert>,
    ) -> Result<UpsertSummary, QdrantError> {
        if records.is_empty() {
            return Ok(UpsertSummary::default());
        }

        let now = current_timestamp_rfc3339();
        let points: Vec<Value> = records
            .into_iter()
            .map(|record| {
                json!({
                    "id": point_id_for_pk(&record.pk),
                    "vector": record.vector,
                    "payload": build_payload(&record.pk, &record.text, &record.metadata, &now),
                })
            })
            .collect();

        let point_count = points.len();
        let response = self
            .request(Method::PUT, &format!("collections/{collection_name}/points"))?
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(
                collection = collection_name,
                points = point_count,
                "Records upserted"
            );
        })
        .await?;

        Ok(UpsertSummary::acknowledged(point_count))
    }

    /// Delete the record with primary key `pk`, returning how many points existed beforehand.
    pub async fn delete_record(&self, collection_name: &str, pk: &str) -> Result<usize, QdrantError> {
        let point_id = point_id_for_pk(pk);
        let response = self
            .request(Method::POST, &format!("collections/{collection_name}/points"))?
            .json(&json!({
                "ids": [point_id],
                "with_payload": false,
                "with_vector": false,
            }))
            .send()
            .await?;
        let response = self.ensure_ok(response, collection_name).await?;
        let RetrieveResponse { result } = response.json().await?;
        let existing = result.len();

        if existing == 0 {
            tracing::debug!(collection = collection_name, pk, "Record not present; nothing to delete");
            return Ok(0);
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/delete"),
            )?
            .query(&[("wait", true)])
            .json(&json!({ "points": [point_id] }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, pk, "Record deleted");
        })
        .await?;

        Ok(existing)
    }

    /// Page through records matching an optional filter, without any vector.
    pub async fn query_records(
        &self,
        collection_name: &str,
        filter: Option<Value>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, QdrantError> {
        let mut body = Map::new();
        body.insert("limit".into(), Value::from(limit));
        body.insert("offset".into(), Value::from(offset));
        body.insert("with_payload".into(), Value::Bool(true));
        if let Some(filter_value) = filter {
            body.insert("filter".into(), filter_value);
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/query"),
            )?
            .json(&Value::Object(body))
            .send()
            .await?;
        let response = self.ensure_ok(response, collection_name).await?;

        let payload: QueryResponse = response.json().await?;
        Ok(payload
            .result
            .into_points()
            .into_iter()
            .map(|point| stored_record_from_payload(point.id, point.payload))
            .collect())
    }

    /// Similarity search; returns one hit list per query vector, in order.
    pub async fn search_records(
        &self,
        collection_name: &str,
        vectors: Vec<Vec<f32>>,
        filter: Option<Value>,
        limit: usize,
    ) -> Result<Vec<Vec<ScoredRecord>>, QdrantError> {
        let mut searches: Vec<Value> = vectors
            .into_iter()
            .map(|vector| search_body(vector, filter.clone(), limit))
            .collect();

        let results = match searches.len() {
            0 => return Ok(Vec::new()),
            1 => {
                let body = searches.remove(0);
                let response = self
                    .request(
                        Method::POST,
                        &format!("collections/{collection_name}/points/query"),
                    )?
                    .json(&body)
                    .send()
                    .await?;
                let response = self.ensure_ok(response, collection_name).await?;
                let payload: QueryResponse = response.json().await?;
                vec![payload.result]
            }
            _ => {
                let response = self
                    .request(
                        Method::POST,
                        &format!("collections/{collection_name}/points/query/batch"),
                    )?
                    .json(&json!({ "searches": searches }))
                    .send()
                    .await?;
                let response = self.ensure_ok(response, collection_name).await?;
                let payload: BatchQueryResponse = response.json().await?;
                payload.result
            }
        };

        Ok(results
            .into_iter()
            .map(|result| {
                result
                    .into_points()
                    .into_iter()
                    .map(|point| scored_record_from_payload(point.id, point.score, point.payload))
                    .collect()
            })
            .collect())
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder, QdrantError> {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        Ok(req)
    }

    async fn ensure_ok(
        &self,
        response: reqwest::Response,
        collection_name: &str,
    ) -> Result<reqwest::Response, QdrantError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let error = QdrantError::UnexpectedStatus { status, body };
        tracing::error!(collection = collection_name, error = %error, "Qdrant request failed");
        Err(error)
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

#[async_trait]
impl VectorStore for QdrantService {
    async fn upsert_records(
        &self,
        collection: &str,
        records: Vec<RecordInsert>,
    ) -> Result<UpsertSummary, QdrantError> {
        QdrantService::upsert_records(self, collection, records).await
    }

    async fn delete_record(&self, collection: &str, pk: &str) -> Result<usize, QdrantError> {
        QdrantService::delete_record(self, collection, pk).await
    }

    async fn query_records(
        &self,
        collection: &str,
        filter: Option<Value>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, QdrantError> {
        QdrantService::query_records(self, collection, filter, offset, limit).await
    }

    async fn search_records(
        &self,
        collection: &str,
        vectors: Vec<Vec<f32>>,
        filter: Option<Value>,
        limit: usize,
    ) -> Result<Vec<Vec<ScoredRecord>>, QdrantError> {
        QdrantService::search_records(self, collection, vectors, filter, limit).await
    }
}

fn search_body(vector: Vec<f32>, filter: Option<Value>, limit: usize) -> Value {
    let mut body = Map::new();
    body.insert("query".into(), json!(vector));
    body.insert("limit".into(), Value::from(limit));
    body.insert("with_payload".into(), Value::Bool(true));
    if let Some(filter_value) = filter {
        body.insert("filter".into(), filter_value);
    }
    Value::Object(body)
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{POST, PUT},
        MockServer,
    };

    fn service_for(server: &MockServer) -> QdrantService {
        QdrantService {
            client: Client::builder()
                .user_agent("vector-records-test")
                .build()
                .expect("client"),
            base_url: server.base_url(),
            api_key: Some("key".into()),
        }
    }

    #[tokio::test]
    async fn upsert_records_writes_points_keyed_by_pk_uuid() {
        let server = MockServer::start_async().await;
        let expected_id = point_id_for_pk("pk-1");

        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/app_docs/points")
                    .query_param("wait", "true")
                    .header("api-key", "key")
                    .body_contains(expected_id.as_str())
                    .body_contains("\"pk\":\"pk-1\"");
                then.status(200)
                    .json_body(json!({ "status": "ok", "result": { "status": "completed" } }));
            })
            .await;

        let summary = service_for(&server)
            .upsert_records(
                "app_docs",
                vec![RecordInsert {
                    pk: "pk-1".into(),
                    text: "hello".into(),
                    vector: vec![0.1, 0.2],
                    metadata: Map::new(),
                }],
            )
            .await
            .expect("upsert");

        mock.assert_async().await;
        assert_eq!(summary, UpsertSummary::acknowledged(1));
    }

    #[tokio::test]
    async fn delete_record_skips_delete_when_absent() {
        let server = MockServer::start_async().await;
        let retrieve = server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/app_docs/points");
                then.status(200).json_body(json!({ "status": "ok", "result": [] }));
            })
            .await;
        let delete = server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/app_docs/points/delete");
                then.status(200).json_body(json!({ "status": "ok" }));
            })
            .await;

        let count = service_for(&server)
            .delete_record("app_docs", "missing")
            .await
            .expect("delete");

        assert_eq!(count, 0);
        retrieve.assert_async().await;
        assert_eq!(delete.hits_async().await, 0);
    }

    #[tokio::test]
    async fn delete_record_reports_existing_count() {
        let server = MockServer::start_async().await;
        let id = point_id_for_pk("pk-1");
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/app_docs/points");
                then.status(200)
                    .json_body(json!({ "status": "ok", "result": [ { "id": id } ] }));
            })
            .await;
        let delete = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/app_docs/points/delete")
                    .query_param("wait", "true");
                then.status(200).json_body(json!({ "status": "ok" }));
            })
            .await;

        let count = service_for(&server)
            .delete_record("app_docs", "pk-1")
            .await
            .expect("delete");

        assert_eq!(count, 1);
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn query_records_sends_filter_and_paging() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/app_docs/points/query")
                    .json_body(json!({
                        "limit": 5,
                        "offset": 10,
                        "with_payload": true,
                        "filter": { "must": [ { "key": "metadata.lang", "match": { "value": "en" } } ] }
                    }));
                then.status(200).json_body(json!({
                    "status": "ok",
                    "result": {
                        "points": [
                            {
                                "id": "00000000-0000-0000-0000-000000000001",
                                "payload": {
                                    "pk": "doc-1",
                                    "text": "Example",
                                    "metadata": { "lang": "en" }
                                }
                            }
                        ]
                    }
                }));
            })
            .await;

        let filter = json!({ "must": [ { "key": "metadata.lang", "match": { "value": "en" } } ] });
        let records = service_for(&server)
            .query_records("app_docs", Some(filter), 10, 5)
            .await
            .expect("query");

        mock.assert_async().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pk, "doc-1");
        assert_eq!(records[0].text.as_deref(), Some("Example"));
        assert_eq!(records[0].metadata["lang"], "en");
    }

    #[tokio::test]
    async fn search_records_uses_batch_endpoint_for_multiple_vectors() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/app_docs/points/query/batch");
                then.status(200).json_body(json!({
                    "status": "ok",
                    "result": [
                        { "points": [ { "id": 1, "score": 0.9, "payload": { "pk": "a" } } ] },
                        { "points": [] }
                    ]
                }));
            })
            .await;

        let results = service_for(&server)
            .search_records("app_docs", vec![vec![0.1], vec![0.2]], None, 3)
            .await
            .expect("search");

        mock.assert_async().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0][0].pk, "a");
        assert!((results[0][0].score - 0.9).abs() < f32::EPSILON);
        assert!(results[1].is_empty());
    }

    #[tokio::test]
    async fn unexpected_status_is_surfaced() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/app_docs/points/query");
                then.status(404).body("Collection not found");
            })
            .await;

        let error = service_for(&server)
            .search_records("app_docs", vec![vec![0.1]], None, 3)
            .await
            .unwrap_err();

        match error {
            QdrantError::UnexpectedStatus { status, body } => {
                assert_eq!(status.as_u16(), 404);
                assert_eq!(body, "Collection not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
