//! Qdrant REST implementation of the vector store interface, with retry
//! logic for transient failures.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{Filter, PointRecord, ScoredPoint, VectorStore, VectorStoreError};

/// Default HTTP request timeout for point operations
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for health probes
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for the Qdrant-backed store
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    /// Base URL, e.g. `http://127.0.0.1:6333`
    pub url: String,
    /// Collection name
    pub collection: String,
    /// Optional `api-key` header value
    pub api_key: Option<String>,
    /// Embedding dimension; names the vector `vs<dim>`
    pub dimension: usize,
}

/// Qdrant REST client scoped to one collection
pub struct QdrantStore {
    config: QdrantConfig,
    client: reqwest::Client,
    vector_name: String,
    backoff: backoff::ExponentialBackoff,
}

impl QdrantStore {
    pub fn new(config: QdrantConfig) -> Result<Self, VectorStoreError> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &config.api_key {
            if let Ok(value) = HeaderValue::from_str(api_key) {
                headers.insert("api-key", value);
            }
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            vector_name: format!("vs{}", config.dimension),
            config,
            client,
            backoff: backoff::ExponentialBackoff {
                max_elapsed_time: Some(Duration::from_secs(30)),
                ..Default::default()
            },
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!(
            "{}/collections/{}{}",
            self.config.url, self.config.collection, suffix
        )
    }

    /// One readiness probe.
    pub async fn health(&self) -> Result<(), VectorStoreError> {
        self.client
            .get(format!("{}/readyz", self.config.url))
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Poll readiness with bounded retries; used as the startup gate.
    pub async fn wait_healthy(
        &self,
        attempts: u32,
        interval: Duration,
    ) -> Result<(), VectorStoreError> {
        for attempt in 1..=attempts {
            match self.health().await {
                Ok(()) => {
                    info!("Vector store healthy after {} attempt(s)", attempt);
                    return Ok(());
                }
                Err(err) => {
                    debug!("Vector store not ready (attempt {}): {}", attempt, err);
                    tokio::time::sleep(interval).await;
                }
            }
        }
        Err(VectorStoreError::NotHealthy(attempts))
    }

    /// Create the collection with the named cosine vector when absent.
    pub async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        let exists = self
            .client
            .get(self.collection_url(""))
            .send()
            .await?
            .status()
            .is_success();
        if exists {
            return Ok(());
        }

        info!(
            "Creating collection {} ({})",
            self.config.collection, self.vector_name
        );
        let mut vectors = serde_json::Map::new();
        vectors.insert(
            self.vector_name.clone(),
            json!({ "size": self.config.dimension, "distance": "Cosine" }),
        );
        self.client
            .put(self.collection_url(""))
            .json(&json!({ "vectors": vectors }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Trigger a collection snapshot. Best-effort at startup.
    pub async fn snapshot(&self) -> Result<String, VectorStoreError> {
        let body: Value = self
            .client
            .post(self.collection_url("/snapshots"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        body["result"]["name"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| VectorStoreError::BadResponse("snapshot name missing".to_string()))
    }

    async fn request_json(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<Value, VectorStoreError> {
        request_with_retry(self.backoff.clone(), || async {
            let response = build().send().await?.error_for_status()?;
            response.json::<Value>().await.map_err(Into::into)
        })
        .await
    }

    fn filter_json(&self, filter: &Filter) -> Value {
        let mut must = Vec::new();
        if !filter.spaces.is_empty() {
            must.push(json!({ "key": "space_id", "match": { "any": filter.spaces } }));
        }
        if let Some(chain_id) = filter.chain_id {
            must.push(json!({ "key": "chain.id", "match": { "value": chain_id.to_string() } }));
        }
        if let Some(step_index) = filter.step_index {
            must.push(json!({ "key": "chain.step_index", "match": { "value": step_index } }));
        }
        let mut out = json!({ "must": must });
        if !filter.exclude_kinds.is_empty() {
            out["must_not"] =
                json!([{ "key": "type", "match": { "any": filter.exclude_kinds } }]);
        }
        out
    }

    fn parse_point(&self, value: &Value) -> Result<PointRecord, VectorStoreError> {
        let id = value["id"]
            .as_str()
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| {
                VectorStoreError::BadResponse(format!("point id missing or not a uuid: {value}"))
            })?;
        Ok(PointRecord {
            id,
            vector: Vec::new(),
            payload: value.get("payload").cloned().unwrap_or(Value::Null),
        })
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(&self, points: Vec<PointRecord>) -> Result<(), VectorStoreError> {
        if points.is_empty() {
            return Ok(());
        }
        let body = json!({
            "points": points
                .iter()
                .map(|p| {
                    let mut vector = serde_json::Map::new();
                    vector.insert(self.vector_name.clone(), json!(p.vector));
                    json!({
                        "id": p.id.to_string(),
                        "vector": vector,
                        "payload": p.payload,
                    })
                })
                .collect::<Vec<_>>()
        });
        self.request_json(|| {
            self.client
                .put(self.collection_url("/points?wait=true"))
                .json(&body)
        })
        .await?;
        Ok(())
    }

    async fn retrieve(&self, ids: &[Uuid]) -> Result<Vec<PointRecord>, VectorStoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({
            "ids": ids.iter().map(Uuid::to_string).collect::<Vec<_>>(),
            "with_payload": true,
        });
        let result = self
            .request_json(|| self.client.post(self.collection_url("/points")).json(&body))
            .await?;
        result["result"]
            .as_array()
            .ok_or_else(|| VectorStoreError::BadResponse("retrieve result not a list".to_string()))?
            .iter()
            .map(|point| self.parse_point(point))
            .collect()
    }

    async fn set_payload(
        &self,
        id: Uuid,
        payload: serde_json::Value,
    ) -> Result<(), VectorStoreError> {
        let body = json!({ "payload": payload, "points": [id.to_string()] });
        self.request_json(|| {
            self.client
                .put(self.collection_url("/points/payload?wait=true"))
                .json(&body)
        })
        .await?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        let body = json!({
            "vector": { "name": &self.vector_name, "vector": vector },
            "limit": limit,
            "with_payload": true,
            "filter": self.filter_json(filter),
        });
        let result = self
            .request_json(|| {
                self.client
                    .post(self.collection_url("/points/search"))
                    .json(&body)
            })
            .await?;
        result["result"]
            .as_array()
            .ok_or_else(|| VectorStoreError::BadResponse("search result not a list".to_string()))?
            .iter()
            .map(|hit| {
                let score = hit["score"].as_f64().unwrap_or(0.0) as f32;
                Ok(ScoredPoint {
                    point: self.parse_point(hit)?,
                    score,
                })
            })
            .collect()
    }

    async fn scroll(
        &self,
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<PointRecord>, VectorStoreError> {
        let body = json!({
            "limit": limit,
            "with_payload": true,
            "filter": self.filter_json(filter),
        });
        let result = self
            .request_json(|| {
                self.client
                    .post(self.collection_url("/points/scroll"))
                    .json(&body)
            })
            .await?;
        result["result"]["points"]
            .as_array()
            .ok_or_else(|| VectorStoreError::BadResponse("scroll result not a list".to_string()))?
            .iter()
            .map(|point| self.parse_point(point))
            .collect()
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<(), VectorStoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = json!({ "points": ids.iter().map(Uuid::to_string).collect::<Vec<_>>() });
        self.request_json(|| {
            self.client
                .post(self.collection_url("/points/delete?wait=true"))
                .json(&body)
        })
        .await?;
        Ok(())
    }

    async fn count(&self) -> Result<u64, VectorStoreError> {
        let result = self
            .request_json(|| self.client.get(self.collection_url("")))
            .await?;
        result["result"]["points_count"]
            .as_u64()
            .ok_or_else(|| VectorStoreError::BadResponse("points_count missing".to_string()))
    }
}

/// Execute a request with retry logic using exponential backoff.
/// Only transport failures, timeouts, and 5xx/429 statuses are retried.
async fn request_with_retry<F, Fut, T>(
    backoff: backoff::ExponentialBackoff,
    operation: F,
) -> Result<T, VectorStoreError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, VectorStoreError>>,
{
    use backoff::{future::retry_notify, Error};

    retry_notify(
        backoff,
        || async {
            match operation().await {
                Ok(result) => Ok(result),
                Err(err) => {
                    if is_retryable_error(&err) {
                        Err(Error::transient(err))
                    } else {
                        Err(Error::permanent(err))
                    }
                }
            }
        },
        |err, duration| {
            warn!("Vector store request failed, retrying in {:?}: {}", duration, err);
        },
    )
    .await
}

fn is_retryable_error(err: &VectorStoreError) -> bool {
    match err {
        VectorStoreError::Http(http_err) => {
            if http_err.is_timeout() || http_err.is_connect() {
                return true;
            }
            match http_err.status() {
                Some(status) => status.is_server_error() || status.as_u16() == 429,
                // Transport-level failure without a status
                None => http_err.is_request(),
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(url: &str) -> QdrantStore {
        QdrantStore::new(QdrantConfig {
            url: url.to_string(),
            collection: "kairos".to_string(),
            api_key: None,
            dimension: 4,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn search_sends_named_vector_and_space_filter() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/kairos/points/search"))
            .and(body_partial_json(serde_json::json!({
                "vector": { "name": "vs4" },
                "filter": { "must": [
                    { "key": "space_id", "match": { "any": ["public"] } }
                ]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": [
                    { "id": "1f0d9c8a-3b58-4f2e-9c41-2f6a0f4f4a11", "score": 0.92,
                      "payload": { "label": "hit" } }
                ]
            })))
            .mount(&server)
            .await;

        let hits = store(&server.uri())
            .search(
                &[0.1, 0.2, 0.3, 0.4],
                5,
                &Filter::in_spaces(&["public".to_string()]),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 0.92).abs() < 1e-6);
        assert_eq!(hits[0].point.payload["label"], "hit");
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let server = MockServer::start().await;
        // First response 503, then success
        Mock::given(method("GET"))
            .and(path("/collections/kairos"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/collections/kairos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": { "points_count": 7 }
            })))
            .mount(&server)
            .await;

        assert_eq!(store(&server.uri()).count().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/kairos/points/scroll"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let err = store(&server.uri())
            .scroll(10, &Filter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::Http(_)));
    }

    #[tokio::test]
    async fn chain_filter_includes_nested_keys() {
        let chain_id = Uuid::new_v4();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/kairos/points/scroll"))
            .and(body_partial_json(serde_json::json!({
                "filter": { "must": [
                    { "key": "space_id", "match": { "any": ["public"] } },
                    { "key": "chain.id", "match": { "value": chain_id.to_string() } },
                    { "key": "chain.step_index", "match": { "value": 2 } }
                ]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": { "points": [] }
            })))
            .mount(&server)
            .await;

        let points = store(&server.uri())
            .scroll(
                10,
                &Filter::chain_step(&["public".to_string()], chain_id, 2),
            )
            .await
            .unwrap();
        assert!(points.is_empty());
    }

    #[tokio::test]
    async fn wait_healthy_gives_up_after_bounded_attempts() {
        // Nothing listening: every probe fails fast with a connect error
        let store = store("http://127.0.0.1:1");
        let err = store
            .wait_healthy(2, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::NotHealthy(2)));
    }
}
