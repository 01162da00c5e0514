//! In-memory vector store for tests and single-process deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::{Filter, PointRecord, ScoredPoint, VectorStore, VectorStoreError};

/// A process-local store implementing the same contract as the Qdrant
/// adapter, including cosine scoring and payload filters.
#[derive(Default)]
pub struct MemoryVectorStore {
    points: Mutex<HashMap<Uuid, PointRecord>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_filter(payload: &serde_json::Value, filter: &Filter) -> bool {
    if !filter.spaces.is_empty() {
        let space = payload["space_id"].as_str().unwrap_or("");
        if !filter.spaces.iter().any(|s| s == space) {
            return false;
        }
    }
    if let Some(chain_id) = filter.chain_id {
        if payload["chain"]["id"].as_str() != Some(chain_id.to_string().as_str()) {
            return false;
        }
    }
    if let Some(step_index) = filter.step_index {
        if payload["chain"]["step_index"].as_u64() != Some(step_index as u64) {
            return false;
        }
    }
    if !filter.exclude_kinds.is_empty() {
        if let Some(kind) = payload["type"].as_str() {
            if filter.exclude_kinds.iter().any(|k| k == kind) {
                return false;
            }
        }
    }
    true
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, points: Vec<PointRecord>) -> Result<(), VectorStoreError> {
        let mut guard = self.points.lock().expect("poisoned");
        for point in points {
            guard.insert(point.id, point);
        }
        Ok(())
    }

    async fn retrieve(&self, ids: &[Uuid]) -> Result<Vec<PointRecord>, VectorStoreError> {
        let guard = self.points.lock().expect("poisoned");
        Ok(ids.iter().filter_map(|id| guard.get(id).cloned()).collect())
    }

    async fn set_payload(
        &self,
        id: Uuid,
        payload: serde_json::Value,
    ) -> Result<(), VectorStoreError> {
        let mut guard = self.points.lock().expect("poisoned");
        if let Some(point) = guard.get_mut(&id) {
            point.payload = payload;
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        let guard = self.points.lock().expect("poisoned");
        let mut hits: Vec<ScoredPoint> = guard
            .values()
            .filter(|p| matches_filter(&p.payload, filter))
            .map(|p| ScoredPoint {
                score: cosine(vector, &p.vector),
                point: p.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.point.id.cmp(&b.point.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scroll(
        &self,
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<PointRecord>, VectorStoreError> {
        let guard = self.points.lock().expect("poisoned");
        let mut points: Vec<PointRecord> = guard
            .values()
            .filter(|p| matches_filter(&p.payload, filter))
            .cloned()
            .collect();
        points.sort_by_key(|p| p.id);
        points.truncate(limit);
        Ok(points)
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<(), VectorStoreError> {
        let mut guard = self.points.lock().expect("poisoned");
        for id in ids {
            guard.remove(id);
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64, VectorStoreError> {
        Ok(self.points.lock().expect("poisoned").len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(id: Uuid, vector: Vec<f32>, payload: serde_json::Value) -> PointRecord {
        PointRecord {
            id,
            vector,
            payload,
        }
    }

    #[tokio::test]
    async fn search_ranks_by_cosine() {
        let store = MemoryVectorStore::new();
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        store
            .upsert(vec![
                point(near, vec![1.0, 0.0], json!({ "space_id": "public" })),
                point(far, vec![0.0, 1.0], json!({ "space_id": "public" })),
            ])
            .await
            .unwrap();

        let hits = store
            .search(
                &[1.0, 0.1],
                10,
                &Filter::in_spaces(&["public".to_string()]),
            )
            .await
            .unwrap();
        assert_eq!(hits[0].point.id, near);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn space_filter_hides_foreign_points() {
        let store = MemoryVectorStore::new();
        store
            .upsert(vec![
                point(Uuid::new_v4(), vec![1.0], json!({ "space_id": "tenant-a" })),
                point(Uuid::new_v4(), vec![1.0], json!({ "space_id": "public" })),
            ])
            .await
            .unwrap();

        let hits = store
            .search(&[1.0], 10, &Filter::in_spaces(&["public".to_string()]))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].point.payload["space_id"], "public");
    }

    #[tokio::test]
    async fn chain_step_filter_selects_one_point() {
        let store = MemoryVectorStore::new();
        let chain_id = Uuid::new_v4();
        let spaces = vec!["public".to_string()];
        for index in 1..=3u32 {
            store
                .upsert(vec![point(
                    Uuid::new_v4(),
                    vec![1.0],
                    json!({
                        "space_id": "public",
                        "chain": { "id": chain_id.to_string(), "step_index": index }
                    }),
                )])
                .await
                .unwrap();
        }

        let points = store
            .scroll(10, &Filter::chain_step(&spaces, chain_id, 2))
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].payload["chain"]["step_index"], 2);
    }

    #[tokio::test]
    async fn excluded_kinds_are_hidden() {
        let store = MemoryVectorStore::new();
        store
            .upsert(vec![point(
                Uuid::new_v4(),
                vec![1.0],
                json!({ "space_id": "public", "type": "system" }),
            )])
            .await
            .unwrap();

        let mut filter = Filter::in_spaces(&["public".to_string()]);
        filter.exclude_kinds = vec!["system".to_string()];
        assert!(store.search(&[1.0], 10, &filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_by_same_id_replaces() {
        let store = MemoryVectorStore::new();
        let id = Uuid::new_v4();
        store
            .upsert(vec![point(id, vec![1.0], json!({ "label": "old" }))])
            .await
            .unwrap();
        store
            .upsert(vec![point(id, vec![1.0], json!({ "label": "new" }))])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        let got = store.retrieve(&[id]).await.unwrap();
        assert_eq!(got[0].payload["label"], "new");
    }
}
