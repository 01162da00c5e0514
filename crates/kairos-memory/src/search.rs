//! Quality-boosted ranking over vector search with a keyword fallback.

use tracing::warn;
use uuid::Uuid;

use kairos_types::Step;
use kairos_vector_client::Filter;

use crate::store::MemoryStore;
use crate::MemoryError;

/// Hard cap on vector search candidates.
const MAX_CANDIDATES: usize = 200;

/// Scroll budget for the keyword fallback.
const KEYWORD_SCROLL_LIMIT: usize = 500;

/// Neutral score assigned to keyword-fallback hits.
const KEYWORD_SCORE: f32 = 0.5;

/// Bounded boost applied per unit of step quality.
const QUALITY_BOOST: f32 = 0.1;

/// One ranked search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub step: Step,
    pub score: f32,
}

impl MemoryStore {
    /// Rank steps against a query.
    ///
    /// Vector similarity is blended with a bounded quality boost; when the
    /// vector side comes up short a substring scan fills the remainder at a
    /// neutral score. System-seeded steps never rank.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        spaces: &[String],
        collapse_to_heads: bool,
    ) -> Result<Vec<SearchHit>, MemoryError> {
        let mut filter = Filter::in_spaces(spaces);
        filter.exclude_kinds = vec!["system".to_string()];

        let candidates = (limit * 3).min(MAX_CANDIDATES);
        let mut hits = match self.embedder().embed(query).await {
            Ok(vector) => {
                let scored = self.vector().search(&vector, candidates, &filter).await?;
                let mut hits = Vec::with_capacity(scored.len());
                for scored_point in &scored {
                    let step = MemoryStore::step_from_point(&scored_point.point)?;
                    let quality = step
                        .quality_metadata
                        .step_quality_score
                        .clamp(0.0, 1.0) as f32;
                    hits.push(SearchHit {
                        score: scored_point.score * (1.0 + QUALITY_BOOST * quality),
                        step,
                    });
                }
                hits.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.step.uuid.cmp(&b.step.uuid))
                });
                hits
            }
            Err(err) => {
                warn!("Query embedding failed, falling back to keywords: {err}");
                Vec::new()
            }
        };

        if hits.len() < limit {
            self.keyword_fallback(query, limit, &filter, &mut hits)
                .await?;
        }
        hits.truncate(limit);

        if collapse_to_heads {
            hits = collapse(hits);
        }
        Ok(hits)
    }

    /// Case-insensitive substring scan over label and text, merged after
    /// the vector hits and deduplicated by uuid.
    async fn keyword_fallback(
        &self,
        query: &str,
        limit: usize,
        filter: &Filter,
        hits: &mut Vec<SearchHit>,
    ) -> Result<(), MemoryError> {
        let needle = query.to_lowercase();
        let points = self.vector().scroll(KEYWORD_SCROLL_LIMIT, filter).await?;
        for point in &points {
            if hits.len() >= limit {
                break;
            }
            let step = MemoryStore::step_from_point(point)?;
            if hits.iter().any(|hit| hit.step.uuid == step.uuid) {
                continue;
            }
            let matched = step.label.to_lowercase().contains(&needle)
                || step.text.to_lowercase().contains(&needle);
            if matched {
                hits.push(SearchHit {
                    step,
                    score: KEYWORD_SCORE,
                });
            }
        }
        Ok(())
    }
}

/// Fold hits to one representative per chain, preferring the head step,
/// then the higher score. Position of the first occurrence is kept.
fn collapse(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut out: Vec<SearchHit> = Vec::new();
    let mut slot_by_chain: std::collections::HashMap<Uuid, usize> =
        std::collections::HashMap::new();

    for hit in hits {
        let Some(chain) = &hit.step.chain else {
            out.push(hit);
            continue;
        };
        match slot_by_chain.get(&chain.id) {
            None => {
                slot_by_chain.insert(chain.id, out.len());
                out.push(hit);
            }
            Some(&slot) => {
                if prefer(&hit, &out[slot]) {
                    out[slot] = hit;
                }
            }
        }
    }
    out
}

fn prefer(candidate: &SearchHit, incumbent: &SearchHit) -> bool {
    let candidate_head = candidate.step.chain.as_ref().is_some_and(|c| c.is_head());
    let incumbent_head = incumbent.step.chain.as_ref().is_some_and(|c| c.is_head());
    match (candidate_head, incumbent_head) {
        (true, false) => true,
        (false, true) => false,
        _ => candidate.score > incumbent.score,
    }
}
