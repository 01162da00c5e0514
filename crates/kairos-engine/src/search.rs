//! The `search` operation: ranked chain heads behind a short-lived response
//! cache.

use std::time::Instant;
use tracing::{debug, warn};

use kairos_kv::{get_json, set_json};
use kairos_types::error::Operation;
use kairos_types::{
    memory_uri, Choice, ChoiceRole, ResponseMetadata, SearchResponse, CREATE_PROTOCOL_UUID,
    REFINE_PROTOCOL_UUID,
};

use crate::engine::ExecutionEngine;
use crate::EngineError;

impl ExecutionEngine {
    /// Rank stored protocols against a query and present them as choices.
    pub async fn search(
        &self,
        query: &str,
        space: Option<&str>,
    ) -> Result<SearchResponse, EngineError> {
        let started = Instant::now();
        if query.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "query must be a non-empty string".to_string(),
            ));
        }

        let normalized = query.trim().to_lowercase();
        let spaces = self.allowed_spaces(space);
        let collapse = self.config.collapse_enabled;
        let cache_key = format!("search:{}:{}:{}", collapse, spaces.join("+"), normalized);

        // Cache failures never fail the search
        match get_json::<SearchResponse>(self.kv.as_ref(), &cache_key).await {
            Ok(Some(mut cached)) => {
                debug!("Search cache hit for '{normalized}'");
                cached.metadata = Some(ResponseMetadata {
                    duration_ms: started.elapsed().as_millis() as u64,
                    cached: Some(true),
                });
                return Ok(cached);
            }
            Ok(None) => {}
            Err(err) => warn!("Search cache read failed: {err}"),
        }

        let hits = self
            .memory
            .search(&normalized, self.config.max_matches, &spaces, collapse)
            .await
            .map_err(|err| EngineError::backend(Operation::Search, err))?;

        let mut choices: Vec<Choice> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.config.score_threshold)
            .take(self.config.max_matches)
            .map(|hit| {
                let uri = memory_uri(&hit.step.uuid);
                Choice {
                    next_action: format!("call kairos_begin with {uri} to execute this protocol"),
                    uri,
                    label: hit.step.label.clone(),
                    chain_label: hit.step.chain.as_ref().map(|chain| chain.label.clone()),
                    score: Some(f64::from(hit.score.clamp(0.0, 1.0))),
                    role: ChoiceRole::Match,
                    tags: hit.step.tags.clone(),
                }
            })
            .collect();

        let matches = choices.len();
        // With exactly one confident match the agent is railroaded into it;
        // otherwise it may also refine or start from scratch
        if matches != 1 {
            choices.push(refine_choice());
            choices.push(create_choice());
        }

        let message = if matches == 0 {
            format!("No stored protocol matched '{normalized}'.")
        } else {
            format!("Found {matches} protocol(s) for '{normalized}'.")
        };

        let response = SearchResponse {
            must_obey: true,
            message,
            next_action: "Pick one choice and follow that choice's next_action.".to_string(),
            choices,
            metadata: None,
        };

        if let Err(err) = set_json(
            self.kv.as_ref(),
            &cache_key,
            &response,
            Some(self.config.search_cache_ttl),
        )
        .await
        {
            warn!("Search cache write failed: {err}");
        }

        let mut out = response;
        out.metadata = Some(ResponseMetadata {
            duration_ms: started.elapsed().as_millis() as u64,
            cached: Some(false),
        });
        Ok(out)
    }
}

fn refine_choice() -> Choice {
    let uri = memory_uri(&REFINE_PROTOCOL_UUID);
    Choice {
        next_action: format!("call kairos_begin with {uri} to refine your search"),
        uri,
        label: "Refine this search".to_string(),
        chain_label: None,
        score: None,
        role: ChoiceRole::Refine,
        tags: Vec::new(),
    }
}

fn create_choice() -> Choice {
    let uri = memory_uri(&CREATE_PROTOCOL_UUID);
    Choice {
        next_action: format!("call kairos_begin with {uri} to create a new protocol"),
        uri,
        label: "Create a new protocol".to_string(),
        chain_label: None,
        score: None,
        role: ChoiceRole::Create,
        tags: Vec::new(),
    }
}
