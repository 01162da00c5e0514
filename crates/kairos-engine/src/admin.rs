//! The `mint`, `update`, and `delete` administration operations.

use std::time::Instant;
use tracing::info;

use kairos_chain_builder::parse_document;
use kairos_memory::{MemoryError, UpdateSpec};
use kairos_types::error::Operation;
use kairos_types::uri::is_sentinel;
use kairos_types::{
    memory_uri, parse_memory_uri, BatchItemResult, DeleteResponse, MintItem, MintResponse,
    Step, UpdateResponse,
};

use crate::engine::{metadata, ExecutionEngine};
use crate::EngineError;

fn mint_item(step: &Step) -> MintItem {
    MintItem {
        uri: memory_uri(&step.uuid),
        memory_uuid: step.uuid,
        label: step.label.clone(),
        tags: step.tags.clone(),
    }
}

impl ExecutionEngine {
    /// Parse a markdown document and store its chains.
    pub async fn mint(
        &self,
        markdown: &str,
        author: &str,
        force_update: bool,
        space: Option<&str>,
    ) -> Result<MintResponse, EngineError> {
        let started = Instant::now();
        if markdown.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "markdown_doc must be a non-empty string".to_string(),
            ));
        }
        let docs = parse_document(markdown);
        if docs.is_empty() {
            return Err(EngineError::InvalidInput(
                "document contains no storable steps".to_string(),
            ));
        }

        let space = space.unwrap_or(&self.config.default_space).to_string();
        let mut items = Vec::new();
        for doc in &docs {
            let steps = self
                .memory
                .store_chain(doc, author, &space, force_update)
                .await
                .map_err(|err| match err {
                    MemoryError::DuplicateChain {
                        label, existing, ..
                    } => EngineError::DuplicateChain {
                        label,
                        items: existing.iter().map(mint_item).collect(),
                    },
                    other => EngineError::backend(Operation::Store, other),
                })?;
            items.extend(steps.iter().map(mint_item));
        }
        info!(
            "Minted {} chain(s), {} step(s) into space {}",
            docs.len(),
            items.len(),
            space
        );

        Ok(MintResponse {
            status: "stored".to_string(),
            items,
            metadata: Some(metadata(started)),
        })
    }

    /// Apply per-uri updates: replacement markdown bodies or verbatim field
    /// replacements.
    pub async fn update(
        &self,
        uris: &[String],
        markdown_docs: Option<&[String]>,
        fields: Option<&serde_json::Map<String, serde_json::Value>>,
        space: Option<&str>,
    ) -> Result<UpdateResponse, EngineError> {
        let started = Instant::now();
        if uris.is_empty() {
            return Err(EngineError::InvalidInput(
                "uris must be a non-empty list".to_string(),
            ));
        }
        if markdown_docs.is_none() && fields.is_none() {
            return Err(EngineError::InvalidInput(
                "either markdown_doc or updates is required".to_string(),
            ));
        }
        if let Some(docs) = markdown_docs {
            if docs.len() != uris.len() {
                return Err(EngineError::InvalidInput(
                    "markdown_doc must have one entry per uri".to_string(),
                ));
            }
        }

        let spaces = self.allowed_spaces(space);
        let mut results = Vec::with_capacity(uris.len());
        let mut total_updated = 0;
        let mut total_failed = 0;

        for (index, uri) in uris.iter().enumerate() {
            let outcome = self
                .update_one(uri, index, markdown_docs, fields, &spaces)
                .await;
            match outcome {
                Ok(()) => {
                    total_updated += 1;
                    results.push(BatchItemResult {
                        uri: uri.clone(),
                        status: "updated".to_string(),
                        message: "ok".to_string(),
                    });
                }
                Err(message) => {
                    total_failed += 1;
                    results.push(BatchItemResult {
                        uri: uri.clone(),
                        status: "failed".to_string(),
                        message,
                    });
                }
            }
        }

        Ok(UpdateResponse {
            results,
            total_updated,
            total_failed,
            metadata: Some(metadata(started)),
        })
    }

    async fn update_one(
        &self,
        uri: &str,
        index: usize,
        markdown_docs: Option<&[String]>,
        fields: Option<&serde_json::Map<String, serde_json::Value>>,
        spaces: &[String],
    ) -> Result<(), String> {
        let uuid = parse_memory_uri(uri).map_err(|err| err.to_string())?;
        let spec = match markdown_docs {
            Some(docs) => UpdateSpec::Text(docs[index].clone()),
            None => UpdateSpec::Fields(fields.cloned().unwrap_or_default()),
        };
        match self.memory.update(uuid, spec, spaces).await {
            Ok(_) => Ok(()),
            Err(MemoryError::NotFound(_)) => Err("no step found for this uri".to_string()),
            Err(other) => Err(other.to_string()),
        }
    }

    /// Delete steps by uri. System protocols are not deletable.
    pub async fn delete(
        &self,
        uris: &[String],
        space: Option<&str>,
    ) -> Result<DeleteResponse, EngineError> {
        let started = Instant::now();
        if uris.is_empty() {
            return Err(EngineError::InvalidInput(
                "uris must be a non-empty list".to_string(),
            ));
        }

        let spaces = self.allowed_spaces(space);
        let mut results = Vec::with_capacity(uris.len());
        let mut total_deleted = 0;
        let mut total_failed = 0;

        for uri in uris {
            match self.delete_one(uri, &spaces).await {
                Ok(()) => {
                    total_deleted += 1;
                    results.push(BatchItemResult {
                        uri: uri.clone(),
                        status: "deleted".to_string(),
                        message: "ok".to_string(),
                    });
                }
                Err(message) => {
                    total_failed += 1;
                    results.push(BatchItemResult {
                        uri: uri.clone(),
                        status: "failed".to_string(),
                        message,
                    });
                }
            }
        }

        Ok(DeleteResponse {
            results,
            total_deleted,
            total_failed,
            metadata: Some(metadata(started)),
        })
    }

    async fn delete_one(&self, uri: &str, spaces: &[String]) -> Result<(), String> {
        let uuid = parse_memory_uri(uri).map_err(|err| err.to_string())?;
        if is_sentinel(&uuid) {
            return Err("system protocols cannot be deleted".to_string());
        }
        let step = self
            .memory
            .get(uuid, spaces)
            .await
            .map_err(|err| err.to_string())?
            .ok_or_else(|| "no step found for this uri".to_string())?;
        if step.is_system() {
            return Err("system protocols cannot be deleted".to_string());
        }
        self.memory.delete(uuid).await.map_err(|err| err.to_string())
    }
}
