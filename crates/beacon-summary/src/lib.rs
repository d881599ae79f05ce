use std::collections::BTreeMap;

use beacon_core::{CommitBundle, CommitFacts, EntityRef, SystemName, timestamp_on_utc_date};
use chrono::{DateTime, Utc};
use thiserror::Error;

mod generate;
mod provider;

pub use generate::{NO_SUMMARY_FALLBACK, build_release_notes_prompt, generate_summaries};
pub use provider::{
    AiProvider, GEMINI_API_BASE, GEMINI_DEFAULT_MODEL, GeminiProvider, LoadedAiProvider,
    MockProvider, extract_text_part, load_ai_provider,
};

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("missing Gemini API key in {0}")]
    MissingApiKey(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
    #[error("fact source failed: {0}")]
    FactSource(String),
}

/// Per-component source of previously collected commit facts and the time
/// they were collected at (unix seconds).
pub trait CommitFactSource {
    fn commit_facts(
        &self,
        entity_ref: &EntityRef,
    ) -> Result<Option<(CommitFacts, i64)>, SummaryError>;
}

/// Combine stored commit facts into per-system, per-repository bundles.
///
/// A component contributes only when its fact exists, carries non-empty
/// commit text, and was collected on the current UTC calendar day. A fact
/// source failure for one component skips that component and keeps the run
/// alive. Systems that end up with zero bundles are omitted.
pub fn aggregate_commit_bundles(
    grouping: &BTreeMap<SystemName, Vec<EntityRef>>,
    source: &dyn CommitFactSource,
    now: DateTime<Utc>,
) -> BTreeMap<SystemName, Vec<CommitBundle>> {
    let today = now.date_naive();
    let mut bundles = BTreeMap::new();

    for (system, members) in grouping {
        let mut repos = Vec::new();

        for entity_ref in members {
            let facts = match source.commit_facts(entity_ref) {
                Ok(Some((facts, collected_at))) => {
                    if !timestamp_on_utc_date(collected_at, today) {
                        tracing::debug!(entity = %entity_ref, "skipping stale commit facts");
                        continue;
                    }
                    facts
                }
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(
                        entity = %entity_ref,
                        error = %err,
                        "fact lookup failed, skipping component"
                    );
                    continue;
                }
            };

            if facts.recent_commit_messages.trim().is_empty() {
                continue;
            }

            repos.push(CommitBundle {
                repo_name: facts.repo_name,
                commit_messages: facts.recent_commit_messages,
            });
        }

        if !repos.is_empty() {
            bundles.insert(system.clone(), repos);
        }
    }

    bundles
}
