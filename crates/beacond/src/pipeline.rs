use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use beacon_catalog::{group_by_system, known_systems};
use beacon_config::ChecksConfig;
use beacon_core::{CheckResult, CommitFacts, Component, EntityRef, RepoSummary, SonarFacts};
use beacon_facts::{
    COMMIT_FACTS_RETRIEVER, CommitFactCollector, SONAR_FACTS_RETRIEVER, SonarClient,
    SourceControlClient, collect_sonar_facts, evaluate_checks,
};
use beacon_store::{GroupedSummaries, SqliteStore, Store};
use beacon_summary::{
    AiProvider, CommitFactSource, SummaryError, aggregate_commit_bundles, generate_summaries,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

pub const GENERATION_FAILED_MESSAGE: &str = "Failed to generate AI summaries. Please try again.";

/// Everything the daemon orchestrates: the catalog, the injected upstream
/// clients, and the store. Shared behind an `Arc` by the HTTP layer.
pub struct Pipeline {
    pub store: Mutex<SqliteStore>,
    pub catalog: Vec<Component>,
    pub source_control: Option<Arc<dyn SourceControlClient>>,
    pub sonar: Option<Arc<dyn SonarClient>>,
    pub ai: Option<Arc<dyn AiProvider>>,
    pub collect_concurrency: usize,
    pub checks: ChecksConfig,
}

/// Check results for one component, as served by the checks endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentChecks {
    #[serde(rename = "entityRef")]
    pub entity_ref: String,
    pub results: Vec<CheckResult>,
}

impl Pipeline {
    fn lock_store(&self) -> Result<MutexGuard<'_, SqliteStore>> {
        self.store.lock().map_err(|_| anyhow!("store lock poisoned"))
    }

    /// Collect commit and Sonar facts for every catalog component and
    /// persist them. Without a source-control client (missing token) the
    /// commit side is skipped wholesale and zero facts are emitted.
    pub async fn run_collection(&self, now: DateTime<Utc>) -> Result<usize> {
        let collected = match &self.source_control {
            Some(client) => {
                let collector = CommitFactCollector::new(client.clone(), self.collect_concurrency);
                collector.collect_all(&self.catalog, now).await
            }
            None => {
                tracing::warn!(
                    "source-control token not configured, skipping commit fact collection"
                );
                Vec::new()
            }
        };

        let count = collected.len();
        {
            let store = self.lock_store()?;
            for (entity_ref, facts) in &collected {
                let payload = serde_json::to_string(facts).context("serialize commit facts")?;
                store.upsert_facts(
                    COMMIT_FACTS_RETRIEVER,
                    &entity_ref.to_string(),
                    &payload,
                    now.timestamp(),
                )?;
            }
        }
        tracing::info!(components = count, "commit fact collection finished");

        self.collect_sonar_facts(now).await?;

        Ok(count)
    }

    async fn collect_sonar_facts(&self, now: DateTime<Utc>) -> Result<()> {
        let Some(client) = &self.sonar else {
            return Ok(());
        };

        for component in &self.catalog {
            let Some(project_key) = component
                .sonar_project
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
            else {
                continue;
            };
            let entity_ref = component.entity_ref().to_string();

            match collect_sonar_facts(client.as_ref(), project_key).await {
                Ok(facts) => {
                    let payload = serde_json::to_string(&facts).context("serialize sonar facts")?;
                    let store = self.lock_store()?;
                    store.upsert_facts(SONAR_FACTS_RETRIEVER, &entity_ref, &payload, now.timestamp())?;
                }
                Err(err) => {
                    tracing::warn!(
                        entity = %entity_ref,
                        project = %project_key,
                        error = %err,
                        "sonar fact collection failed, skipping component"
                    );
                }
            }
        }

        Ok(())
    }

    /// The full generation pipeline: collect, group, aggregate, generate,
    /// persist. Returns the freshly generated mapping.
    pub async fn run_refresh(&self, now: DateTime<Utc>) -> Result<GroupedSummaries> {
        let provider = self
            .ai
            .clone()
            .ok_or_else(|| anyhow!("Gemini token not configured"))?;

        self.run_collection(now).await?;

        let grouping = group_by_system(&self.catalog);
        let bundles = {
            let source = StoreFactSource { pipeline: self };
            aggregate_commit_bundles(&grouping, &source, now)
        };

        let generated = generate_summaries(&bundles, provider.as_ref()).await;

        let date = now.date_naive();
        {
            let store = self.lock_store()?;
            for (system, summaries) in &generated {
                store
                    .save_summaries(system, date, summaries)
                    .with_context(|| format!("failed to persist summaries for {system}"))?;
            }
        }
        tracing::info!(systems = generated.len(), "refresh pipeline finished");

        Ok(generated)
    }

    /// The dashboard read path: stored summaries for today, regenerating
    /// when the read fails or covers zero repositories. Every catalog
    /// system appears in the result, with an empty list when it has no
    /// summaries.
    pub async fn load_dashboard(&self, now: DateTime<Utc>) -> GroupedSummaries {
        let stored = match self.stored_summaries_for_date(now.date_naive()) {
            Ok(stored) => Some(stored),
            Err(err) => {
                tracing::warn!(error = %err, "failed to read stored summaries");
                None
            }
        };

        let covered_repos = stored
            .as_ref()
            .map(|grouped| grouped.values().map(Vec::len).sum::<usize>())
            .unwrap_or(0);

        if covered_repos == 0 {
            match self.run_refresh(now).await {
                Ok(generated) => return self.merge_known_systems(generated),
                Err(err) => {
                    tracing::warn!(error = %err, "refresh pipeline failed, serving stored data");
                }
            }
        }

        self.merge_known_systems(stored.unwrap_or_default())
    }

    /// Add an empty entry for every catalog system missing from the
    /// mapping, so the dashboard can render "No new releases" rows.
    pub fn merge_known_systems(&self, mut summaries: GroupedSummaries) -> GroupedSummaries {
        for system in known_systems(&self.catalog) {
            summaries.entry(system).or_default();
        }
        summaries
    }

    pub fn stored_summaries_for_date(&self, date: NaiveDate) -> Result<GroupedSummaries> {
        let store = self.lock_store()?;
        Ok(store.summaries_for_date(date)?)
    }

    pub fn save_summaries(
        &self,
        system: &str,
        date: NaiveDate,
        summaries: &[RepoSummary],
    ) -> Result<()> {
        let store = self.lock_store()?;
        Ok(store.save_summaries(system, date, summaries)?)
    }

    pub fn component_checks(&self) -> Result<Vec<ComponentChecks>> {
        let store = self.lock_store()?;
        let mut all = Vec::new();

        for component in &self.catalog {
            if component.sonar_project.is_none() {
                continue;
            }
            let entity_ref = component.entity_ref().to_string();
            let Some(record) = store.get_facts(SONAR_FACTS_RETRIEVER, &entity_ref)? else {
                continue;
            };
            let facts: SonarFacts = match serde_json::from_str(&record.payload) {
                Ok(facts) => facts,
                Err(err) => {
                    tracing::warn!(
                        entity = %entity_ref,
                        error = %err,
                        "malformed sonar fact payload, skipping"
                    );
                    continue;
                }
            };

            all.push(ComponentChecks {
                entity_ref,
                results: evaluate_checks(&facts, &self.checks),
            });
        }

        Ok(all)
    }

    /// Plain-text export of one system's summaries for a date.
    pub fn export_summaries_text(&self, system: &str, date: NaiveDate) -> Result<String> {
        let store = self.lock_store()?;
        let rows = store.summaries_for_system_on_date(system, date)?;

        let mut out = format!("Release notes for {system} on {date}\n");
        for row in &rows {
            out.push_str(&format!("\n## {}\n{}\n", row.repo_name, row.summary));
        }

        Ok(out)
    }
}

/// Adapter exposing the fact store to the aggregator.
struct StoreFactSource<'a> {
    pipeline: &'a Pipeline,
}

impl CommitFactSource for StoreFactSource<'_> {
    fn commit_facts(
        &self,
        entity_ref: &EntityRef,
    ) -> Result<Option<(CommitFacts, i64)>, SummaryError> {
        let store = self
            .pipeline
            .store
            .lock()
            .map_err(|_| SummaryError::FactSource("store lock poisoned".to_owned()))?;

        let Some(record) = store
            .get_facts(COMMIT_FACTS_RETRIEVER, &entity_ref.to_string())
            .map_err(|err| SummaryError::FactSource(err.to_string()))?
        else {
            return Ok(None);
        };

        let facts: CommitFacts = serde_json::from_str(&record.payload)
            .map_err(|err| SummaryError::FactSource(format!("malformed fact payload: {err}")))?;

        Ok(Some((facts, record.collected_at)))
    }
}
