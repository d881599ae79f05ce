use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use beacon_config::ChecksConfig;
use beacon_core::{Component, ComponentKind};
use beacon_facts::{
    CommitDetail, FactsError, PullRequest, PullRequestCommit, SONAR_FACTS_RETRIEVER,
    SourceControlClient,
};
use beacon_store::{SqliteStore, Store};
use beacon_summary::{AiProvider, MockProvider};
use beacond::pipeline::Pipeline;
use chrono::{Duration, Utc};
use tempfile::tempdir;

struct CannedGithub;

#[async_trait]
impl SourceControlClient for CannedGithub {
    async fn list_closed_pull_requests(
        &self,
        _repo_slug: &str,
        _limit: usize,
    ) -> Result<Vec<PullRequest>, FactsError> {
        Ok(vec![
            PullRequest {
                number: 7,
                title: "Add new feature".to_owned(),
                merged_at: Some(Utc::now() - Duration::hours(2)),
            },
            PullRequest {
                number: 8,
                title: "Bump serde from 1.0 to 1.1".to_owned(),
                merged_at: Some(Utc::now() - Duration::hours(1)),
            },
        ])
    }

    async fn list_pull_request_commits(
        &self,
        _repo_slug: &str,
        number: u64,
    ) -> Result<Vec<PullRequestCommit>, FactsError> {
        let messages: &[&str] = match number {
            7 => &["Initial commit\nMore detail", "Refactor codebase"],
            _ => &["should never be fetched"],
        };

        Ok(messages
            .iter()
            .map(|message| PullRequestCommit {
                commit: CommitDetail {
                    message: (*message).to_owned(),
                },
            })
            .collect())
    }
}

fn component(name: &str, system: &str, repo: Option<&str>) -> Component {
    Component {
        name: name.to_owned(),
        namespace: "default".to_owned(),
        kind: ComponentKind::Service,
        system: Some(system.to_owned()),
        repo: repo.map(str::to_owned),
        sonar_project: None,
    }
}

fn pipeline_with(
    workspace: &std::path::Path,
    catalog: Vec<Component>,
    source_control: Option<Arc<dyn SourceControlClient>>,
    ai: Option<Arc<dyn AiProvider>>,
) -> Pipeline {
    Pipeline {
        store: Mutex::new(SqliteStore::open(workspace).expect("open store")),
        catalog,
        source_control,
        sonar: None,
        ai,
        collect_concurrency: 2,
        checks: ChecksConfig::default(),
    }
}

#[tokio::test]
async fn refresh_collects_generates_and_persists_summaries() {
    let temp = tempdir().expect("tempdir");
    let catalog = vec![component(
        "payments-api",
        "payments",
        Some("acme/payments-api"),
    )];
    let pipeline = pipeline_with(
        temp.path(),
        catalog,
        Some(Arc::new(CannedGithub)),
        Some(Arc::new(MockProvider::with_text("Release notes body"))),
    );

    let generated = pipeline.run_refresh(Utc::now()).await.expect("refresh");

    let payments = generated.get("payments").expect("payments summaries");
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].repo_name, "acme/payments-api");
    assert_eq!(payments[0].summary, "Release notes body");

    let stored = pipeline
        .stored_summaries_for_date(Utc::now().date_naive())
        .expect("read stored");
    let stored_payments = stored.get("payments").expect("stored payments");
    assert_eq!(stored_payments.len(), 1);
    assert_eq!(stored_payments[0].summary, "Release notes body");
}

#[tokio::test]
async fn second_refresh_overwrites_same_day_rows() {
    let temp = tempdir().expect("tempdir");
    let catalog = vec![component(
        "payments-api",
        "payments",
        Some("acme/payments-api"),
    )];
    let pipeline = pipeline_with(
        temp.path(),
        catalog,
        Some(Arc::new(CannedGithub)),
        Some(Arc::new(MockProvider::with_text("Release notes body"))),
    );

    pipeline.run_refresh(Utc::now()).await.expect("first refresh");
    pipeline
        .run_refresh(Utc::now())
        .await
        .expect("second refresh");

    let stored = pipeline
        .stored_summaries_for_date(Utc::now().date_naive())
        .expect("read stored");
    assert_eq!(stored.get("payments").expect("stored payments").len(), 1);
}

#[tokio::test]
async fn collection_without_token_yields_zero_facts() {
    let temp = tempdir().expect("tempdir");
    let catalog = vec![component(
        "payments-api",
        "payments",
        Some("acme/payments-api"),
    )];
    let pipeline = pipeline_with(temp.path(), catalog, None, None);

    let count = pipeline.run_collection(Utc::now()).await.expect("collect");

    assert_eq!(count, 0);
}

#[tokio::test]
async fn refresh_without_provider_fails_without_persisting() {
    let temp = tempdir().expect("tempdir");
    let catalog = vec![component(
        "payments-api",
        "payments",
        Some("acme/payments-api"),
    )];
    let pipeline = pipeline_with(temp.path(), catalog, Some(Arc::new(CannedGithub)), None);

    assert!(pipeline.run_refresh(Utc::now()).await.is_err());
    assert!(
        pipeline
            .stored_summaries_for_date(Utc::now().date_naive())
            .expect("read stored")
            .is_empty()
    );
}

#[tokio::test]
async fn component_checks_evaluate_stored_sonar_facts() {
    let temp = tempdir().expect("tempdir");
    let mut with_sonar = component("payments-api", "payments", None);
    with_sonar.sonar_project = Some("acme_payments-api".to_owned());
    let pipeline = pipeline_with(temp.path(), vec![with_sonar], None, None);

    {
        let store = pipeline.store.lock().expect("lock store");
        store
            .upsert_facts(
                SONAR_FACTS_RETRIEVER,
                "service:default/payments-api",
                r#"{"coverage":42.0,"bugs":0,"code_smells":3,"quality_gate":"OK"}"#,
                Utc::now().timestamp(),
            )
            .expect("seed sonar facts");
    }

    let checks = pipeline.component_checks().expect("evaluate checks");

    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].entity_ref, "service:default/payments-api");
    let coverage = checks[0]
        .results
        .iter()
        .find(|check| check.id == "coverage")
        .expect("coverage check");
    assert!(!coverage.passed);
    let gate = checks[0]
        .results
        .iter()
        .find(|check| check.id == "quality_gate")
        .expect("gate check");
    assert!(gate.passed);
}
