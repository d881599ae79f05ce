use std::sync::Arc;

use async_trait::async_trait;
use beacon_core::{CommitFacts, Component, EntityRef, Secret, first_line};
use chrono::{DateTime, Duration, Utc};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::FactsError;

pub const GITHUB_API_BASE: &str = "https://api.github.com";
const ACCEPT_HEADER: &str = "application/vnd.github+json";
const USER_AGENT_HEADER: &str = "beacond";
const RECENT_PR_FETCH_LIMIT: usize = 5;
const RECENT_MERGE_WINDOW_DAYS: i64 = 7;
const AUTOMATED_TITLE_PREFIX: &str = "bump";

/// One closed pull request, as returned by the pulls endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullRequestCommit {
    pub commit: CommitDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommitDetail {
    pub message: String,
}

/// Source-control hosting API surface the collector needs. Injected so
/// tests run against a canned implementation.
#[async_trait]
pub trait SourceControlClient: Send + Sync {
    async fn list_closed_pull_requests(
        &self,
        repo_slug: &str,
        limit: usize,
    ) -> Result<Vec<PullRequest>, FactsError>;

    async fn list_pull_request_commits(
        &self,
        repo_slug: &str,
        number: u64,
    ) -> Result<Vec<PullRequestCommit>, FactsError>;
}

#[derive(Debug, Clone)]
pub struct GithubClient {
    client: reqwest::Client,
    token: Secret,
    api_base: String,
}

impl GithubClient {
    pub fn new(token: Secret, api_base: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            api_base: api_base.unwrap_or_else(|| GITHUB_API_BASE.to_owned()),
        }
    }

    /// Resolve the token from the named environment variable. A missing or
    /// blank variable aborts the whole collection run at the call site.
    pub fn from_env(token_env: &str, api_base: Option<String>) -> Result<Self, FactsError> {
        let token = Secret::from_env(token_env)
            .ok_or_else(|| FactsError::MissingToken(token_env.to_owned()))?;

        Ok(Self::new(token, api_base))
    }
}

#[async_trait]
impl SourceControlClient for GithubClient {
    async fn list_closed_pull_requests(
        &self,
        repo_slug: &str,
        limit: usize,
    ) -> Result<Vec<PullRequest>, FactsError> {
        let url = format!("{}/repos/{}/pulls", self.api_base, repo_slug);
        let per_page = limit.to_string();
        let pulls = self
            .client
            .get(url)
            .query(&[
                ("state", "closed"),
                ("sort", "updated"),
                ("direction", "desc"),
                ("per_page", per_page.as_str()),
            ])
            .header(ACCEPT, ACCEPT_HEADER)
            .header(USER_AGENT, USER_AGENT_HEADER)
            .bearer_auth(self.token.expose())
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<PullRequest>>()
            .await?;

        Ok(pulls)
    }

    async fn list_pull_request_commits(
        &self,
        repo_slug: &str,
        number: u64,
    ) -> Result<Vec<PullRequestCommit>, FactsError> {
        let url = format!("{}/repos/{}/pulls/{}/commits", self.api_base, repo_slug, number);
        let commits = self
            .client
            .get(url)
            .header(ACCEPT, ACCEPT_HEADER)
            .header(USER_AGENT, USER_AGENT_HEADER)
            .bearer_auth(self.token.expose())
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<PullRequestCommit>>()
            .await?;

        Ok(commits)
    }
}

/// Keep pull requests that merged within the trailing window and are not
/// automated dependency bumps. Unmerged PRs never qualify.
pub fn retain_recent_pull_requests(
    pulls: Vec<PullRequest>,
    now: DateTime<Utc>,
) -> Vec<PullRequest> {
    let cutoff = now - Duration::days(RECENT_MERGE_WINDOW_DAYS);

    pulls
        .into_iter()
        .filter(|pull| pull.merged_at.is_some_and(|merged| merged >= cutoff))
        .filter(|pull| {
            !pull
                .title
                .to_ascii_lowercase()
                .starts_with(AUTOMATED_TITLE_PREFIX)
        })
        .collect()
}

/// Collect commit facts for one repository: recent merged PR titles and the
/// first line of every commit message behind them. Commit fetches for one
/// repository stay sequential; the PR list gates them.
pub async fn collect_commit_facts(
    client: &dyn SourceControlClient,
    repo_slug: &str,
    now: DateTime<Utc>,
) -> Result<CommitFacts, FactsError> {
    let pulls = client
        .list_closed_pull_requests(repo_slug, RECENT_PR_FETCH_LIMIT)
        .await?;
    let retained = retain_recent_pull_requests(pulls, now);

    let last_commit_message = retained
        .iter()
        .max_by_key(|pull| pull.merged_at)
        .map(|pull| pull.title.clone())
        .unwrap_or_default();

    let mut messages = Vec::new();
    for pull in &retained {
        let commits = client
            .list_pull_request_commits(repo_slug, pull.number)
            .await?;
        for commit in &commits {
            messages.push(first_line(&commit.commit.message).to_owned());
        }
    }

    Ok(CommitFacts {
        repo_name: repo_slug.to_owned(),
        last_commit_message,
        commit_count_last_week: messages.len() as u32,
        recent_commit_messages: messages.join("\n"),
    })
}

/// Fans collection out across catalog components under a bounded number of
/// in-flight requests. Failures skip the affected component only.
pub struct CommitFactCollector {
    client: Arc<dyn SourceControlClient>,
    concurrency: usize,
}

impl CommitFactCollector {
    pub fn new(client: Arc<dyn SourceControlClient>, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn collect_all(
        &self,
        components: &[Component],
        now: DateTime<Utc>,
    ) -> Vec<(EntityRef, CommitFacts)> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();

        for component in components {
            let entity_ref = component.entity_ref();
            let Some(repo_slug) = component.repo_slug().map(str::to_owned) else {
                tracing::warn!(entity = %entity_ref, "component has no repository annotation, skipping");
                continue;
            };

            let client = self.client.clone();
            let semaphore = semaphore.clone();

            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };

                match collect_commit_facts(client.as_ref(), &repo_slug, now).await {
                    Ok(facts) => Some((entity_ref, facts)),
                    Err(err) => {
                        tracing::warn!(
                            entity = %entity_ref,
                            repo = %repo_slug,
                            error = %err,
                            "commit fact collection failed, skipping component"
                        );
                        None
                    }
                }
            });
        }

        let mut collected = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Some(result)) => collected.push(result),
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %err, "collection task join error"),
            }
        }

        collected.sort_by(|left, right| left.0.cmp(&right.0));
        collected
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    struct CannedClient {
        pulls: Vec<PullRequest>,
        commits: Vec<(u64, Vec<&'static str>)>,
    }

    #[async_trait]
    impl SourceControlClient for CannedClient {
        async fn list_closed_pull_requests(
            &self,
            _repo_slug: &str,
            _limit: usize,
        ) -> Result<Vec<PullRequest>, FactsError> {
            Ok(self.pulls.clone())
        }

        async fn list_pull_request_commits(
            &self,
            _repo_slug: &str,
            number: u64,
        ) -> Result<Vec<PullRequestCommit>, FactsError> {
            let messages = self
                .commits
                .iter()
                .find(|(pull_number, _)| *pull_number == number)
                .map(|(_, messages)| messages.clone())
                .unwrap_or_default();

            Ok(messages
                .into_iter()
                .map(|message| PullRequestCommit {
                    commit: CommitDetail {
                        message: message.to_owned(),
                    },
                })
                .collect())
        }
    }

    struct FailingClient;

    #[async_trait]
    impl SourceControlClient for FailingClient {
        async fn list_closed_pull_requests(
            &self,
            _repo_slug: &str,
            _limit: usize,
        ) -> Result<Vec<PullRequest>, FactsError> {
            Err(FactsError::InvalidResponse("boom".to_owned()))
        }

        async fn list_pull_request_commits(
            &self,
            _repo_slug: &str,
            _number: u64,
        ) -> Result<Vec<PullRequestCommit>, FactsError> {
            Err(FactsError::InvalidResponse("boom".to_owned()))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 19, 12, 0, 0).unwrap()
    }

    fn pull(number: u64, title: &str, merged_days_ago: Option<i64>) -> PullRequest {
        PullRequest {
            number,
            title: title.to_owned(),
            merged_at: merged_days_ago.map(|days| now() - Duration::days(days)),
        }
    }

    #[test]
    fn retain_drops_unmerged_and_bump_and_stale_pull_requests() {
        let pulls = vec![
            pull(1, "Add new feature", Some(1)),
            pull(2, "Bump lodash from 4.17.20 to 4.17.21", Some(1)),
            pull(3, "BUMP deps", Some(2)),
            pull(4, "Never merged", None),
            pull(5, "Old fix", Some(8)),
        ];

        let retained = retain_recent_pull_requests(pulls, now());

        assert_eq!(retained.len(), 1);
        assert_eq!(retained[0].number, 1);
    }

    #[tokio::test]
    async fn collect_commit_facts_extracts_first_lines_and_latest_title() {
        let client = CannedClient {
            pulls: vec![pull(7, "Add new feature", Some(0))],
            commits: vec![(7, vec!["Initial commit\nMore detail", "Refactor codebase"])],
        };

        let facts = collect_commit_facts(&client, "acme/payments-api", now())
            .await
            .expect("collect facts");

        assert_eq!(facts.repo_name, "acme/payments-api");
        assert_eq!(facts.last_commit_message, "Add new feature");
        assert!(facts.recent_commit_messages.contains("Initial commit"));
        assert!(facts.recent_commit_messages.contains("Refactor codebase"));
        assert!(!facts.recent_commit_messages.contains("More detail"));
        assert!(facts.commit_count_last_week > 0);
    }

    #[tokio::test]
    async fn collect_commit_facts_picks_most_recent_merge_for_last_message() {
        let client = CannedClient {
            pulls: vec![
                pull(1, "Older change", Some(3)),
                pull(2, "Newest change", Some(1)),
            ],
            commits: vec![(1, vec!["older"]), (2, vec!["newer"])],
        };

        let facts = collect_commit_facts(&client, "acme/repo", now())
            .await
            .expect("collect facts");

        assert_eq!(facts.last_commit_message, "Newest change");
        assert_eq!(facts.commit_count_last_week, 2);
    }

    #[tokio::test]
    async fn collect_commit_facts_yields_empty_facts_without_recent_activity() {
        let client = CannedClient {
            pulls: vec![pull(1, "Old fix", Some(30))],
            commits: vec![(1, vec!["stale"])],
        };

        let facts = collect_commit_facts(&client, "acme/repo", now())
            .await
            .expect("collect facts");

        assert_eq!(facts.last_commit_message, "");
        assert_eq!(facts.recent_commit_messages, "");
        assert_eq!(facts.commit_count_last_week, 0);
    }

    #[tokio::test]
    async fn collector_skips_failing_and_unannotated_components() {
        let component = |name: &str, repo: Option<&str>| beacon_core::Component {
            name: name.to_owned(),
            namespace: "default".to_owned(),
            kind: beacon_core::ComponentKind::Service,
            system: Some("payments".to_owned()),
            repo: repo.map(str::to_owned),
            sonar_project: None,
        };

        let collector = CommitFactCollector::new(Arc::new(FailingClient), 2);
        let collected = collector
            .collect_all(
                &[component("a", Some("acme/a")), component("b", None)],
                now(),
            )
            .await;

        assert!(collected.is_empty());
    }

    #[tokio::test]
    async fn collector_returns_facts_keyed_by_entity_ref() {
        let component = beacon_core::Component {
            name: "payments-api".to_owned(),
            namespace: "default".to_owned(),
            kind: beacon_core::ComponentKind::Service,
            system: Some("payments".to_owned()),
            repo: Some("acme/payments-api".to_owned()),
            sonar_project: None,
        };
        let client = CannedClient {
            pulls: vec![pull(7, "Add new feature", Some(0))],
            commits: vec![(7, vec!["Initial commit"])],
        };

        let collector = CommitFactCollector::new(Arc::new(client), 4);
        let collected = collector.collect_all(&[component], now()).await;

        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].0.to_string(), "service:default/payments-api");
        assert_eq!(collected[0].1.last_commit_message, "Add new feature");
    }
}
