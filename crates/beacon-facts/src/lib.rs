use thiserror::Error;

/// Fact-store keys for the two retrievers in this crate.
pub const COMMIT_FACTS_RETRIEVER: &str = "commit_facts";
pub const SONAR_FACTS_RETRIEVER: &str = "sonar_facts";

mod checks;
mod github;
mod sonar;

pub use checks::evaluate_checks;
pub use github::{
    CommitDetail, CommitFactCollector, GITHUB_API_BASE, GithubClient, PullRequest,
    PullRequestCommit, SourceControlClient, collect_commit_facts, retain_recent_pull_requests,
};
pub use sonar::{
    Measure, MeasuresComponent, MeasuresResponse, ProjectStatus, QualityGateResponse,
    SONAR_API_BASE, SonarClient, SonarCloudClient, collect_sonar_facts,
};

#[derive(Debug, Error)]
pub enum FactsError {
    #[error("missing access token in {0}")]
    MissingToken(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("response decoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}
