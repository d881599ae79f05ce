use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

mod secret;

pub use secret::Secret;

pub type SystemName = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    #[default]
    Service,
    Library,
    Website,
    Other,
}

impl ComponentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Library => "library",
            Self::Website => "website",
            Self::Other => "other",
        }
    }
}

/// One catalog entry. Sourced from the catalog file, never mutated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub kind: ComponentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sonar_project: Option<String>,
}

impl Component {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef {
            kind: self.kind,
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// The system tag, trimmed; `None` when absent or blank.
    pub fn system_tag(&self) -> Option<&str> {
        self.system
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// The `owner/name` repository slug, trimmed; `None` when absent or blank.
    pub fn repo_slug(&self) -> Option<&str> {
        self.repo
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn default_namespace() -> String {
    "default".to_owned()
}

/// Stable identifier for a catalog component, rendered as
/// `kind:namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: ComponentKind,
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.kind.as_str(), self.namespace, self.name)
    }
}

/// Commit activity facts retrieved for one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitFacts {
    pub repo_name: String,
    pub last_commit_message: String,
    pub recent_commit_messages: String,
    pub commit_count_last_week: u32,
}

/// Static-analysis facts retrieved for one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SonarFacts {
    pub coverage: f64,
    pub bugs: u64,
    pub code_smells: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_gate: Option<String>,
}

/// A per-repository bundle of recent one-line commit messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitBundle {
    pub repo_name: String,
    pub commit_messages: String,
}

/// The persisted unit: one generated summary for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSummary {
    #[serde(rename = "repoName")]
    pub repo_name: String,
    pub summary: String,
}

/// Pass/fail signal from one threshold check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: String,
    pub label: String,
    pub passed: bool,
}

/// First line of a commit message, truncated at the first newline.
pub fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or("")
}

/// Whether a unix timestamp (seconds) falls on the given UTC calendar date.
pub fn timestamp_on_utc_date(timestamp: i64, date: NaiveDate) -> bool {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|value| value.date_naive() == date)
        .unwrap_or(false)
}

pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ref_renders_kind_namespace_name() {
        let component = Component {
            name: "payments-api".to_owned(),
            namespace: "default".to_owned(),
            kind: ComponentKind::Service,
            system: Some("payments".to_owned()),
            repo: Some("acme/payments-api".to_owned()),
            sonar_project: None,
        };

        assert_eq!(
            component.entity_ref().to_string(),
            "service:default/payments-api"
        );
    }

    #[test]
    fn system_tag_rejects_blank_values() {
        let mut component = Component {
            name: "a".to_owned(),
            namespace: "default".to_owned(),
            kind: ComponentKind::Service,
            system: Some("   ".to_owned()),
            repo: None,
            sonar_project: None,
        };
        assert_eq!(component.system_tag(), None);

        component.system = Some("  payments ".to_owned());
        assert_eq!(component.system_tag(), Some("payments"));

        component.system = None;
        assert_eq!(component.system_tag(), None);
    }

    #[test]
    fn first_line_truncates_at_newline() {
        assert_eq!(first_line("Initial commit\nMore detail"), "Initial commit");
        assert_eq!(first_line("Refactor codebase"), "Refactor codebase");
        assert_eq!(first_line(""), "");
    }

    #[test]
    fn timestamp_on_utc_date_compares_calendar_days() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 19).expect("valid date");
        let noon = 1_750_334_400; // 2025-06-19T12:00:00Z
        let day_before = noon - 86_400;

        assert!(timestamp_on_utc_date(noon, date));
        assert!(!timestamp_on_utc_date(day_before, date));
    }

    #[test]
    fn repo_summary_serializes_repo_name_as_camel_case() {
        let summary = RepoSummary {
            repo_name: "repo1".to_owned(),
            summary: "Summary 1".to_owned(),
        };

        let value = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(value["repoName"], "repo1");
        assert_eq!(value["summary"], "Summary 1");
    }
}
