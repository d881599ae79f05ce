use std::collections::BTreeMap;

use beacon_core::{CommitBundle, RepoSummary, SystemName};

use crate::provider::{AiProvider, extract_text_part};

pub const NO_SUMMARY_FALLBACK: &str = "No summary returned.";

/// The fixed release-notes prompt for one repository's commit bundle.
pub fn build_release_notes_prompt(repo_name: &str, commit_messages: &str) -> String {
    format!(
        "You are writing release notes for the repository {repo_name}. \
Summarize the commit messages below into exactly four labeled sections, in this order: \
New functionality, Improvements, Bug fixes, Breaking changes. \
Each section is a bullet list; write N/A under any section that does not apply. \
Do not include blank lines. Keep a professional tone. \
Respond with the summary only, no preamble and no closing remarks.\n\n\
Commit messages:\n{commit_messages}"
    )
}

/// Generate one summary per repository, strictly sequentially. A provider
/// error skips that repository and keeps the rest of the system; a response
/// without usable text stores the fallback string instead.
pub async fn generate_summaries(
    bundles: &BTreeMap<SystemName, Vec<CommitBundle>>,
    provider: &dyn AiProvider,
) -> BTreeMap<SystemName, Vec<RepoSummary>> {
    let mut generated = BTreeMap::new();

    for (system, repos) in bundles {
        let mut summaries = Vec::new();

        for bundle in repos {
            let prompt = build_release_notes_prompt(&bundle.repo_name, &bundle.commit_messages);
            match provider.generate(&prompt).await {
                Ok(response) => {
                    let summary = extract_text_part(&response)
                        .filter(|text| !text.trim().is_empty())
                        .unwrap_or_else(|| NO_SUMMARY_FALLBACK.to_owned());
                    summaries.push(RepoSummary {
                        repo_name: bundle.repo_name.clone(),
                        summary,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        system = %system,
                        repo = %bundle.repo_name,
                        error = %err,
                        "summary generation failed, skipping repository"
                    );
                }
            }
        }

        if !summaries.is_empty() {
            generated.insert(system.clone(), summaries);
        }
    }

    generated
}
