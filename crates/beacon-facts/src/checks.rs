use beacon_config::ChecksConfig;
use beacon_core::{CheckResult, SonarFacts};

const QUALITY_GATE_PASSING: &str = "OK";

/// Evaluate the traffic-light checks for one component's Sonar facts.
pub fn evaluate_checks(facts: &SonarFacts, thresholds: &ChecksConfig) -> Vec<CheckResult> {
    vec![
        CheckResult {
            id: "coverage".to_owned(),
            label: format!("Coverage at least {}%", thresholds.min_coverage),
            passed: facts.coverage >= thresholds.min_coverage,
        },
        CheckResult {
            id: "bugs".to_owned(),
            label: format!("At most {} open bugs", thresholds.max_bugs),
            passed: facts.bugs <= thresholds.max_bugs,
        },
        CheckResult {
            id: "code_smells".to_owned(),
            label: format!("At most {} code smells", thresholds.max_code_smells),
            passed: facts.code_smells <= thresholds.max_code_smells,
        },
        CheckResult {
            id: "quality_gate".to_owned(),
            label: "Quality gate passing".to_owned(),
            passed: facts.quality_gate.as_deref() == Some(QUALITY_GATE_PASSING),
        },
    ]
}
