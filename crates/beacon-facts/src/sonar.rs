use async_trait::async_trait;
use beacon_core::{Secret, SonarFacts};
use serde::Deserialize;

use crate::FactsError;

pub const SONAR_API_BASE: &str = "https://sonarcloud.io";
const MEASURE_METRIC_KEYS: &str = "coverage,bugs,code_smells";

/// Measures endpoint response shape. Metric values arrive as strings and
/// are coerced at the boundary; malformed fields read as zero.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeasuresResponse {
    #[serde(default)]
    pub component: Option<MeasuresComponent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeasuresComponent {
    #[serde(default)]
    pub measures: Vec<Measure>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Measure {
    pub metric: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QualityGateResponse {
    #[serde(default, rename = "projectStatus")]
    pub project_status: Option<ProjectStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectStatus {
    #[serde(default)]
    pub status: Option<String>,
}

#[async_trait]
pub trait SonarClient: Send + Sync {
    async fn fetch_measures(&self, project_key: &str) -> Result<MeasuresResponse, FactsError>;

    async fn fetch_quality_gate(&self, project_key: &str)
    -> Result<QualityGateResponse, FactsError>;
}

#[derive(Debug, Clone)]
pub struct SonarCloudClient {
    client: reqwest::Client,
    token: Secret,
    api_base: String,
}

impl SonarCloudClient {
    pub fn new(token: Secret, api_base: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            api_base: api_base.unwrap_or_else(|| SONAR_API_BASE.to_owned()),
        }
    }

    pub fn from_env(token_env: &str, api_base: Option<String>) -> Result<Self, FactsError> {
        let token = Secret::from_env(token_env)
            .ok_or_else(|| FactsError::MissingToken(token_env.to_owned()))?;

        Ok(Self::new(token, api_base))
    }
}

#[async_trait]
impl SonarClient for SonarCloudClient {
    async fn fetch_measures(&self, project_key: &str) -> Result<MeasuresResponse, FactsError> {
        let url = format!("{}/api/measures/component", self.api_base);
        let response = self
            .client
            .get(url)
            .query(&[("component", project_key), ("metricKeys", MEASURE_METRIC_KEYS)])
            .basic_auth(self.token.expose(), Some(""))
            .send()
            .await?
            .error_for_status()?
            .json::<MeasuresResponse>()
            .await?;

        Ok(response)
    }

    async fn fetch_quality_gate(
        &self,
        project_key: &str,
    ) -> Result<QualityGateResponse, FactsError> {
        let url = format!("{}/api/qualitygates/project_status", self.api_base);
        let response = self
            .client
            .get(url)
            .query(&[("projectKey", project_key)])
            .basic_auth(self.token.expose(), Some(""))
            .send()
            .await?
            .error_for_status()?
            .json::<QualityGateResponse>()
            .await?;

        Ok(response)
    }
}

/// Fetch measures and quality-gate status for one project and coerce them
/// into facts.
pub async fn collect_sonar_facts(
    client: &dyn SonarClient,
    project_key: &str,
) -> Result<SonarFacts, FactsError> {
    let measures = client.fetch_measures(project_key).await?;
    let quality_gate = client.fetch_quality_gate(project_key).await?;

    Ok(sonar_facts_from(&measures, &quality_gate))
}

fn sonar_facts_from(measures: &MeasuresResponse, gate: &QualityGateResponse) -> SonarFacts {
    let mut facts = SonarFacts {
        coverage: 0.0,
        bugs: 0,
        code_smells: 0,
        quality_gate: None,
    };

    if let Some(component) = &measures.component {
        for measure in &component.measures {
            let value = measure.value.as_deref().unwrap_or("");
            match measure.metric.as_str() {
                "coverage" => facts.coverage = value.parse().unwrap_or(0.0),
                "bugs" => facts.bugs = value.parse().unwrap_or(0),
                "code_smells" => facts.code_smells = value.parse().unwrap_or(0),
                _ => {}
            }
        }
    }

    facts.quality_gate = gate
        .project_status
        .as_ref()
        .and_then(|status| status.status.clone())
        .map(|status| status.trim().to_owned())
        .filter(|status| !status.is_empty());

    facts
}
