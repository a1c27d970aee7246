//! Contracts for the components the orchestrator drives but does not own.
//!
//! Each collaborator reports failure as a [`CollaboratorError`] carrying an
//! [`ErrorCategory`](pipeforge_utils::error::ErrorCategory). That category is
//! what recovery classification keys on, so implementations should attach the
//! most specific one they know.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use pipeforge_utils::error::CollaboratorError;

/// What the analyzer learned about a project.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectAnalysis {
    pub languages: Vec<String>,
    pub frameworks: Vec<String>,
    pub recommended_agents: Vec<String>,
}

impl ProjectAnalysis {
    /// Stand-in analysis used when the real one is unavailable.
    ///
    /// Recommends the required generation tasks so downstream phases still
    /// have something to work with.
    #[must_use]
    pub fn fallback(required_tasks: &[String]) -> Self {
        Self {
            languages: Vec::new(),
            frameworks: Vec::new(),
            recommended_agents: required_tasks.to_vec(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.languages.is_empty() && self.frameworks.is_empty() && self.recommended_agents.is_empty()
    }
}

/// A template chosen for generation. `name` doubles as the generation task name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRef {
    pub name: String,
    pub score: f64,
}

impl TemplateRef {
    #[must_use]
    pub fn new(name: impl Into<String>, score: f64) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// Templates in descending preference.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RankedTemplateList {
    pub templates: Vec<TemplateRef>,
}

impl RankedTemplateList {
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            templates: names.into_iter().map(|n| TemplateRef::new(n, 1.0)).collect(),
        }
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.templates.iter().map(|t| t.name.as_str()).collect()
    }
}

/// One rendered configuration artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactContent {
    /// Logical name, usually the template or task name.
    pub name: String,
    /// File name the artifact is stored under.
    pub file_name: String,
    pub body: String,
}

impl ArtifactContent {
    #[must_use]
    pub fn new(name: impl Into<String>, file_name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_name: file_name.into(),
            body: body.into(),
        }
    }
}

/// Where the deployer installed the artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeployedPaths {
    pub paths: Vec<Utf8PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<String>,
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Inspect the project. Unreadable projects fail with category `Analysis`.
    async fn analyze(&self, project_path: &Utf8Path) -> Result<ProjectAnalysis, CollaboratorError>;
}

#[async_trait]
pub trait TemplateSelector: Send + Sync {
    async fn select(&self, analysis: &ProjectAnalysis)
    -> Result<RankedTemplateList, CollaboratorError>;
}

/// Invoked once per generation task, concurrently with its siblings.
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    async fn generate(
        &self,
        template: &TemplateRef,
        analysis: &ProjectAnalysis,
    ) -> Result<ArtifactContent, CollaboratorError>;
}

#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, artifacts: &[ArtifactContent]) -> Result<DeployedPaths, CollaboratorError>;
}

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, deployed: &DeployedPaths) -> Result<ValidationReport, CollaboratorError>;
}

/// Everything the orchestrator calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub analyzer: Arc<dyn Analyzer>,
    pub selector: Arc<dyn TemplateSelector>,
    pub generator: Arc<dyn ArtifactGenerator>,
    pub deployer: Arc<dyn Deployer>,
    pub validator: Arc<dyn Validator>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_analysis_recommends_required_tasks() {
        let required = vec!["orchestrator".to_string(), "tester".to_string()];
        let analysis = ProjectAnalysis::fallback(&required);
        assert_eq!(analysis.recommended_agents, required);
        assert!(!analysis.is_empty());
        assert!(ProjectAnalysis::default().is_empty());
    }

    #[test]
    fn test_ranked_list_from_names_preserves_order() {
        let list = RankedTemplateList::from_names(["reviewer", "orchestrator"]);
        assert_eq!(list.names(), vec!["reviewer", "orchestrator"]);
    }

    #[test]
    fn test_validation_report_omits_empty_findings() {
        let report = ValidationReport {
            passed: true,
            score: 0.9,
            findings: Vec::new(),
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("findings"));
    }
}
