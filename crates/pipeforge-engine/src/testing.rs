//! Scripted collaborators for tests.
//!
//! Each fake pops queued results in order and falls back to a fixed default
//! once its script runs out. Call counts are tracked so tests can assert how
//! often a phase actually reached its collaborator.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use pipeforge_phase_api::{
    Analyzer, ArtifactContent, ArtifactGenerator, Collaborators, DeployedPaths, Deployer,
    ProjectAnalysis, RankedTemplateList, TemplateRef, TemplateSelector, ValidationReport,
    Validator,
};
use pipeforge_utils::error::CollaboratorError;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

type Script<T> = Mutex<VecDeque<Result<T, CollaboratorError>>>;

/// Analysis returned once the script is exhausted.
#[must_use]
pub fn default_analysis() -> ProjectAnalysis {
    ProjectAnalysis {
        languages: vec!["rust".to_string()],
        frameworks: vec!["tokio".to_string()],
        recommended_agents: vec![
            "orchestrator".to_string(),
            "reviewer".to_string(),
            "tester".to_string(),
        ],
    }
}

#[derive(Debug, Default)]
pub struct ScriptedAnalyzer {
    script: Script<ProjectAnalysis>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl ScriptedAnalyzer {
    pub fn push_ok(&self, analysis: ProjectAnalysis) {
        lock(&self.script).push_back(Ok(analysis));
    }

    pub fn push_err(&self, err: CollaboratorError) {
        lock(&self.script).push_back(Err(err));
    }

    /// Sleep this long (on the tokio clock) before answering.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze(&self, _project_path: &Utf8Path) -> Result<ProjectAnalysis, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = lock(&self.script).pop_front();
        next.unwrap_or_else(|| Ok(default_analysis()))
    }
}

/// Defaults to one template per recommended agent.
#[derive(Debug, Default)]
pub struct ScriptedSelector {
    script: Script<RankedTemplateList>,
    calls: AtomicUsize,
}

impl ScriptedSelector {
    pub fn push_ok(&self, list: RankedTemplateList) {
        lock(&self.script).push_back(Ok(list));
    }

    pub fn push_err(&self, err: CollaboratorError) {
        lock(&self.script).push_back(Err(err));
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TemplateSelector for ScriptedSelector {
    async fn select(&self, analysis: &ProjectAnalysis) -> Result<RankedTemplateList, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = lock(&self.script).pop_front();
        next.unwrap_or_else(|| Ok(RankedTemplateList::from_names(analysis.recommended_agents.clone())))
    }
}

/// Renders `<name>.md` unless the task is scripted to fail or panic.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    failing: Mutex<BTreeMap<String, CollaboratorError>>,
    panicking: Mutex<BTreeSet<String>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    finished: AtomicUsize,
}

impl ScriptedGenerator {
    /// Fail every call for `task` with `err`.
    pub fn fail_task(&self, task: &str, err: CollaboratorError) {
        lock(&self.failing).insert(task.to_string(), err);
    }

    pub fn panic_task(&self, task: &str) {
        lock(&self.panicking).insert(task.to_string());
    }

    /// Sleep this long (on the tokio clock) inside every task.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    /// Let `task` succeed again.
    pub fn heal_task(&self, task: &str) {
        lock(&self.failing).remove(task);
        lock(&self.panicking).remove(task);
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that ran past their delay.
    #[must_use]
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        template: &TemplateRef,
        analysis: &ProjectAnalysis,
    ) -> Result<ArtifactContent, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        if lock(&self.panicking).contains(&template.name) {
            panic!("scripted panic in task {}", template.name);
        }
        if let Some(err) = lock(&self.failing).get(&template.name) {
            return Err(err.clone());
        }
        let body = format!(
            "# {}\n\nLanguages: {}\n",
            template.name,
            analysis.languages.join(", ")
        );
        Ok(ArtifactContent::new(
            template.name.clone(),
            format!("{}.md", template.name),
            body,
        ))
    }
}

/// Records every batch it receives; deploys under `.agents/`.
#[derive(Debug, Default)]
pub struct ScriptedDeployer {
    failures: Mutex<VecDeque<CollaboratorError>>,
    received: Mutex<Vec<Vec<ArtifactContent>>>,
    calls: AtomicUsize,
}

impl ScriptedDeployer {
    /// Fail the next call with `err`.
    pub fn push_err(&self, err: CollaboratorError) {
        lock(&self.failures).push_back(err);
    }

    /// Artifact batches passed to successful and failed calls alike.
    #[must_use]
    pub fn received(&self) -> Vec<Vec<ArtifactContent>> {
        lock(&self.received).clone()
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Deployer for ScriptedDeployer {
    async fn deploy(&self, artifacts: &[ArtifactContent]) -> Result<DeployedPaths, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.received).push(artifacts.to_vec());
        if let Some(err) = lock(&self.failures).pop_front() {
            return Err(err);
        }
        Ok(DeployedPaths {
            paths: artifacts
                .iter()
                .map(|a| Utf8PathBuf::from(".agents").join(&a.file_name))
                .collect(),
        })
    }
}

/// Passes with score 1.0 unless scripted otherwise.
#[derive(Debug, Default)]
pub struct ScriptedValidator {
    script: Script<ValidationReport>,
    calls: AtomicUsize,
}

impl ScriptedValidator {
    pub fn push_ok(&self, report: ValidationReport) {
        lock(&self.script).push_back(Ok(report));
    }

    pub fn push_err(&self, err: CollaboratorError) {
        lock(&self.script).push_back(Err(err));
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Validator for ScriptedValidator {
    async fn validate(&self, _deployed: &DeployedPaths) -> Result<ValidationReport, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = lock(&self.script).pop_front();
        next.unwrap_or_else(|| {
            Ok(ValidationReport {
                passed: true,
                score: 1.0,
                findings: Vec::new(),
            })
        })
    }
}

/// One of each fake, shared with the [`Collaborators`] handed out.
#[derive(Debug, Clone, Default)]
pub struct Fakes {
    pub analyzer: Arc<ScriptedAnalyzer>,
    pub selector: Arc<ScriptedSelector>,
    pub generator: Arc<ScriptedGenerator>,
    pub deployer: Arc<ScriptedDeployer>,
    pub validator: Arc<ScriptedValidator>,
}

impl Fakes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            analyzer: self.analyzer.clone(),
            selector: self.selector.clone(),
            generator: self.generator.clone(),
            deployer: self.deployer.clone(),
            validator: self.validator.clone(),
        }
    }
}
