//! Stand-in output used when upstream phases produced nothing usable.

use serde_json::json;

use pipeforge_snapshot::canonical_json;
use pipeforge_phase_api::{ArtifactContent, ProjectAnalysis, RankedTemplateList, WorkflowContext};
use pipeforge_utils::paths::{FALLBACK_ARTIFACT_FILE, sanitize_component};

/// Name of the artifact minimal recovery always emits.
pub const FALLBACK_ARTIFACT_NAME: &str = "general-purpose";

/// Name of the configuration shipped by simplified deployment.
pub const SIMPLIFIED_CONFIG_NAME: &str = "pipeforge-simplified";
pub const SIMPLIFIED_CONFIG_FILE: &str = "pipeforge.simplified.json";

fn agent_body(agent: &str, analysis: &ProjectAnalysis, origin: &str) -> String {
    let mut body = format!("# {agent}\n\n");
    body.push_str(&format!("Reduced-scope agent synthesized from {origin}.\n\n"));
    if !analysis.languages.is_empty() {
        body.push_str(&format!("Languages: {}\n", analysis.languages.join(", ")));
    }
    if !analysis.frameworks.is_empty() {
        body.push_str(&format!("Frameworks: {}\n", analysis.frameworks.join(", ")));
    }
    body
}

fn agent_artifact(agent: &str, body: String) -> ArtifactContent {
    ArtifactContent::new(agent, format!("{}.md", sanitize_component(agent)), body)
}

/// One artifact per recommended agent, or per detected language when the
/// analysis recommends none. Never empty.
#[must_use]
pub fn synthesize_from_analysis(analysis: &ProjectAnalysis) -> Vec<ArtifactContent> {
    let agents: Vec<String> = if analysis.recommended_agents.is_empty() {
        analysis
            .languages
            .iter()
            .map(|lang| format!("{}-specialist", lang.to_lowercase()))
            .collect()
    } else {
        analysis.recommended_agents.clone()
    };

    let artifacts: Vec<ArtifactContent> = agents
        .iter()
        .map(|agent| agent_artifact(agent, agent_body(agent, analysis, "project analysis")))
        .collect();

    if artifacts.is_empty() {
        vec![generic_artifact("no analysis data")]
    } else {
        artifacts
    }
}

/// One artifact per ranked template. Never empty.
#[must_use]
pub fn synthesize_from_templates(templates: &RankedTemplateList) -> Vec<ArtifactContent> {
    let empty = ProjectAnalysis::default();
    let artifacts: Vec<ArtifactContent> = templates
        .names()
        .into_iter()
        .map(|name| agent_artifact(name, agent_body(name, &empty, "template selection")))
        .collect();

    if artifacts.is_empty() {
        vec![generic_artifact("no template data")]
    } else {
        artifacts
    }
}

fn generic_artifact(request: &str) -> ArtifactContent {
    let body = format!(
        "# General-purpose agent\n\n\
         Fallback agent emitted when the pipeline could not produce tailored output.\n\n\
         Original request: {request}\n"
    );
    ArtifactContent::new(FALLBACK_ARTIFACT_NAME, FALLBACK_ARTIFACT_FILE, body)
}

/// The generic artifact for this run. Depends only on the request.
#[must_use]
pub fn generic_fallback_artifact(ctx: &WorkflowContext) -> ArtifactContent {
    generic_artifact(&ctx.request)
}

/// Emergency top-level configuration referencing only the generic artifact.
#[must_use]
pub fn minimal_config(ctx: &WorkflowContext) -> serde_json::Value {
    json!({
        "workflow_id": ctx.workflow_id,
        "project_path": ctx.project_path,
        "request": ctx.request,
        "mode": "minimal",
        "agents": [{
            "name": FALLBACK_ARTIFACT_NAME,
            "file": FALLBACK_ARTIFACT_FILE,
        }],
    })
}

/// Single configuration artifact deployed in simplified mode.
#[must_use]
pub fn simplified_config_artifact(ctx: &WorkflowContext, required_tasks: &[String]) -> ArtifactContent {
    let analysis = ctx
        .outputs
        .analysis
        .clone()
        .unwrap_or_else(|| ProjectAnalysis::fallback(required_tasks));
    let config = json!({
        "workflow_id": ctx.workflow_id,
        "mode": "simplified",
        "languages": analysis.languages,
        "frameworks": analysis.frameworks,
        "agents": analysis.recommended_agents,
    });
    let body = canonical_json(&config, "simplified configuration")
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| config.to_string());
    ArtifactContent::new(SIMPLIFIED_CONFIG_NAME, SIMPLIFIED_CONFIG_FILE, body)
}

/// Artifacts to use when generation produced none: from analysis if
/// present, else from the required task names.
#[must_use]
pub fn substitute_artifacts(ctx: &WorkflowContext, required_tasks: &[String]) -> Vec<ArtifactContent> {
    match &ctx.outputs.analysis {
        Some(analysis) => synthesize_from_analysis(analysis),
        None => synthesize_from_analysis(&ProjectAnalysis::fallback(required_tasks)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> WorkflowContext {
        let at = chrono::Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        WorkflowContext::new("wf-syn", "/project", "agents for a rust service", "/runs/wf-syn", at)
    }

    #[test]
    fn test_analysis_without_recommendations_uses_languages() {
        let analysis = ProjectAnalysis {
            languages: vec!["Rust".to_string(), "Python".to_string()],
            frameworks: vec!["axum".to_string()],
            recommended_agents: Vec::new(),
        };

        let artifacts = synthesize_from_analysis(&analysis);

        let names: Vec<_> = artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["rust-specialist", "python-specialist"]);
        assert!(artifacts[0].body.contains("Frameworks: axum"));
    }

    #[test]
    fn test_empty_inputs_fall_back_to_generic() {
        let from_analysis = synthesize_from_analysis(&ProjectAnalysis::default());
        let from_templates = synthesize_from_templates(&RankedTemplateList::default());

        assert_eq!(from_analysis[0].file_name, FALLBACK_ARTIFACT_FILE);
        assert_eq!(from_templates[0].name, FALLBACK_ARTIFACT_NAME);
    }

    #[test]
    fn test_template_names_become_file_names() {
        let artifacts = synthesize_from_templates(&RankedTemplateList::from_names(["api/reviewer"]));
        assert_eq!(artifacts[0].file_name, "api_reviewer.md");
    }

    #[test]
    fn test_minimal_config_ignores_partial_state() {
        let mut ctx = ctx();
        let before = minimal_config(&ctx);
        ctx.outputs.analysis = Some(ProjectAnalysis::fallback(&["tester".to_string()]));

        assert_eq!(minimal_config(&ctx), before);
        assert_eq!(before["agents"][0]["file"], FALLBACK_ARTIFACT_FILE);
    }

    #[test]
    fn test_simplified_config_uses_required_tasks_without_analysis() {
        let artifact = simplified_config_artifact(&ctx(), &["orchestrator".to_string()]);
        let value: serde_json::Value = serde_json::from_str(&artifact.body).unwrap();
        assert_eq!(value["agents"], json!(["orchestrator"]));
        assert_eq!(value["mode"], "simplified");
    }
}
