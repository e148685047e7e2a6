//! Markdown report rendering and persistence

use async_trait::async_trait;
use chrono::{DateTime, Local};
use regex::Regex;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::error::Result;
use crate::state::WorkflowState;

/// Characters outside `[A-Za-z0-9_\s-]`
static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^A-Za-z0-9_\s-]").expect("valid regex")
});

/// Runs of whitespace or hyphens
static SEPARATOR_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-\s]+").expect("valid regex"));

/// Characters of `symptoms` used in the report file name
const FILENAME_PREFIX_CHARS: usize = 30;

const DISCLAIMER: &str = "**IMPORTANT DISCLAIMER:** This analysis is for educational purposes \
only and is NOT a substitute for professional medical advice, diagnosis, or treatment. Always \
consult healthcare professionals for medical concerns.";

const NOT_AVAILABLE: &str = "N/A";

/// Destination for finished reports
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Persist `report` under (a variant of) `filename`, returning its location
    async fn persist(&self, report: &str, filename: &str) -> Result<String>;
}

/// Writes reports as Markdown files in a directory
#[derive(Debug, Clone)]
pub struct FileReportSink {
    dir: PathBuf,
}

impl FileReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ReportSink for FileReportSink {
    async fn persist(&self, report: &str, filename: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(filename);
        tokio::fs::write(&path, report).await?;
        tracing::info!(path = %path.display(), bytes = report.len(), "Report written");
        Ok(path.display().to_string())
    }
}

/// Symptom portion of the report file name
///
/// Takes the first 30 characters, drops everything outside
/// `[A-Za-z0-9_\s-]`, then collapses whitespace/hyphen runs to `_`.
pub fn sanitize_symptom_prefix(symptoms: &str) -> String {
    let prefix: String = symptoms.chars().take(FILENAME_PREFIX_CHARS).collect();
    let cleaned = UNSAFE_CHARS.replace_all(&prefix, "");
    SEPARATOR_RUNS.replace_all(&cleaned, "_").into_owned()
}

/// `medical_analysis_<YYYYMMDD_HHMMSS>_<prefix>.md`
pub fn report_filename(symptoms: &str, at: DateTime<Local>) -> String {
    format!(
        "medical_analysis_{}_{}.md",
        at.format("%Y%m%d_%H%M%S"),
        sanitize_symptom_prefix(symptoms)
    )
}

/// Render the Markdown report for a finished session
///
/// Missing sections render as `N/A` rather than failing; the escalation
/// section appears only when escalation advice is present.
pub fn render_report(state: &WorkflowState, generated_at: DateTime<Local>) -> String {
    let mut out = String::new();

    out.push_str("# MediCheck AI - Medical Analysis Report\n\n");
    let _ = writeln!(
        out,
        "**Generated:** {}\n",
        generated_at.format("%Y-%m-%d %H:%M:%S")
    );

    out.push_str("## Patient Information\n");
    let _ = writeln!(
        out,
        "**Reported Symptoms:** {}",
        state.symptoms.as_deref().unwrap_or_default()
    );
    let _ = writeln!(out, "**Medical History:** {}\n", state.medical_history);

    let analysis = state.symptom_analysis.as_ref();
    out.push_str("## Symptom Analysis\n");
    let _ = writeln!(
        out,
        "**Summary:** {}\n",
        analysis.map_or(NOT_AVAILABLE, |a| a.summary.as_str())
    );
    out.push_str("**Possible Conditions:**\n");
    push_numbered(
        &mut out,
        analysis.map(|a| a.possible_conditions.as_slice()).unwrap_or_default(),
    );
    let urgency = analysis
        .map(|a| a.urgency_level.as_str().to_uppercase())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let _ = writeln!(out, "\n**Urgency Level:** {}", urgency);
    let _ = writeln!(
        out,
        "**Reasoning:** {}\n",
        analysis.map_or(NOT_AVAILABLE, |a| a.reasoning.as_str())
    );

    let recommendations = state.recommendations.as_ref();
    out.push_str("## Recommendations\n\n**Immediate Actions:**\n");
    push_numbered(
        &mut out,
        recommendations
            .map(|r| r.immediate_actions.as_slice())
            .unwrap_or_default(),
    );
    out.push_str("\n**General Self-Care:**\n");
    push_numbered(
        &mut out,
        recommendations
            .map(|r| r.general_care.as_slice())
            .unwrap_or_default(),
    );
    let _ = writeln!(
        out,
        "\n**When to Seek Help:** {}",
        recommendations.map_or(NOT_AVAILABLE, |r| r.when_to_seek_help.as_str())
    );
    let _ = writeln!(
        out,
        "**Follow-up:** {}",
        recommendations
            .map(|r| r.follow_up.as_str())
            .filter(|f| !f.is_empty())
            .unwrap_or(NOT_AVAILABLE)
    );

    if let Some(advice) = &state.escalation_advice {
        out.push_str("\n## URGENT ESCALATION ADVICE\n");
        let _ = writeln!(out, "**Urgency Message:** {}", advice.urgency_message);
        let _ = writeln!(out, "**Immediate Action:** {}\n", advice.immediate_action);
        out.push_str("**Warning Signs:**\n");
        push_numbered(&mut out, &advice.warning_signs);
        let _ = writeln!(out, "\n**Emergency Contact:** {}", advice.emergency_contact);
    }

    let _ = writeln!(out, "\n---\n{}", DISCLAIMER);
    out
}

fn push_numbered(out: &mut String, items: &[String]) {
    for (i, item) in items.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, item);
    }
}
