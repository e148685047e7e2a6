//! MediCheck CLI - interactive and scripted triage sessions

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

use medicheck_core::config::{CheckpointBackend, MedicheckConfig};
use medicheck_core::llm::LLMProviderFactory;
use medicheck_core::prelude::*;
use medicheck_core::research::SearchOptions;

const DISCLAIMER: &str = "IMPORTANT: MediCheck provides educational information only and is \
not a substitute for professional medical advice. In an emergency, call your local emergency \
number immediately.";

const FAILURE_MESSAGE: &str =
    "Sorry, something went wrong while analyzing your symptoms. Please try again later.";

#[derive(Parser)]
#[command(name = "medicheck")]
#[command(about = "Symptom triage assistant", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to medicheck.toml and MEDICHECK_ env vars)
    #[arg(long, global = true, env = "MEDICHECK_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an interactive session
    Run,
    /// Start a session and stop when it asks for medical history
    Start {
        /// Symptom description
        #[arg(short, long)]
        symptoms: String,
        /// Session ID (generated when omitted)
        #[arg(long)]
        session: Option<String>,
    },
    /// Resume a suspended session with the patient's reply
    Resume {
        /// Session ID
        session: String,
        /// Reply to the pending question
        value: String,
    },
    /// Show a session's checkpoint
    Status {
        /// Session ID
        session: String,
        /// Print the full checkpoint as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete checkpoints
    Purge {
        /// Session ID
        #[arg(required_unless_present = "expired")]
        session: Option<String>,
        /// Delete every suspended session older than the configured TTL
        #[arg(long)]
        expired: bool,
    },
    /// Version information
    Version,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %format!("{:#}", e), "Command failed");
        eprintln!("{}", FAILURE_MESSAGE);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = MedicheckConfig::load_with(cli.config.as_deref())?;

    match cli.command {
        Commands::Version => {
            println!("medicheck {}", env!("CARGO_PKG_VERSION"));
            println!("medicheck-core {}", medicheck_core::VERSION);
        }
        Commands::Run => interactive(&config).await?,
        Commands::Start { symptoms, session } => {
            let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let store = open_store(&config, true).await?;
            let (scheduler, mut events) = build_scheduler(&config, store)?;

            println!("Session: {}", session);
            let outcome = scheduler.start(&session, PatientInput::new(symptoms));
            if let Some(outcome) = with_events(outcome, &mut events).await {
                print_outcome(&session, outcome?);
            }
        }
        Commands::Resume { session, value } => {
            let store = open_store(&config, true).await?;
            let (scheduler, mut events) = build_scheduler(&config, store)?;

            let outcome = scheduler.resume(&session, &value);
            if let Some(outcome) = with_events(outcome, &mut events).await {
                print_outcome(&session, outcome?);
            }
        }
        Commands::Status { session, json } => {
            let store = open_store(&config, true).await?;
            let Some(checkpoint) = store.load(&session).await? else {
                bail!("no checkpoint for session '{}'", session);
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&checkpoint)?);
            } else {
                print_status(&checkpoint);
            }
        }
        Commands::Purge { session, expired } => {
            let store = open_store(&config, true).await?;
            if let Some(session) = session {
                if store.delete(&session).await? {
                    println!("Deleted session {}", session);
                } else {
                    println!("No checkpoint for session {}", session);
                }
            }
            if expired {
                let ttl = config
                    .checkpoints
                    .ttl
                    .context("checkpoints.ttl must be configured to purge expired sessions")?;
                let purged = store.purge_expired(ttl).await?;
                println!("Purged {} expired session(s)", purged);
            }
        }
    }

    Ok(())
}

async fn interactive(config: &MedicheckConfig) -> Result<()> {
    println!("MediCheck - Symptom Triage Assistant\n");
    println!("{}\n", DISCLAIMER);

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let Some(symptoms) = prompt_line(&mut input, "Describe your symptoms: ").await? else {
        println!("\nGoodbye.");
        return Ok(());
    };
    if symptoms.trim().is_empty() {
        println!("No symptoms entered. Goodbye.");
        return Ok(());
    }

    let store = open_store(config, false).await?;
    let (scheduler, mut events) = build_scheduler(config, store)?;
    let session = uuid::Uuid::new_v4().to_string();

    let started = scheduler.start(&session, PatientInput::new(symptoms));
    let Some(mut result) = with_events(started, &mut events).await else {
        println!("\nSession cancelled.");
        return Ok(());
    };

    loop {
        match result? {
            RunOutcome::Completed {
                report_location, ..
            } => {
                println!("\nYour report is ready: {}", report_location);
                return Ok(());
            }
            RunOutcome::Suspended { prompt, .. } => {
                println!("\n{}", prompt);
                let Some(reply) = prompt_line(&mut input, "> ").await? else {
                    println!("\nSession cancelled.");
                    return Ok(());
                };
                let resumed = scheduler.resume(&session, &reply);
                let Some(next) = with_events(resumed, &mut events).await else {
                    println!("\nSession cancelled.");
                    return Ok(());
                };
                result = next;
            }
        }
    }
}

/// Drive `run` to completion while printing its events as they arrive.
///
/// Returns `None` if the user pressed Ctrl-C first.
async fn with_events<F>(run: F, events: &mut EventReceiver) -> Option<WorkflowResult<RunOutcome>>
where
    F: Future<Output = WorkflowResult<RunOutcome>>,
{
    tokio::pin!(run);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            Some(event) = events.recv() => print_event(&event),
            _ = &mut ctrl_c => return None,
        }
    };
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }
    Some(result)
}

/// Read one line after printing `prompt`; `None` on EOF or Ctrl-C
async fn prompt_line(input: &mut Lines<BufReader<Stdin>>, prompt: &str) -> Result<Option<String>> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(prompt.as_bytes()).await?;
    stdout.flush().await?;

    tokio::select! {
        line = input.next_line() => Ok(line?),
        _ = tokio::signal::ctrl_c() => Ok(None),
    }
}

fn print_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::Failed { step, error, .. } => {
            tracing::warn!(step = ?step, error = %error, "Session halted");
        }
        _ => {
            for line in render_event(event) {
                println!("{}", line);
            }
        }
    }
}

/// Console lines for an event: the step's message plus any structured
/// results it produced
fn render_event(event: &WorkflowEvent) -> Vec<String> {
    // The suspension prompt and report location are printed from the outcome
    let WorkflowEvent::StepCompleted { step, output, .. } = event else {
        return Vec::new();
    };

    let mut lines = Vec::new();
    let message = output["conversation"]
        .as_array()
        .and_then(|entries| entries.last())
        .and_then(|entry| entry["content"].as_str());
    match message {
        Some(message) => lines.push(format!("[{}] {}", step, message)),
        None => lines.push(format!("[{}] done", step)),
    }

    let analysis = &output["symptom_analysis"];
    if analysis.is_object() {
        lines.push("\nAnalysis Results".to_string());
        lines.push(format!("Summary: {}", analysis["summary"].as_str().unwrap_or("N/A")));
        push_list(&mut lines, "Possible Conditions:", &analysis["possible_conditions"]);
        if let Some(level) = analysis["urgency_level"].as_str() {
            lines.push(format!("Urgency Level: {}", level.to_uppercase()));
        }
    }

    let recommendations = &output["recommendations"];
    if recommendations.is_object() {
        lines.push("\nMedical Recommendations".to_string());
        push_list(&mut lines, "Immediate Actions:", &recommendations["immediate_actions"]);
        push_list(&mut lines, "General Self-Care:", &recommendations["general_care"]);
        if let Some(when) = recommendations["when_to_seek_help"].as_str() {
            lines.push(format!("When to Seek Help: {}", when));
        }
    }

    let advice = &output["escalation_advice"];
    if advice.is_object() {
        lines.push("\n*** URGENT MEDICAL ALERT ***".to_string());
        if let Some(message) = advice["urgency_message"].as_str() {
            lines.push(format!("URGENT: {}", message));
        }
        if let Some(action) = advice["immediate_action"].as_str() {
            lines.push(format!("IMMEDIATE ACTION: {}", action));
        }
        push_list(&mut lines, "Critical Warning Signs:", &advice["warning_signs"]);
        if let Some(contact) = advice["emergency_contact"].as_str() {
            lines.push(format!("Emergency Contact: {}", contact));
        }
    }

    lines
}

/// Numbered list under `heading`; nothing when the array is missing or empty
fn push_list(lines: &mut Vec<String>, heading: &str, items: &serde_json::Value) {
    let Some(items) = items.as_array().filter(|items| !items.is_empty()) else {
        return;
    };
    lines.push(heading.to_string());
    for (i, item) in items.iter().filter_map(|item| item.as_str()).enumerate() {
        lines.push(format!("  {}. {}", i + 1, item));
    }
}

fn print_outcome(session: &str, outcome: RunOutcome) {
    match outcome {
        RunOutcome::Suspended { prompt, .. } => {
            println!("\n{}", prompt);
            println!("\nReply with: medicheck resume {} \"<your answer>\"", session);
        }
        RunOutcome::Completed {
            report_location, ..
        } => println!("\nYour report is ready: {}", report_location),
    }
}

fn print_status(checkpoint: &Checkpoint) {
    println!("Session:        {}", checkpoint.session_id);
    println!("Status:         {:?}", checkpoint.status);
    match checkpoint.pending_step {
        Some(step) => println!("Pending step:   {}", step),
        None => println!("Pending step:   none"),
    }
    println!("Steps executed: {}", checkpoint.steps_executed);
    if let Some(level) = checkpoint.state.urgency_level {
        println!("Urgency:        {}", level);
    }
    if let Some(location) = &checkpoint.state.report_location {
        println!("Report:         {}", location);
    }
    println!("Updated:        {}", checkpoint.updated_at);
}

/// Open the configured checkpoint store.
///
/// Commands that span invocations need durable storage, so `durable`
/// replaces a memory backend with the default file directory.
async fn open_store(config: &MedicheckConfig, durable: bool) -> Result<Arc<dyn CheckpointStore>> {
    let dir = match &config.checkpoints.backend {
        CheckpointBackend::File { dir } => dir.clone(),
        CheckpointBackend::Memory if durable => {
            tracing::warn!("Memory checkpoints do not survive between commands, using file store");
            PathBuf::from("./data/checkpoints")
        }
        CheckpointBackend::Memory => return Ok(Arc::new(MemoryCheckpointStore::new())),
    };
    let store = FileCheckpointStore::open(&dir)
        .await
        .with_context(|| format!("failed to open checkpoint directory {}", dir.display()))?;
    Ok(Arc::new(store))
}

fn build_providers(config: &MedicheckConfig) -> Result<Providers> {
    let llm_config = config
        .llm
        .as_ref()
        .context("an [llm] section is required to analyze symptoms")?;
    let llm = LLMProviderFactory::create(llm_config)?;

    let research: Option<Arc<dyn ResearchProvider>> = match &config.research {
        Some(research_config) => {
            let backend = TavilyBackend::from_config(research_config)?;
            let pipeline: Arc<dyn ResearchProvider> = Arc::new(
                ResearchPipeline::new(Arc::new(backend), SearchOptions::from(research_config))
                    .with_summarizer(llm.clone()),
            );
            Some(pipeline)
        }
        None => None,
    };

    let mut analysis = LlmAnalysisProvider::new(llm.clone()).with_temperature(llm_config.temperature);
    let mut recommendation =
        LlmRecommendationProvider::new(llm.clone()).with_temperature(llm_config.temperature);
    if let Some(research) = research {
        analysis = analysis.with_research(research.clone());
        recommendation = recommendation.with_research(research);
    }
    let escalation = LlmEscalationProvider::new(llm).with_temperature(llm_config.temperature);

    Ok(Providers::new(
        Arc::new(analysis),
        Arc::new(recommendation),
        Arc::new(escalation),
    ))
}

fn build_scheduler(
    config: &MedicheckConfig,
    store: Arc<dyn CheckpointStore>,
) -> Result<(Scheduler, EventReceiver)> {
    let (tx, rx) = event_channel(config.workflow.event_buffer);
    let scheduler = Scheduler::builder()
        .providers(build_providers(config)?)
        .report_sink(Arc::new(FileReportSink::new(&config.reports.dir)))
        .checkpoints(store)
        .events(tx)
        .config(config.workflow.clone())
        .checkpoint_ttl(config.checkpoints.ttl)
        .build()?;
    Ok((scheduler, rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn completed(step: StepId, output: serde_json::Value) -> WorkflowEvent {
        WorkflowEvent::StepCompleted {
            session_id: "s1".to_string(),
            step,
            output,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_analysis_event_lists_conditions() {
        let event = completed(
            StepId::AnalyzeSymptoms,
            json!({
                "conversation": [{"role": "assistant", "content": "Analysis done"}],
                "symptom_analysis": {
                    "summary": "Headache since morning",
                    "possible_conditions": ["Tension headache", "Migraine"],
                    "urgency_level": "moderate",
                    "reasoning": "No red flags"
                }
            }),
        );
        let lines = render_event(&event);
        assert_eq!(lines[0], "[analyzeSymptoms] Analysis done");
        assert!(lines.contains(&"Summary: Headache since morning".to_string()));
        assert!(lines.contains(&"  2. Migraine".to_string()));
        assert!(lines.contains(&"Urgency Level: MODERATE".to_string()));
    }

    #[test]
    fn test_recommendation_and_escalation_sections() {
        let event = completed(
            StepId::CreateRecommendations,
            json!({
                "recommendations": {
                    "immediate_actions": ["Rest"],
                    "general_care": ["Fluids", "Sleep"],
                    "when_to_seek_help": "If fever rises",
                    "follow_up": ""
                }
            }),
        );
        let lines = render_event(&event);
        assert_eq!(lines[0], "[createRecommendations] done");
        assert!(lines.contains(&"  1. Rest".to_string()));
        assert!(lines.contains(&"General Self-Care:".to_string()));
        assert!(lines.contains(&"When to Seek Help: If fever rises".to_string()));

        let event = completed(
            StepId::EscalationAdvice,
            json!({
                "escalation_advice": {
                    "urgency_message": "Go now",
                    "immediate_action": "Call 911",
                    "warning_signs": ["Fainting"],
                    "emergency_contact": "911"
                }
            }),
        );
        let lines = render_event(&event);
        assert!(lines.contains(&"IMMEDIATE ACTION: Call 911".to_string()));
        assert!(lines.contains(&"  1. Fainting".to_string()));
    }

    #[test]
    fn test_suspension_renders_nothing() {
        let event = WorkflowEvent::Suspended {
            session_id: "s1".to_string(),
            step: StepId::CollectMedicalHistory,
            prompt: "history?".to_string(),
            timestamp: Utc::now(),
        };
        assert!(render_event(&event).is_empty());
    }
}
