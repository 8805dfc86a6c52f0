//! Main entry point for the handoff binary
//!
//! Runs a simulated annotation session over a JSONL item file: a simulated
//! annotator labels items in parallel with the model until the agreement
//! criteria are met, the autonomous worker labels the rest, and a stratified
//! sample is validated against the reference labels.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use handoff_shared::{
    AnnotationType, Component, LabelValue, Phase, ResolutionSource, SchemaInfo, component_debug, component_info,
    component_warn, logging,
};

use orchestrator::services::{FileSnapshotStore, JsonlItemStore, PassthroughDiversity, SimulatedLabeler};
use orchestrator::{DiversityService, EngineConfig, ItemStore, LabelingService, Orchestrator, SnapshotStore};

const ANNOTATOR: &str = "simulated-annotator";

/// Human/model annotation handoff engine
#[derive(Parser)]
#[command(name = "handoff")]
#[command(about = "Runs a simulated human-to-model annotation handoff session")]
pub struct Args {
    /// JSON configuration file (defaults are used when omitted)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// JSONL file of items: {"id": ..., "text": ..., "gold": {schema: label}}
    #[arg(long)]
    pub items: PathBuf,

    /// Snapshot file (overrides the configured state path)
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Probability that the simulated model returns the reference label
    #[arg(long, default_value = "0.95")]
    pub model_accuracy: f64,

    /// Seed for sampling, selection and the simulated model
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of autonomous labels to spot-validate
    #[arg(long)]
    pub validation_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    dotenv::dotenv().ok();
    logging::init_tracing_with_level(Some(&args.log_level));
    logging::log_startup(Component::Cli, &format!("items from {}", args.items.display()));

    let mut config = load_config(&args)?;
    let store = JsonlItemStore::load(&args.items)
        .await
        .with_context(|| format!("loading items from {}", args.items.display()))?;
    if store.is_empty() {
        bail!("no items in {}", args.items.display());
    }

    if config.schemas.is_empty() {
        config.schemas = infer_schemas(&store);
        component_info!(
            Component::Cli,
            "🧩 Inferred {} schemas from reference labels",
            config.schemas.len()
        );
    }

    // The simulated annotator answers with the reference labels
    let gold: HashMap<String, BTreeMap<String, LabelValue>> =
        store.items().map(|item| (item.id.clone(), item.gold.clone())).collect();

    let labeler = SimulatedLabeler::from_store(&store, args.model_accuracy, config.rng_seed);
    let state_path = config
        .state_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("handoff_state.json"));
    let orchestrator = Orchestrator::from_config(
        config,
        labeler,
        PassthroughDiversity,
        store,
        FileSnapshotStore::new(state_path),
    )
    .context("building orchestrator")?;

    if orchestrator.restore_state().await {
        component_info!(Component::Cli, "📂 Resuming session {}", orchestrator.session_id().await);
    }

    if orchestrator.current_phase().await == Phase::Setup {
        orchestrator
            .transition_to(Phase::ParallelAnnotation, "simulated session starts with parallel annotation", false)
            .await?;
    }

    if orchestrator.current_phase().await == Phase::ParallelAnnotation {
        run_parallel_annotation(&orchestrator, &gold).await?;
    }

    if orchestrator.current_phase().await == Phase::AutonomousLabeling {
        run_autonomous_labeling(&orchestrator).await?;
        orchestrator
            .transition_to(Phase::FinalValidation, "autonomous labeling finished", false)
            .await?;
    }

    if orchestrator.current_phase().await == Phase::FinalValidation {
        run_final_validation(&orchestrator, &gold).await;
        orchestrator.transition_to(Phase::Completed, "validation sample reviewed", false).await?;
    }

    let status = orchestrator.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    let analysis = orchestrator.confusion_analysis().await;
    for pair in analysis.pairs.iter().take(5) {
        component_info!(
            Component::Cli,
            "🔍 model '{}' corrected to '{}' {} times ({:.1}%)",
            pair.model_label,
            pair.human_label,
            pair.count,
            pair.share * 100.0
        );
    }

    logging::log_shutdown(Component::Cli, &format!("session ended in phase {}", status.phase));
    Ok(())
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            EngineConfig::from_file(path).with_context(|| format!("reading config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    config
        .apply_env_overrides(|key| std::env::var(key).ok())
        .context("applying HANDOFF_* overrides")?;

    if let Some(seed) = args.seed {
        config.rng_seed = Some(seed);
    }
    if let Some(state) = &args.state {
        config.state_path = Some(state.clone());
    }
    if let Some(size) = args.validation_size {
        config.validation.sample_size = size;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// One schema per reference-label key, typed by the shape of its values
fn infer_schemas(store: &JsonlItemStore) -> Vec<SchemaInfo> {
    let mut seen: BTreeMap<String, Vec<LabelValue>> = BTreeMap::new();
    for item in store.items() {
        for (name, label) in &item.gold {
            seen.entry(name.clone()).or_default().push(label.clone());
        }
    }

    seen.into_iter()
        .map(|(name, values)| {
            let numbers: Vec<f64> = values
                .iter()
                .filter_map(|v| match v {
                    LabelValue::Number(n) => Some(*n),
                    _ => None,
                })
                .collect();
            if !numbers.is_empty() && numbers.len() == values.len() {
                let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
                let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let integral = numbers.iter().all(|n| n.fract() == 0.0);
                let kind = if integral { AnnotationType::Likert } else { AnnotationType::Number };
                return SchemaInfo::new(name, kind).with_range(min, max);
            }

            let multiselect = values.iter().any(|v| matches!(v, LabelValue::Options(_)));
            let labels: BTreeSet<String> = values
                .iter()
                .flat_map(|v| v.as_option_set().unwrap_or_default())
                .collect();
            let kind = if multiselect { AnnotationType::Multiselect } else { AnnotationType::Radio };
            let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
            SchemaInfo::new(name, kind).with_labels(&labels)
        })
        .collect()
}

async fn run_parallel_annotation<L, D, I, S>(
    orchestrator: &Orchestrator<L, D, I, S>,
    gold: &HashMap<String, BTreeMap<String, LabelValue>>,
) -> Result<()>
where
    L: LabelingService + 'static,
    D: DiversityService + 'static,
    I: ItemStore + 'static,
    S: SnapshotStore + 'static,
{
    component_info!(Component::Cli, "👥 Parallel annotation with {}", ANNOTATOR);
    // Items without reference labels cannot be annotated by the simulation
    let mut skipped = HashSet::new();
    while let Some(id) = orchestrator.get_next_instance_excluding(ANNOTATOR, &skipped).await {
        let Some(labels) = gold.get(&id).filter(|labels| !labels.is_empty()) else {
            orchestrator.release_assignment(&id).await;
            skipped.insert(id);
            continue;
        };

        let needs_model = {
            let mut missing = false;
            for schema in labels.keys() {
                missing |= orchestrator.prediction(&id, schema).await.is_none();
            }
            missing
        };
        if needs_model {
            orchestrator.request_model_labels(std::slice::from_ref(&id)).await?;
        }

        for (schema, label) in labels {
            if orchestrator.record_human_label(&id, schema, label.clone()).await == Some(false) {
                // The annotator's label is the reference, so it wins
                orchestrator
                    .resolve_disagreement(&id, schema, label.clone(), ResolutionSource::Human)
                    .await;
            }
        }

        if orchestrator.check_and_advance_to_autonomous().await {
            let metrics = orchestrator.metrics().await;
            logging::log_success(
                Component::Cli,
                &format!(
                    "Handing off after {} comparisons at {:.1}% agreement",
                    metrics.total_compared,
                    metrics.agreement_rate * 100.0
                ),
            );
            return Ok(());
        }
    }

    let metrics = orchestrator.metrics().await;
    component_warn!(
        Component::Cli,
        "⚠️ Ran out of items before handoff ({} comparisons, {:.1}% agreement)",
        metrics.total_compared,
        metrics.agreement_rate * 100.0
    );
    Ok(())
}

async fn run_autonomous_labeling<L, D, I, S>(orchestrator: &Orchestrator<L, D, I, S>) -> Result<()>
where
    L: LabelingService + 'static,
    D: DiversityService + 'static,
    I: ItemStore + 'static,
    S: SnapshotStore + 'static,
{
    orchestrator.start_autonomous_labeling().await?;
    let cap = orchestrator.config().worker.max_unvalidated;
    loop {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let remaining = orchestrator.unlabeled_count().await;
        let status = orchestrator.status().await;
        logging::log_progress(
            Component::Cli,
            "autonomous labeling",
            &format!("{} remaining, {} unvalidated", remaining, status.unvalidated),
        );
        if remaining == 0 || status.unvalidated >= cap {
            break;
        }
    }
    if let Some(report) = orchestrator.stop_autonomous_labeling().await {
        component_debug!(Component::Cli, "Worker report: {:?}", report);
    }
    Ok(())
}

async fn run_final_validation<L, D, I, S>(
    orchestrator: &Orchestrator<L, D, I, S>,
    gold: &HashMap<String, BTreeMap<String, LabelValue>>,
) where
    L: LabelingService + 'static,
    D: DiversityService + 'static,
    I: ItemStore + 'static,
    S: SnapshotStore + 'static,
{
    let sample = orchestrator.select_validation_sample(None).await;
    let schemas: Vec<String> = orchestrator.config().schemas.iter().map(|s| s.name.clone()).collect();
    for id in &sample {
        let reference = gold.get(id).and_then(|labels| {
            schemas
                .iter()
                .find_map(|schema| labels.get(schema))
                .or_else(|| labels.values().next())
        });
        match reference {
            Some(label) => {
                orchestrator.record_validation_result(id, label.clone()).await;
            }
            None => component_warn!(Component::Cli, "⚠️ No reference label to validate {}", id),
        }
    }

    let progress = orchestrator.validation_progress().await;
    logging::log_success(
        Component::Cli,
        &format!(
            "Validated {}/{} samples, model accuracy {:.1}%",
            progress.validated,
            progress.selected,
            progress.accuracy * 100.0
        ),
    );
}
