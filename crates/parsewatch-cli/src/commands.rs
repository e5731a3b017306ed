//! Subcommand handlers. Each returns the process exit status.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use tokio::task::JoinHandle;

use parsewatch_core::detectors::DetectorKind;
use parsewatch_core::{
    load_gold, load_journals, load_output_set, write_report, CanaryEvaluator, DataDir, Detector,
    DriftAnalyzer, InvariantChecker, MonitorInputs, MonitorOutcome, Policy, Synthesizer,
};

use crate::cli::{AggregateArgs, CompareCanaryArgs, PolicyArgs, RunArgs};
use crate::report;

pub const VERDICT_FILE: &str = "verdict.json";
pub const COMPARISON_FILE: &str = "canary_comparison.json";

fn load_policy(path: Option<&Path>) -> anyhow::Result<Policy> {
    match path {
        Some(path) => Policy::from_file(path)
            .with_context(|| format!("failed to load policy {}", path.display())),
        None => Ok(Policy::default()),
    }
}

/// Run a detector on the blocking pool.
fn spawn_detector<D>(detector: D, inputs: Arc<MonitorInputs>) -> JoinHandle<D::Report>
where
    D: Detector + 'static,
    D::Report: 'static,
{
    tokio::task::spawn_blocking(move || {
        tracing::debug!(
            detector = ?detector.kind(),
            question = detector.question(),
            "Detector started"
        );
        detector.run(&inputs)
    })
}

/// Fan the three detectors out in parallel, then synthesize.
async fn monitor(inputs: Arc<MonitorInputs>, policy: &Policy) -> anyhow::Result<MonitorOutcome> {
    let (invariant, drift, canary) = tokio::join!(
        spawn_detector(InvariantChecker::new(policy), Arc::clone(&inputs)),
        spawn_detector(DriftAnalyzer::new(policy), Arc::clone(&inputs)),
        spawn_detector(CanaryEvaluator::new(policy), Arc::clone(&inputs)),
    );

    let invariant = invariant.context("invariant checker task failed")?;
    let drift = drift.context("drift analyzer task failed")?;
    let canary = canary.context("canary evaluator task failed")?;
    let verdict = Synthesizer::new().aggregate(&invariant, &drift, &canary);

    Ok(MonitorOutcome {
        invariant,
        drift,
        canary,
        verdict,
    })
}

pub async fn run(args: &RunArgs) -> anyhow::Result<i32> {
    let selection = &args.selection;
    let policy = load_policy(selection.policy.as_deref())?;
    let inputs = DataDir::new(&selection.data)
        .load_inputs(&selection.baseline, &selection.candidate)
        .with_context(|| format!("failed to load inputs from {}", selection.data.display()))?;

    let outcome = monitor(Arc::new(inputs), &policy).await?;

    let out = &args.out;
    write_report(out.join(DetectorKind::Invariants.report_file()), &outcome.invariant)?;
    write_report(out.join(DetectorKind::Drift.report_file()), &outcome.drift)?;
    write_report(out.join(DetectorKind::Canary.report_file()), &outcome.canary)?;
    write_report(out.join(VERDICT_FILE), &outcome.verdict)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome.verdict)?);
    } else {
        report::print_outcome(&outcome, out);
    }

    Ok(outcome.verdict.exit_code)
}

/// Read a report for fail-safe aggregation. Anything unreadable becomes
/// `null`, which the synthesizer treats as the worst case.
fn read_report(path: &Path) -> Value {
    let parsed = fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()));

    parsed.unwrap_or_else(|error| {
        tracing::warn!(path = %path.display(), %error, "Report unreadable, assuming worst case");
        Value::Null
    })
}

pub fn aggregate(args: &AggregateArgs) -> anyhow::Result<i32> {
    let verdict = Synthesizer::new().aggregate_values(
        &read_report(&args.invariant),
        &read_report(&args.drift),
        &read_report(&args.canary),
    );

    if let Some(out) = &args.out {
        write_report(out, &verdict)?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        report::print_verdict(&verdict);
    }

    Ok(verdict.exit_code)
}

pub fn compare_canary(args: &CompareCanaryArgs) -> anyhow::Result<i32> {
    let selection = &args.selection;
    let policy = load_policy(selection.policy.as_deref())?;
    let data = DataDir::new(&selection.data);

    let canary_journals = load_journals(data.canary_journals())?;
    let gold = load_gold(data.canary_gold())?;
    let (baseline_label, candidate_label) = (&selection.baseline, &selection.candidate);
    let baseline = load_output_set(data.parser_outputs(baseline_label), baseline_label)?;
    let candidate = load_output_set(data.parser_outputs(candidate_label), candidate_label)?;

    let comparison = CanaryEvaluator::new(&policy).compare_versions(
        &baseline,
        &candidate,
        &gold,
        &canary_journals,
    );

    write_report(args.out.join(COMPARISON_FILE), &comparison)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&comparison)?);
    } else {
        report::print_comparison(&comparison);
    }

    Ok(0)
}

pub fn policy(args: &PolicyArgs) -> anyhow::Result<i32> {
    let policy = load_policy(args.policy.as_deref())?;

    if args.show {
        print!("{}", serde_yaml::to_string(&policy)?);
    } else {
        match &args.policy {
            Some(path) => println!("{}: valid", path.display()),
            None => println!("default policy: valid"),
        }
    }

    Ok(0)
}
