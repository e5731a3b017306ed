//! Human-readable summaries on stdout.

use std::path::Path;

use parsewatch_core::detectors::CanaryComparison;
use parsewatch_core::{FinalVerdict, IssueSeverity, MonitorOutcome};

pub fn print_outcome(outcome: &MonitorOutcome, out: &Path) {
    let inv = &outcome.invariant;
    let drift = &outcome.drift;
    let canary = &outcome.canary;

    println!(
        "parsewatch: {} vs {}",
        drift.candidate_label, drift.baseline_label
    );
    println!(
        "  invariants  {:<13} {}/{} checks passed, {} items",
        format!("{:?}", inv.overall_status).to_uppercase(),
        inv.summary.passed_checks,
        inv.summary.total_checks,
        inv.total_items_checked
    );
    println!(
        "  drift       {:<13} {} flag(s), {} shared journals{}",
        drift.overall_drift_status.as_str(),
        drift.drift_flags.len(),
        drift.coverage.overlapping,
        if drift.zero_overlap { " (no overlap)" } else { "" }
    );
    println!(
        "  canary      {:<13} {}% evidence, {}% polarity on {} matched",
        canary.alert_level.to_string(),
        canary.metrics.evidence_validity.observed_value,
        canary.metrics.polarity_correctness.observed_value,
        canary.metrics.total_matched_items
    );
    println!();
    print_verdict(&outcome.verdict);
    println!("  reports written to {}", out.display());
}

pub fn print_verdict(verdict: &FinalVerdict) {
    println!(
        "  verdict     {:<13} exit {} ({})",
        verdict.action.as_str().to_uppercase(),
        verdict.exit_code,
        verdict.reason
    );

    for (severity, label, count) in [
        (IssueSeverity::Critical, "critical issues", verdict.critical_issues),
        (IssueSeverity::Warning, "warnings", verdict.warnings),
    ] {
        if count == 0 {
            continue;
        }
        println!("  {}: {}", label, count);
        for issue in verdict.issues.iter().filter(|i| i.severity == severity) {
            println!("    - [{:?}] {}", issue.source, issue.message);
        }
    }
}

pub fn print_comparison(comparison: &CanaryComparison) {
    let (b, c, d) = (&comparison.baseline, &comparison.candidate, &comparison.delta);

    println!("canary comparison: {} vs {}", c.label, b.label);
    println!("  {:<22} {:>10} {:>10} {:>10}", "", b.label, c.label, "delta");
    println!(
        "  {:<22} {:>10} {:>10} {:>+10}",
        "evidence validity %", b.evidence_validity, c.evidence_validity, d.evidence_validity
    );
    println!(
        "  {:<22} {:>10} {:>10} {:>+10}",
        "polarity correctness %",
        b.polarity_correctness,
        c.polarity_correctness,
        d.polarity_correctness
    );
    for (name, before, after, delta) in [
        ("matched", b.matched, c.matched, d.matched),
        (
            "unmatched predicted",
            b.unmatched_predicted,
            c.unmatched_predicted,
            d.unmatched_predicted,
        ),
        ("unmatched gold", b.unmatched_gold, c.unmatched_gold, d.unmatched_gold),
        ("contradictions", b.contradictions, c.contradictions, d.contradictions),
    ] {
        println!("  {:<22} {:>10} {:>10} {:>+10}", name, before, after, delta);
    }
    println!(
        "  {:<22} {:>10} {:>10}",
        "alert level",
        b.alert_level.to_string(),
        c.alert_level.to_string()
    );
}
