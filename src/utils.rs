//! Utility functions for rendering merge reports.

use crate::merge::{MergeReport, MergeState, StepReport};
use anyhow::Result;

/// Render a merge report as a human-readable summary
pub fn export_to_text_summary(report: &MergeReport) -> String {
    let mut summary = String::new();

    summary.push_str("Account Merge Summary\n");
    summary.push_str("=====================\n\n");
    summary.push_str(&format!("Source: {}\n", report.source));
    summary.push_str(&format!("Target: {}\n", report.target));
    summary.push_str(&format!(
        "Mode: {}\n",
        if report.dry_run { "dry run" } else { "commit" }
    ));
    summary.push_str(&format!("State: {}\n\n", describe_state(report.state)));

    for outcome in &report.steps {
        match &outcome.result {
            Ok(step) => summary.push_str(&format!("  [ok]     {:<18} {}\n", outcome.step, describe(step))),
            Err(err) => summary.push_str(&format!("  [failed] {:<18} {}\n", outcome.step, err)),
        }
    }

    let failed = report.failures().count();
    summary.push_str(&format!(
        "\nSteps: {} run, {} failed\n",
        report.steps.len(),
        failed
    ));
    summary
}

fn describe_state(state: MergeState) -> String {
    match state {
        MergeState::Pending => "pending".to_string(),
        MergeState::InProgress { step } => format!("in progress (step {step})"),
        MergeState::Complete => "complete".to_string(),
        MergeState::Failed { step } => format!("failed at step {step}"),
    }
}

fn describe(step: &StepReport) -> String {
    match step {
        StepReport::Transfer(t) => {
            let mut line = format!(
                "source {} / target {}",
                t.source_count_before, t.target_count_before
            );
            if let Some(after) = t.target_count_after {
                line.push_str(&format!(
                    " -> target {} (compare {})",
                    after,
                    t.source_count_before + t.target_count_before
                ));
            }
            if !t.failures.is_empty() {
                line.push_str(&format!(", {} record failures", t.failures.len()));
            }
            line
        }
        StepReport::Membership(m) => format!(
            "source in {} / target in {}, {} rewritten",
            m.source_count_before, m.target_count_before, m.rewritten
        ),
        StepReport::ReadStatuses(r) => format!(
            "{} posts, {} tags; {} overwritten, {} copied",
            r.post_ids, r.tag_ids, r.overwritten, r.copied
        ),
        StepReport::Votes(v) => {
            let mut line = format!("{} received, {} cast", v.author_votes, v.cast_votes);
            if let (Some(karma), Some(af_karma)) = (v.karma, v.af_karma) {
                line.push_str(&format!("; karma {karma}, af karma {af_karma}"));
            }
            line
        }
        StepReport::SlugSwap(s) => format!(
            "retired slug {}{}",
            s.retired_slug,
            if s.applied { "" } else { " (planned)" }
        ),
        StepReport::SoftDelete { applied } => {
            if *applied { "source marked deleted" } else { "skipped" }.to_string()
        }
    }
}

/// Save a rendered summary to a file
pub fn save_summary_to_file(summary: &str, filename: &str) -> Result<()> {
    std::fs::write(filename, summary)?;
    Ok(())
}
