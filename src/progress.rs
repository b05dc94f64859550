//! Apply progress on the terminal

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use reconcile::{ApplySummary, Plan, ProgressCallback, Step, StepOutcome, StepStatus};
use std::collections::HashMap;

use crate::differ::step_label;
use crate::ui;

/// One printed line for a finished step, `None` for unchanged entries
pub fn outcome_line(label: &str, outcome: &StepOutcome) -> Option<String> {
    let line = match &outcome.status {
        StepStatus::Unchanged => return None,
        StepStatus::Created => format!("  {} {}", "+".green(), label),
        StepStatus::Updated => format!("  {} {}", "~".yellow(), label),
        StepStatus::Replaced => format!("  {} {} {}", "±".yellow(), label, "(replaced)".dimmed()),
        StepStatus::Deleted => format!("  {} {}", "-".red(), label),
        StepStatus::Failed { error } => format!("  {} {} {}", "✗".red(), label, error.red()),
        StepStatus::Skipped { reason } => {
            format!("  {} {} {}", "○".dimmed(), label, format!("skipped: {reason}").dimmed())
        }
    };
    Some(line)
}

/// Progress bar fed by the executor
pub struct StepProgress {
    pb: ProgressBar,
    labels: HashMap<String, String>,
    quiet: bool,
}

impl StepProgress {
    pub fn new(plan: &Plan, quiet: bool) -> Self {
        let pb = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }

        let labels = plan
            .steps
            .iter()
            .map(|step| (step.entry_id.clone(), step_label(step)))
            .collect();
        Self { pb, labels, quiet }
    }

    fn label<'a>(&'a self, entry_id: &'a str) -> &'a str {
        self.labels.get(entry_id).map_or(entry_id, String::as_str)
    }
}

impl ProgressCallback for StepProgress {
    fn on_apply_start(&mut self, total: usize) {
        self.pb.set_length(total as u64);
    }

    fn on_step_start(&mut self, step: &Step) {
        let message = format!("{} {}", step.action, self.label(&step.entry_id));
        self.pb.set_message(ui::truncate_start(&message, 40));
    }

    fn on_step_complete(&mut self, outcome: &StepOutcome) {
        self.pb.inc(1);
        let Some(line) = outcome_line(self.label(&outcome.entry_id), outcome) else {
            return;
        };
        // println on a hidden bar (quiet or not a terminal) prints nothing
        if !self.pb.is_hidden() {
            self.pb.println(line);
        } else if !self.quiet {
            println!("{line}");
        }
    }

    fn on_apply_complete(&mut self, summary: &ApplySummary) {
        log::debug!("apply finished: {summary:?}");
        self.pb.finish_and_clear();
    }
}
