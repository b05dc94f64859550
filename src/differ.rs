//! Plan rendering

use colored::Colorize;
use reconcile::{Action, EntryDiff, FieldChange, Plan, Step, group_by_type};
use serde_json::Value;
use std::fmt::Write as _;

const RULE: &str = "─────────────────────────────────────────────────────";

/// `type.name` when the entry carries a `name` parameter, else the entry id
pub fn step_label(step: &Step) -> String {
    let name = step
        .candidate
        .as_ref()
        .or(step.current.as_ref())
        .and_then(|entry| entry.parameters.get("name")?.as_str());
    match name {
        Some(name) => format!("{}.{}", step.entry_type(), name),
        None => step.entry_id.clone(),
    }
}

fn label(plan: &Plan, diff: &EntryDiff) -> String {
    plan.step(&diff.entry_id)
        .map_or_else(|| diff.entry_id.clone(), step_label)
}

fn symbol(action: Action) -> colored::ColoredString {
    match action {
        Action::Create => "+".green(),
        Action::Delete => "-".red(),
        Action::Update | Action::Replace => "~".yellow(),
        Action::Noop => " ".normal(),
    }
}

fn show(value: Option<&Value>) -> String {
    value.map_or_else(|| "(none)".to_string(), Value::to_string)
}

fn render_change(out: &mut String, change: &FieldChange) {
    if let (Some(Value::String(before)), Some(Value::String(after))) = (&change.before, &change.after) {
        if before.contains('\n') || after.contains('\n') {
            let _ = writeln!(out, "│       {}:", change.path);
            let diff = similar::TextDiff::from_lines(before.as_str(), after.as_str());
            for line in diff.iter_all_changes() {
                let text = line.to_string_lossy();
                let text = text.trim_end_matches('\n');
                match line.tag() {
                    similar::ChangeTag::Delete => {
                        let _ = writeln!(out, "│         {}", format!("- {text}").red());
                    }
                    similar::ChangeTag::Insert => {
                        let _ = writeln!(out, "│         {}", format!("+ {text}").green());
                    }
                    similar::ChangeTag::Equal => {}
                }
            }
            return;
        }
    }

    let _ = writeln!(
        out,
        "│       {} {} → {}",
        format!("{}:", change.path).dimmed(),
        show(change.before.as_ref()),
        show(change.after.as_ref())
    );
}

/// Render a plan as a boxed diff grouped by entry type
pub fn render_plan(plan: &Plan) -> String {
    let mut out = String::new();
    if !plan.has_changes() {
        let _ = writeln!(out, "  {} No changes needed", "✓".green());
        return out;
    }

    let _ = writeln!(out, "┌─ {} ─────────────────────────────────────────┐", "Planned Changes".bold());
    let _ = writeln!(out, "│");

    let by_type = group_by_type(&plan.diffs);
    let mut types: Vec<&String> = by_type.keys().collect();
    types.sort();

    for entry_type in types {
        let _ = writeln!(out, "│ {}", entry_type.bold());
        for diff in &by_type[entry_type] {
            let _ = writeln!(
                out,
                "│   {} {:<30} {}",
                symbol(diff.action),
                label(plan, diff),
                diff.entry_id.dimmed()
            );
            if diff.is_modification() {
                for change in &diff.changes {
                    render_change(&mut out, change);
                }
            }
        }
        let _ = writeln!(out, "│");
    }

    let summary = plan.summary();
    let _ = writeln!(out, "├{RULE}┤");
    let _ = writeln!(
        out,
        "│ Summary: {} to create, {} to update, {} to delete, {} unchanged",
        summary.additions.to_string().green(),
        summary.modifications.to_string().yellow(),
        summary.removals.to_string().red(),
        summary.unchanged
    );
    let _ = writeln!(out, "└{RULE}┘");
    out
}

/// Print a plan to stdout
pub fn display_plan(plan: &Plan) {
    println!();
    print!("{}", render_plan(plan));
}
