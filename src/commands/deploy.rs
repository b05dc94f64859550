//! plan / deploy / destroy

use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use reconcile::{ApplyOptions, ApplyResult, Graph, StateStore, apply_with_progress, plan};
use std::io::IsTerminal;
use std::path::Path;
use std::process::ExitCode;

use super::{Session, load_target};
use crate::Context;
use crate::cli::{ApplyArgs, PlanArgs};
use crate::progress::StepProgress;
use crate::{differ, ui};

/// `keel plan`
pub fn plan_only(ctx: &Context, stack_file: &Path, state: Option<&Path>, args: &PlanArgs) -> Result<ExitCode> {
    let session = Session::open(state)?;
    let target = load_target(stack_file)?;
    let previous = session.store.load()?;

    let options = ApplyOptions::new(&session.registry).force(args.force);
    let plan = plan(Some(&target), previous.as_ref(), &options.plan_options())?;
    if !ctx.quiet || plan.has_changes() {
        differ::display_plan(&plan);
    }
    Ok(ExitCode::SUCCESS)
}

/// `keel deploy`
pub async fn deploy(ctx: &Context, stack_file: &Path, state: Option<&Path>, args: &ApplyArgs) -> Result<ExitCode> {
    let target = load_target(stack_file)?;
    converge(ctx, state, Some(target), args, "Deploy").await
}

/// `keel destroy`
pub async fn destroy(ctx: &Context, state: Option<&Path>, args: &ApplyArgs) -> Result<ExitCode> {
    converge(ctx, state, None, args, "Destroy").await
}

async fn converge(
    ctx: &Context,
    state: Option<&Path>,
    target: Option<Graph>,
    args: &ApplyArgs,
    verb: &str,
) -> Result<ExitCode> {
    let session = Session::open(state)?;
    let previous = session.store.load()?;

    let mut options = ApplyOptions::new(&session.registry).force(args.force);
    if let Some(jobs) = session.config.jobs(args.jobs) {
        options = options.max_concurrency(jobs);
    }
    if let Some(timeout) = session.config.step_timeout(args.timeout) {
        options = options.step_timeout(timeout);
    }

    let plan = plan(target.as_ref(), previous.as_ref(), &options.plan_options())?;
    if !ctx.quiet {
        differ::display_plan(&plan);
    }
    if !plan.has_changes() {
        return Ok(ExitCode::SUCCESS);
    }
    if args.dry_run {
        ui::info("Dry run, nothing applied.");
        return Ok(ExitCode::SUCCESS);
    }
    if !confirm(&session, args.yes, verb, target.is_none())? {
        ui::info("Aborted.");
        return Ok(ExitCode::SUCCESS);
    }

    let cancel = options.cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling running steps");
            cancel.cancel();
        }
    });

    let mut progress = StepProgress::new(&plan, ctx.quiet);
    let applied = apply_with_progress(&plan, target.as_ref(), previous.as_ref(), &options, &mut progress).await;
    watcher.abort();
    let applied = applied?;

    session
        .store
        .save(&applied.result)
        .with_context(|| format!("Failed to save state to {}", session.store.path().display()))?;

    print_summary(ctx, &applied);
    if applied.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn confirm(session: &Session, yes: bool, verb: &str, destructive: bool) -> Result<bool> {
    if yes || !session.config.confirm {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        bail!("{verb} needs confirmation; pass --yes when not running interactively");
    }

    println!();
    let answer = dialoguer::Confirm::new()
        .with_prompt(format!("{verb}?"))
        .default(!destructive)
        .interact()?;
    Ok(answer)
}

fn print_summary(ctx: &Context, applied: &ApplyResult) {
    let summary = applied.summary();

    if !applied.errors.is_empty() {
        ui::section(&format!(
            "{} while applying",
            ui::pluralize(applied.errors.len(), "error", "errors")
        ));
        for error in &applied.errors {
            ui::error(&error.to_string());
        }
    }

    if ctx.quiet && applied.is_success() {
        return;
    }

    println!();
    if applied.is_success() {
        ui::success(&format!(
            "Applied {}",
            ui::pluralize(summary.total_changes(), "change", "changes")
        ));
    } else {
        ui::warn("Applied with failures; state saved with what succeeded.");
    }
    let counts = [
        ("created", summary.created),
        ("updated", summary.updated),
        ("replaced", summary.replaced),
        ("deleted", summary.deleted),
        ("failed", summary.failed),
        ("skipped", summary.skipped),
    ];
    for (label, count) in counts.into_iter().filter(|(_, count)| *count > 0) {
        println!("  {} {} {}", "•".dimmed(), count, label);
    }
}
