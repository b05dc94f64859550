//! state list / show

use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use reconcile::{Entry, Graph, StateStore};
use std::path::Path;
use std::process::ExitCode;

use super::Session;
use crate::Context;
use crate::cli::StateCommand;
use crate::{stack, ui};

pub fn run(ctx: &Context, state: Option<&Path>, cmd: &StateCommand) -> Result<ExitCode> {
    let session = Session::open(state)?;
    let graph = session.store.load()?.unwrap_or_default();

    match cmd {
        StateCommand::List => list(ctx, &session, &graph)?,
        StateCommand::Show { id } => show(&graph, id)?,
    }
    Ok(ExitCode::SUCCESS)
}

fn name(entry: &Entry) -> &str {
    entry
        .parameters
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("-")
}

fn list(ctx: &Context, session: &Session, graph: &Graph) -> Result<()> {
    if graph.is_empty() {
        if !ctx.quiet {
            ui::info(&format!(
                "No entries in {}",
                session.store.path().display()
            ));
        }
        return Ok(());
    }

    ui::header(&format!(
        "State ({})",
        ui::pluralize(graph.len(), "entry", "entries")
    ));
    for entry in graph.entries() {
        let status = if entry.result.is_some() {
            "✓".green()
        } else {
            "○".dimmed()
        };
        println!(
            "  {} {:<12} {:<24} {}",
            status,
            entry.entry_type,
            ui::truncate_start(name(entry), 24),
            entry.entry_id.dimmed()
        );
    }
    if ctx.verbose > 0 {
        ui::dim(&session.store.path().display().to_string());
    }
    Ok(())
}

/// Look up by literal id first, then as `type.name`
fn find<'a>(graph: &'a Graph, id: &str) -> Option<&'a Entry> {
    graph
        .get(id)
        .or_else(|| graph.get(&stack::resolve_id(id)))
}

fn show(graph: &Graph, id: &str) -> Result<()> {
    let Some(entry) = find(graph, id) else {
        bail!("No entry '{id}' in state");
    };

    ui::kv("type", &entry.entry_type);
    ui::kv("entryId", &entry.entry_id);
    if !entry.dependencies.is_empty() {
        ui::kv("dependencies", &entry.dependencies.join(", "));
    }
    let json = serde_json::to_string_pretty(entry).context("Failed to serialize entry")?;
    println!("{json}");
    Ok(())
}
