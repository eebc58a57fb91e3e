use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use backlog::cleanup::{CleanupReport, EndOfDay};
use backlog::config::BacklogConfig;
use backlog::core::Category;
use backlog::dates::{DateResolver, NaturalDates};
use backlog::ledger::{BacklogLedger, ConsumeReport};
use backlog::projectors::merge_view_projector::{self, MergeView};
use backlog::storage::Clock;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use indexmap::IndexMap;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Parser)]
#[command(
    name = "backlog",
    about = "Daily plan backlog: future tasks, end-of-day carryover and the merged view",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Add a task to the backlog for a date.
    Add(AddArgs),

    /// List open backlog tasks for a date.
    Get(GetArgs),

    /// Remove every backlog task for a date.
    Remove(DateArgs),

    /// Show the date's tasks merged with all pending carryover.
    View(ViewArgs),

    /// Remove carryover sections (all of them, or the one due from --date).
    ClearCarryover(ClearCarryoverArgs),

    /// Move unchecked tasks from a day's plan into the backlog.
    Cleanup(CleanupArgs),
}

#[derive(Debug, Args)]
struct AddArgs {
    /// Directory holding DailyPlans/ (and an optional .backlog.toml).
    root: PathBuf,
    /// Target date: YYYY-MM-DD, today, tomorrow, a weekday or "may 5".
    date: String,
    /// focus, comms, learning, work, email, message, reading or other.
    category: String,
    /// Task text.
    #[arg(required = true, num_args = 1..)]
    task: Vec<String>,
}

#[derive(Debug, Args)]
struct GetArgs {
    root: PathBuf,
    date: String,
    /// Emit JSON instead of a human-readable list.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct DateArgs {
    root: PathBuf,
    date: String,
}

#[derive(Debug, Args)]
struct ViewArgs {
    root: PathBuf,
    /// Target date. Defaults to today.
    #[arg(long)]
    date: Option<String>,
    /// Emit JSON instead of markdown.
    #[arg(long)]
    json: bool,
    /// Remove the date's tasks and all carryover once shown.
    #[arg(long)]
    consume: bool,
}

#[derive(Debug, Args)]
struct ClearCarryoverArgs {
    root: PathBuf,
    /// Due-from date of the single section to remove.
    #[arg(long)]
    date: Option<String>,
}

#[derive(Debug, Args)]
struct CleanupArgs {
    root: PathBuf,
    /// Day whose plan is cleaned up. Defaults to today.
    #[arg(long)]
    date: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Add(args) => handle_add(args),
        Commands::Get(args) => handle_get(args),
        Commands::Remove(args) => handle_remove(args),
        Commands::View(args) => handle_view(args),
        Commands::ClearCarryover(args) => handle_clear_carryover(args),
        Commands::Cleanup(args) => handle_cleanup(args),
    }
}

/// `RUST_LOG` wins; otherwise warnings only, or debug output with `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = std::env::var("RUST_LOG")
        .ok()
        .filter(|raw| !raw.trim().is_empty())
        .and_then(|raw| EnvFilter::try_new(raw.trim()).ok())
        .unwrap_or_else(|| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn open_ledger(root: &Path) -> Result<(BacklogConfig, BacklogLedger)> {
    let config =
        BacklogConfig::load(root).with_context(|| format!("loading config in {:?}", root))?;
    let ledger = BacklogLedger::open(root, &config);
    Ok((config, ledger))
}

fn resolve_date(ledger: &BacklogLedger, input: Option<&str>) -> Result<NaiveDate> {
    let today = ledger.clock().today();
    match input {
        Some(raw) => NaturalDates::new(today)
            .resolve(raw)
            .with_context(|| format!("resolving date {raw:?}")),
        None => Ok(today),
    }
}

fn handle_add(args: AddArgs) -> Result<()> {
    let AddArgs {
        root,
        date,
        category,
        task,
    } = args;
    let (_, ledger) = open_ledger(&root)?;
    let date = resolve_date(&ledger, Some(&date))?;
    let category = Category::from_key(&category);
    let text = task.join(" ");
    ledger
        .add_task(date, category, &text)
        .with_context(|| format!("adding task to {:?}", ledger.path()))?;
    println!("Added to backlog for {date} ({category}): {text}");
    Ok(())
}

fn handle_get(args: GetArgs) -> Result<()> {
    let GetArgs { root, date, json } = args;
    let (_, ledger) = open_ledger(&root)?;
    let date = resolve_date(&ledger, Some(&date))?;
    let tasks = ledger
        .tasks_for_date(date)
        .with_context(|| format!("reading {:?}", ledger.path()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
    } else {
        print!("{}", render_tasks(date, &tasks));
    }
    Ok(())
}

fn handle_remove(args: DateArgs) -> Result<()> {
    let DateArgs { root, date } = args;
    let (_, ledger) = open_ledger(&root)?;
    let date = resolve_date(&ledger, Some(&date))?;
    let removed = ledger
        .remove_tasks_for_date(date)
        .with_context(|| format!("updating {:?}", ledger.path()))?;
    if removed {
        println!("Removed backlog tasks for {date}");
    } else {
        println!("No backlog tasks found for {date}");
    }
    Ok(())
}

fn handle_view(args: ViewArgs) -> Result<()> {
    let ViewArgs {
        root,
        date,
        json,
        consume,
    } = args;
    let (_, ledger) = open_ledger(&root)?;
    let date = resolve_date(&ledger, date.as_deref())?;
    let doc = ledger
        .document()
        .with_context(|| format!("reading {:?}", ledger.path()))?;
    let view = merge_view_projector::project(&doc, date);
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print!("{}", render_view(&view));
    }
    if consume {
        let report = ledger
            .consume(date)
            .with_context(|| format!("consuming backlog for {date}"))?;
        eprintln!("{}", render_consume(date, report));
    }
    Ok(())
}

fn handle_clear_carryover(args: ClearCarryoverArgs) -> Result<()> {
    let ClearCarryoverArgs { root, date } = args;
    let (_, ledger) = open_ledger(&root)?;
    match date {
        Some(raw) => {
            let date = resolve_date(&ledger, Some(&raw))?;
            let removed = ledger
                .remove_carryover_section(date)
                .with_context(|| format!("updating {:?}", ledger.path()))?;
            if removed {
                println!("Removed carryover section due from {date}");
            } else {
                println!("No carryover section due from {date}");
            }
        }
        None => {
            let removed = ledger
                .remove_all_carryover_sections()
                .with_context(|| format!("updating {:?}", ledger.path()))?;
            println!("Removed {removed} carryover section(s)");
        }
    }
    Ok(())
}

fn handle_cleanup(args: CleanupArgs) -> Result<()> {
    let CleanupArgs { root, date } = args;
    let (config, ledger) = open_ledger(&root)?;
    let date = resolve_date(&ledger, date.as_deref())?;
    let plan_path = config.plan_path(&root, date);
    let report = EndOfDay::new(&ledger, plan_path.clone())
        .run(date)
        .with_context(|| format!("cleaning up {:?}", plan_path))?;
    print!("{}", render_cleanup(date, &report));
    if report == CleanupReport::AlreadyCarried {
        anyhow::bail!("open tasks in {:?} were not carried over", plan_path);
    }
    Ok(())
}

fn render_tasks(date: NaiveDate, tasks: &IndexMap<Category, Vec<String>>) -> String {
    if tasks.values().all(Vec::is_empty) {
        return format!("No tasks found for {date}\n");
    }
    let mut out = format!("Tasks for {date}:\n");
    for (category, list) in tasks.iter().filter(|(_, list)| !list.is_empty()) {
        out.push_str(&format!("\n{}:\n", category.key().to_uppercase()));
        for task in list {
            out.push_str(&format!("  - {task}\n"));
        }
    }
    out
}

fn render_view(view: &MergeView) -> String {
    if view.is_empty() {
        return format!("No backlog or carryover tasks for {}\n", view.date);
    }
    format!(
        "{}\n{} new, {} carried over\n",
        view.to_markdown(),
        view.new_count,
        view.carryover_count
    )
}

fn render_consume(date: NaiveDate, report: ConsumeReport) -> String {
    let scheduled = if report.date_section_removed {
        format!("removed tasks for {date}")
    } else {
        format!("no tasks for {date}")
    };
    format!(
        "Consumed backlog: {scheduled}, removed {} carryover section(s)",
        report.carryover_sections_removed
    )
}

fn render_cleanup(date: NaiveDate, report: &CleanupReport) -> String {
    match report {
        CleanupReport::NoPlan => format!("No daily plan found for {date}, nothing to clean up\n"),
        CleanupReport::AllDone => {
            "All tasks completed, nothing to carry over. Plan marked complete.\n".to_string()
        }
        CleanupReport::Carried {
            count,
            per_category,
        } => {
            let mut out = format!("Carried over {count} task(s) from {date}:\n");
            for (category, n) in per_category {
                out.push_str(&format!("  - {}: {n}\n", category.key()));
            }
            out
        }
        CleanupReport::AlreadyCarried => {
            format!("Carryover for {date} already recorded, plan left unchanged\n")
        }
    }
}
