// goals.rs: Goal subcommands: list, show, refresh, add, watch.

use std::sync::Arc;

use anyhow::bail;
use clap::Subcommand;
use gs_sync::{GoalEngine, GoalRecord, SyncEvent};
use tokio::sync::broadcast::error::RecvError;

use super::{truncate, Context};

#[derive(Subcommand)]
pub enum GoalsCommands {
    /// List goals, fetching from the server.
    List {
        /// Show the cached goals only; no network call.
        #[arg(long)]
        stale: bool,
    },
    /// Show details for one goal.
    Show {
        /// Goal slug.
        slug: String,
    },
    /// Re-fetch one goal from the server.
    Refresh {
        /// Goal slug.
        slug: String,
    },
    /// Add a datapoint, e.g. `goalsync goals add pushups '12 "after lunch"'`.
    Add {
        /// Goal slug.
        slug: String,
        /// Datapoint text: `[day] value ["comment"]`.
        urtext: String,
        /// Wait until the server has finished processing the goal.
        #[arg(long)]
        wait: bool,
    },
    /// Fetch goals, then follow reconciliation until every goal settles.
    Watch,
}

pub async fn execute(cmd: &GoalsCommands, ctx: &Context) -> anyhow::Result<()> {
    let engine = &ctx.engine;
    match cmd {
        GoalsCommands::List { stale } => list_goals(engine, *stale).await,
        GoalsCommands::Show { slug } => show_goal(engine, slug).await,
        GoalsCommands::Refresh { slug } => refresh_goal(engine, slug).await,
        GoalsCommands::Add { slug, urtext, wait } => add_datapoint(engine, slug, urtext, *wait).await,
        GoalsCommands::Watch => watch(engine).await,
    }
}

/// Goals to display and where they came from.
struct Listing {
    goals: Vec<Arc<GoalRecord>>,
    /// The fetch failed and `goals` is the last saved snapshot.
    stale: bool,
}

/// Fetch, falling back to the last known goals when the server can't be reached.
async fn fetch_or_stale(engine: &GoalEngine) -> anyhow::Result<Listing> {
    match engine.refresh_goals().await {
        Ok(goals) if !engine.session().is_signed_in() && goals.is_empty() => {
            bail!("not signed in; pass --username and --token or add a [session] table to config.toml")
        }
        Ok(goals) => Ok(Listing { goals, stale: false }),
        Err(e) if e.is_unauthorized() => bail!("the server rejected the access token: {}", e),
        Err(e) => {
            let Some(goals) = engine.stale_snapshot() else {
                return Err(e.into());
            };
            eprintln!("warning: {} (showing cached goals)", e);
            Ok(Listing { goals, stale: true })
        }
    }
}

/// Find a goal by slug, using the cache first and the server if needed.
async fn resolve(engine: &GoalEngine, slug: &str) -> anyhow::Result<Arc<GoalRecord>> {
    if let Some(record) = engine.record_by_slug(slug) {
        return Ok(record);
    }
    fetch_or_stale(engine).await?;
    match engine.record_by_slug(slug) {
        Some(record) => Ok(record),
        None => bail!("no goal with slug '{}'", slug),
    }
}

async fn list_goals(engine: &GoalEngine, stale: bool) -> anyhow::Result<()> {
    let goals = if stale {
        engine.stale_snapshot()
    } else {
        Some(fetch_or_stale(engine).await?.goals)
    };

    let Some(goals) = goals else {
        println!("No goals cached yet. Run `goalsync goals list` to fetch them.");
        return Ok(());
    };
    if goals.is_empty() {
        println!("No goals.");
        return Ok(());
    }

    println!("{:<22} {:<30} {:<8} {:<30}", "SLUG", "TITLE", "STATE", "SAFETY");
    println!("{}", "-".repeat(92));
    for record in &goals {
        record.read(|g| {
            println!(
                "{:<22} {:<30} {:<8} {:<30}",
                truncate(&g.slug, 20),
                truncate(&g.title, 28),
                if g.queued { "queued" } else { "ok" },
                truncate(&g.capital_safesum(), 30),
            );
        });
    }
    match engine.fetched_at() {
        Some(at) => println!(
            "\n{} goal(s), fetched {}.",
            goals.len(),
            at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("\n{} goal(s), from the last saved snapshot.", goals.len()),
    }
    Ok(())
}

async fn show_goal(engine: &GoalEngine, slug: &str) -> anyhow::Result<()> {
    let record = resolve(engine, slug).await?;
    print_goal(&record);
    Ok(())
}

fn print_goal(record: &GoalRecord) {
    let g = record.fields();
    println!("Goal:     {}", g.slug);
    println!("ID:       {}", record.id());
    println!("Title:    {}", g.title);
    println!("State:    {}", if g.queued { "queued (server is updating)" } else { "up to date" });
    println!("Pledge:   ${:.2}", g.pledge);
    if let Some(rate) = g.rate {
        println!("Rate:     {} per {}", rate, g.humanized_runits());
    }
    println!("Lane:     {}", g.relative_lane());
    if !g.delta_text.is_empty() {
        println!("Delta:    {}", g.delta_text);
    }
    if let Some(safesum) = g.safesum.as_deref().filter(|s| !s.is_empty()) {
        println!("Safety:   {}", safesum);
    }
    if let Some(at) = g.lasttouch {
        println!("Touched:  {}", at.to_rfc3339());
    }
    if g.is_data_provided_automatically() {
        println!("Data:     automatic ({})", g.autodata);
    } else if g.hide_data_entry() {
        println!("Data:     goal is won; no manual entry");
    }
    if !g.recent_data.is_empty() {
        println!("Recent:");
        for dp in &g.recent_data {
            println!("  {:<10} {:>10} {}", dp.daystamp, dp.value, dp.comment);
        }
    }
}

async fn refresh_goal(engine: &GoalEngine, slug: &str) -> anyhow::Result<()> {
    let record = resolve(engine, slug).await?;
    engine.refresh_one(record.id()).await?;
    print_goal(&record);
    Ok(())
}

async fn add_datapoint(engine: &GoalEngine, slug: &str, urtext: &str, wait: bool) -> anyhow::Result<()> {
    let record = resolve(engine, slug).await?;
    if record.read(|g| g.hide_data_entry()) {
        bail!("goal '{}' does not accept manual data", slug);
    }

    let record = engine.add_datapoint(record.id(), urtext).await?;
    println!("Added to {}: {}", slug, urtext);

    if wait && record.is_queued() {
        println!("Waiting for the server to process {}...", slug);
        if let Err(e) = engine.wait_until_settled(&record).await {
            bail!("goal did not settle: {}", e);
        }
    }
    println!("{}", record.read(|g| g.brief_summary()));
    Ok(())
}

async fn watch(engine: &GoalEngine) -> anyhow::Result<()> {
    // Subscribe before fetching so the loop's start is not missed.
    let mut events = engine.subscribe();
    let Listing { goals, stale } = fetch_or_stale(engine).await?;

    let queued: Vec<String> = goals
        .iter()
        .filter(|r| r.is_queued())
        .map(|r| r.slug())
        .collect();
    if queued.is_empty() {
        println!("All {} goal(s) up to date.", goals.len());
        return Ok(());
    }
    println!("Queued: {}", queued.join(", "));
    if stale {
        // Nothing will reconcile cached goals while the server is unreachable.
        bail!("cannot follow queued goals without reaching the server");
    }

    loop {
        match events.recv().await {
            Ok(SyncEvent::ReconciliationStarted) => println!("Reconciling queued goals..."),
            Ok(SyncEvent::GoalsUpdated) => {
                let still: Vec<String> = engine
                    .stale_snapshot()
                    .unwrap_or_default()
                    .iter()
                    .filter(|r| r.is_queued())
                    .map(|r| r.slug())
                    .collect();
                if !still.is_empty() {
                    println!("  still queued: {}", still.join(", "));
                }
            }
            Ok(SyncEvent::ReconciliationFinished { rounds, error }) => {
                match error {
                    Some(e) => println!("Reconciliation stopped after {} round(s): {}", rounds, e),
                    None => println!("All goals settled after {} round(s).", rounds),
                }
                return Ok(());
            }
            Ok(SyncEvent::SignedOut) => bail!("signed out while watching"),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}
