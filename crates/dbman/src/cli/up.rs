use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use dbman_core::error::DbmanError;
use dbman_runtime::PgMigrationEngine;

use super::{finish, header, Context};

/// Apply every pending migration.
#[derive(Parser)]
pub struct UpCommand {}

impl UpCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let mut engine = ctx.engine().await?;
        let result = run_all(ctx, &mut engine).await;
        finish(engine, result).await
    }
}

/// Apply all pending units, stopping at the first failure.
pub(super) async fn run_all(ctx: &Context, engine: &mut PgMigrationEngine) -> Result<()> {
    header("Migrations");

    let pending = engine.list_pending().await?;
    if pending.is_empty() {
        println!("  {} No migrations to run", style("ℹ").blue());
        println!();
        return Ok(());
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(format!("Running {} pending migration(s)...", pending.len()));

    let result = engine.run_all_pending().await;
    pb.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if let Some(applied) = committed_before_failure(&e) {
                print_applied(applied);
                println!(
                    "  {} {} migration(s) committed before the failure",
                    style("!").yellow(),
                    applied.len()
                );
                println!();
            }
            return Err(e.into());
        }
    };
    print_applied(&report.applied);
    println!();
    println!(
        "  {} {} migration(s) applied",
        style("✓").green(),
        report.applied.len()
    );

    ctx.refresh_enums(engine).await?;
    println!();
    Ok(())
}

fn print_applied(names: &[String]) {
    for name in names {
        println!("  {} Applied {}", style("✓").green(), style(name).cyan());
    }
}

/// Units a halted run committed before it stopped.
fn committed_before_failure(err: &DbmanError) -> Option<&[String]> {
    match err {
        DbmanError::RunHalted { applied, .. } => Some(applied.as_slice()),
        _ => None,
    }
}
