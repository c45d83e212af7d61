use anyhow::Result;
use clap::Parser;
use console::style;

use dbman_runtime::PgMigrationEngine;

use super::{finish, header, Context};

/// Show migration status.
#[derive(Parser)]
pub struct StatusCommand {
    /// Print the status as JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let mut engine = ctx.engine().await?;
        let result = print_status(&mut engine, self.json).await;
        finish(engine, result).await
    }
}

pub(super) async fn print_status(engine: &mut PgMigrationEngine, json: bool) -> Result<()> {
    let status = engine.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    header("Migration Status");

    if status.applied.is_empty() && status.pending.is_empty() && status.orphaned.is_empty() {
        println!("  {} No migrations found", style("ℹ").blue());
        println!();
        return Ok(());
    }

    if !status.applied.is_empty() {
        println!("  {} Applied:", style("✓").green());
        for m in &status.applied {
            println!(
                "    {} {} {} ({})",
                style("✓").green(),
                style(&m.name).cyan(),
                style("at").dim(),
                m.applied_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        println!();
    }

    if !status.pending.is_empty() {
        println!("  {} Pending:", style("○").yellow());
        for name in &status.pending {
            println!("    {} {}", style("→").dim(), style(name).yellow());
        }
        println!();
    }

    if !status.orphaned.is_empty() {
        println!("  {} Applied but missing on disk:", style("!").red());
        for name in &status.orphaned {
            println!("    {} {}", style("?").red(), name);
        }
        println!();
    }

    println!(
        "  {} {} applied, {} pending",
        style("ℹ").blue(),
        status.applied.len(),
        status.pending.len()
    );
    println!();
    Ok(())
}
