use anyhow::Result;
use clap::Parser;
use console::style;
use dialoguer::Select;

use dbman_core::migration::Direction;
use dbman_runtime::PgMigrationEngine;

use super::{finish, Context};

/// Apply one pending migration.
#[derive(Parser)]
pub struct ApplyCommand {
    /// Migration to apply; prompts when omitted.
    pub name: Option<String>,
}

impl ApplyCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let mut engine = ctx.engine().await?;
        let result = run_one(ctx, &mut engine, Direction::Forward, self.name).await;
        finish(engine, result).await
    }
}

/// Revert one applied migration.
#[derive(Parser)]
pub struct RevertCommand {
    /// Migration to revert; prompts when omitted.
    pub name: Option<String>,
}

impl RevertCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let mut engine = ctx.engine().await?;
        let result = run_one(ctx, &mut engine, Direction::Reverse, self.name).await;
        finish(engine, result).await
    }
}

/// Run a single unit, asking which one when no name is given.
pub(super) async fn run_one(
    ctx: &Context,
    engine: &mut PgMigrationEngine,
    direction: Direction,
    name: Option<String>,
) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => {
            let candidates = match direction {
                Direction::Forward => engine.list_pending().await?,
                Direction::Reverse => engine.list_rollback_candidates().await?,
            };
            match pick(&candidates, direction)? {
                Some(name) => name,
                None => return Ok(()),
            }
        }
    };

    let outcome = match direction {
        Direction::Forward => engine.apply(&name).await?,
        Direction::Reverse => engine.revert(&name).await?,
    };

    let verb = match outcome.direction {
        Direction::Forward => "Applied",
        Direction::Reverse => "Reverted",
    };
    println!("  {} {} {}", style("✓").green(), verb, style(&outcome.name).cyan());

    ctx.refresh_enums(engine).await
}

/// Prompt for one of `candidates`. `None` when there is nothing to pick or
/// the prompt was dismissed.
fn pick(candidates: &[String], direction: Direction) -> Result<Option<String>> {
    if candidates.is_empty() {
        println!("  {} No migrations to run", style("ℹ").blue());
        return Ok(None);
    }

    let prompt = match direction {
        Direction::Forward => "Select a migration to apply",
        Direction::Reverse => "Select a migration to revert",
    };
    let selection = Select::new()
        .with_prompt(prompt)
        .items(candidates)
        .default(0)
        .interact_opt()?;

    Ok(selection.map(|index| candidates[index].clone()))
}
