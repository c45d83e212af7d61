use anyhow::Result;
use clap::Parser;
use console::style;

use super::{finish, Context};

/// Create the ledger table.
#[derive(Parser)]
pub struct InitCommand {}

impl InitCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let mut engine = ctx.engine().await?;
        let result = engine.provision().await.map_err(anyhow::Error::from);
        finish(engine, result).await?;

        println!(
            "  {} Ledger table {} is ready",
            style("✓").green(),
            style(&ctx.config().migrations.table).cyan()
        );
        Ok(())
    }
}
