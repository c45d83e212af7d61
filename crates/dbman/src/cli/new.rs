use anyhow::Result;
use clap::Parser;
use console::style;

use super::Context;

/// Scaffold a new migration.
#[derive(Parser)]
pub struct NewCommand {
    /// Description of the change, e.g. `add users table`.
    #[arg(required = true, num_args = 1..)]
    pub description: Vec<String>,
}

impl NewCommand {
    pub fn description(&self) -> String {
        self.description.join(" ")
    }

    pub async fn execute(self, ctx: &Context) -> Result<()> {
        scaffold(ctx, &self.description()).await
    }
}

/// Create the unit directory with empty forward and reverse scripts.
pub(super) async fn scaffold(ctx: &Context, description: &str) -> Result<()> {
    let store = ctx.store();
    let name = store.create(description).await?;

    println!("  {} Created migration {}", style("✓").green(), style(&name).cyan());
    println!(
        "    {} {}",
        style("→").dim(),
        store.root().join(&name).display()
    );
    Ok(())
}
