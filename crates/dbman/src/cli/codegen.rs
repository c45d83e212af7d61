use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use super::{finish, write_enums, Context};

/// Generate TypeScript enums from the database.
#[derive(Parser)]
pub struct CodegenCommand {
    /// Output directory; defaults to `codegen.enums_dir` from the config.
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

impl CodegenCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let Some(dir) = self.out.or_else(|| ctx.config().codegen.enums_dir.clone()) else {
            anyhow::bail!("No output directory: pass --out or set codegen.enums_dir");
        };

        let mut engine = ctx.engine().await?;
        let result = write_enums(&mut engine, &dir).await;
        finish(engine, result).await
    }
}
