mod codegen;
mod init;
mod menu;
mod migrate;
mod new;
mod status;
mod up;

pub use codegen::CodegenCommand;
pub use init::InitCommand;
pub use menu::MenuCommand;
pub use migrate::{ApplyCommand, RevertCommand};
pub use new::NewCommand;
pub use status::StatusCommand;
pub use up::UpCommand;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use tracing::debug;

use dbman_codegen::EnumGenerator;
use dbman_core::config::DbmanConfig;
use dbman_runtime::{Database, MigrationEngine, MigrationStore, PgMigrationEngine};

/// Config file looked up when `--config` is not given.
const DEFAULT_CONFIG: &str = "dbman.toml";

/// Line-oriented config used when `dbman.toml` is absent.
const FALLBACK_CONFIG: &str = ".dbenv";

/// dbman - PostgreSQL migration manager
#[derive(Parser)]
#[command(name = "dbman")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (defaults to dbman.toml, then .dbenv).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Show debug logs.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Scaffold a new migration.
    New(NewCommand),

    /// Create the ledger table.
    Init(InitCommand),

    /// Show applied, pending and orphaned migrations.
    Status(StatusCommand),

    /// Apply every pending migration.
    Up(UpCommand),

    /// Apply one pending migration.
    Apply(ApplyCommand),

    /// Revert one applied migration.
    Revert(RevertCommand),

    /// Generate TypeScript enums from the database.
    Codegen(CodegenCommand),

    /// Interactive menu (default).
    Menu(MenuCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        init_tracing(self.verbose);

        let ctx = Context::load(self.config.as_deref())?;
        match self.command.unwrap_or(Commands::Menu(MenuCommand::default())) {
            Commands::New(cmd) => cmd.execute(&ctx).await,
            Commands::Init(cmd) => cmd.execute(&ctx).await,
            Commands::Status(cmd) => cmd.execute(&ctx).await,
            Commands::Up(cmd) => cmd.execute(&ctx).await,
            Commands::Apply(cmd) => cmd.execute(&ctx).await,
            Commands::Revert(cmd) => cmd.execute(&ctx).await,
            Commands::Codegen(cmd) => cmd.execute(&ctx).await,
            Commands::Menu(cmd) => cmd.execute(&ctx).await,
        }
    }
}

fn init_tracing(verbose: bool) {
    let log_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve the config file relative to `base`.
fn resolve_config_path(base: &Path, explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        let path = base.join(path);
        if !path.exists() {
            anyhow::bail!("Configuration file not found: {}", path.display());
        }
        return Ok(path);
    }

    [DEFAULT_CONFIG, FALLBACK_CONFIG]
        .iter()
        .map(|name| base.join(name))
        .find(|path| path.exists())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Configuration file not found: {} or {}\nCreate one with your database settings.",
                DEFAULT_CONFIG,
                FALLBACK_CONFIG
            )
        })
}

/// Loaded configuration shared by all commands.
pub struct Context {
    config: DbmanConfig,
}

impl Context {
    fn load(explicit: Option<&Path>) -> Result<Self> {
        // Load .env if present so ${VAR} references resolve
        dotenvy::dotenv().ok();

        let current_dir = std::env::current_dir()?;
        let path = resolve_config_path(&current_dir, explicit)?;
        debug!("Using configuration {}", path.display());

        Ok(Self {
            config: DbmanConfig::from_file(&path)?,
        })
    }

    pub fn config(&self) -> &DbmanConfig {
        &self.config
    }

    pub fn store(&self) -> MigrationStore {
        MigrationStore::new(&self.config.migrations)
    }

    /// Connect and build an engine over the single session.
    pub async fn engine(&self) -> Result<PgMigrationEngine> {
        let db = Database::connect(&self.config.database).await?;
        Ok(MigrationEngine::from_config(
            &self.config.migrations,
            db.session(),
        )?)
    }

    /// Regenerate enum files after a schema change, when configured.
    pub async fn refresh_enums(&self, engine: &mut PgMigrationEngine) -> Result<()> {
        if let Some(dir) = &self.config.codegen.enums_dir {
            write_enums(engine, dir).await?;
        }
        Ok(())
    }
}

/// Close the engine's connection once a command is done with it, whether or
/// not the command succeeded.
pub async fn finish<T>(engine: PgMigrationEngine, result: Result<T>) -> Result<T> {
    engine.into_session().close().await;
    result
}

/// Read enum types from the database and write them to `dir`.
pub async fn write_enums(engine: &mut PgMigrationEngine, dir: &Path) -> Result<()> {
    let types = engine.session_mut().enum_types().await?;
    let written = EnumGenerator::new(dir).generate(&types)?;
    println!(
        "  {} Generated {} enum file(s) in {}",
        style("✓").green(),
        written.len(),
        dir.display()
    );
    Ok(())
}

/// One line naming the error and each cause after it.
pub fn render_error(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}

/// Section header printed before command output.
pub fn header(title: &str) {
    println!();
    println!("  {} {}", style("dbman").bold().cyan(), style(title).bold());
    println!();
}
