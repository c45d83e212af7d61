use anyhow::Result;
use clap::Parser;
use console::style;
use dialoguer::{Input, Select};

use dbman_core::migration::Direction;
use dbman_runtime::PgMigrationEngine;

use super::{finish, migrate, new, render_error, status, up, write_enums, Context};

/// Interactive menu over a single connection.
#[derive(Parser, Default)]
pub struct MenuCommand {}

/// Something the user can ask for from the menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    RunAll,
    Apply,
    Revert,
    Status,
    New,
    Codegen,
}

impl MenuAction {
    const ALL: [MenuAction; 6] = [
        MenuAction::RunAll,
        MenuAction::Apply,
        MenuAction::Revert,
        MenuAction::Status,
        MenuAction::New,
        MenuAction::Codegen,
    ];

    fn label(self) -> &'static str {
        match self {
            MenuAction::RunAll => "Run all pending migrations",
            MenuAction::Apply => "Apply a migration",
            MenuAction::Revert => "Revert a migration",
            MenuAction::Status => "Show status",
            MenuAction::New => "Create a migration",
            MenuAction::Codegen => "Generate enums",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuState {
    Choose,
    Run(MenuAction),
    Quit,
}

impl MenuState {
    /// State after the user picks entry `selection`, `None` meaning the
    /// prompt was dismissed. The entry after the last action is Quit.
    fn from_selection(selection: Option<usize>) -> Self {
        match selection.and_then(|index| MenuAction::ALL.get(index)) {
            Some(action) => MenuState::Run(*action),
            None => MenuState::Quit,
        }
    }
}

fn menu_items() -> Vec<&'static str> {
    MenuAction::ALL
        .iter()
        .map(|action| action.label())
        .chain(std::iter::once("Quit"))
        .collect()
}

impl MenuCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let mut engine = ctx.engine().await?;
        let result = run_menu(ctx, &mut engine).await;
        finish(engine, result).await
    }
}

async fn run_menu(ctx: &Context, engine: &mut PgMigrationEngine) -> Result<()> {
    let items = menu_items();

    let mut state = MenuState::Choose;
    loop {
        state = match state {
            MenuState::Choose => {
                println!();
                let selection = Select::new()
                    .with_prompt("What would you like to do?")
                    .items(&items)
                    .default(0)
                    .interact_opt()?;
                MenuState::from_selection(selection)
            }
            MenuState::Run(action) => {
                if let Err(e) = run_action(ctx, engine, action).await {
                    println!("  {} {}", style("✗").red(), render_error(&e));
                }
                MenuState::Choose
            }
            MenuState::Quit => return Ok(()),
        };
    }
}

async fn run_action(ctx: &Context, engine: &mut PgMigrationEngine, action: MenuAction) -> Result<()> {
    match action {
        MenuAction::RunAll => up::run_all(ctx, engine).await,
        MenuAction::Apply => migrate::run_one(ctx, engine, Direction::Forward, None).await,
        MenuAction::Revert => migrate::run_one(ctx, engine, Direction::Reverse, None).await,
        MenuAction::Status => status::print_status(engine, false).await,
        MenuAction::New => {
            let description: String = Input::new()
                .with_prompt("Description")
                .interact_text()?;
            new::scaffold(ctx, &description).await
        }
        MenuAction::Codegen => match &ctx.config().codegen.enums_dir {
            Some(dir) => write_enums(engine, dir).await,
            None => anyhow::bail!("Set codegen.enums_dir in the config to generate enums"),
        },
    }
}
