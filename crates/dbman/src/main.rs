mod cli;

use clap::Parser;
use console::style;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    if let Err(e) = cli.execute().await {
        eprintln!("{} {}", style("error:").red().bold(), cli::render_error(&e));
        std::process::exit(1);
    }
}
