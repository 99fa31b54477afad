use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;

use depotplan::api::{self, OptimizeArgs};

#[derive(Parser, Debug)]
#[command(
    name = "depotplan",
    about = "Fund savings projection under German capital gains tax"
)]
struct Cli {
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Project a portfolio described in a JSON file.
    Project {
        #[arg(long)]
        input: PathBuf,
    },
    /// Plan how to spread realization of a gains pool across years.
    Optimize(OptimizeArgs),
    /// List the built-in historical indices.
    Indices,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

async fn dispatch(command: Command) -> Result<(), String> {
    match command {
        Command::Serve { port } => api::run_http_server(port)
            .await
            .map_err(|e| format!("Server error: {e}")),
        Command::Project { input } => {
            let json = std::fs::read_to_string(&input)
                .map_err(|e| format!("cannot read {}: {e}", input.display()))?;
            print_json(&api::project_from_json(&json)?)
        }
        Command::Optimize(args) => print_json(&api::run_optimization(args)?),
        Command::Indices => print_json(&api::indices()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    depotplan::log::init_logging(cli.verbose);

    if let Err(e) = dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
