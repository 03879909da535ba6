use std::{fs, path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use nestegg::api::{self, AnalysisKind};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "nestegg",
    about = "Monte Carlo retirement planner with US federal tax, RMD and Social Security rules"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON analysis API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run a Monte Carlo simulation for the profile in a request file.
    Simulate {
        #[arg(long, help = "JSON request body, same shape as POST /api/analysis")]
        request: PathBuf,
    },
    /// Compare claiming Social Security at 62, 67 and 70.
    SocialSecurity {
        #[arg(long)]
        request: PathBuf,
    },
    RothConversion {
        #[arg(long)]
        request: PathBuf,
        #[arg(long, help = "Amount to convert; defaults to the request's conversion_amount or 50000")]
        amount: Option<f64>,
    },
    /// Search for the highest spending that meets the target success rate.
    SolveSpending {
        #[arg(long)]
        request: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (kind, request, amount) = match cli.command {
        Command::Serve { port } => {
            return match api::run_http_server(port).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    error!(%err, "server error");
                    ExitCode::FAILURE
                }
            };
        }
        Command::Simulate { request } => (AnalysisKind::Simulation, request, None),
        Command::SocialSecurity { request } => (AnalysisKind::SocialSecurity, request, None),
        Command::RothConversion { request, amount } => {
            (AnalysisKind::RothConversion, request, amount)
        }
        Command::SolveSpending { request } => (AnalysisKind::SustainableSpending, request, None),
    };

    let outcome = fs::read_to_string(&request)
        .map_err(|e| format!("Failed to read {}: {e}", request.display()))
        .and_then(|json| api::run_analysis_json(kind, &json, amount));
    match outcome {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(msg) => {
            eprintln!("Error: {msg}");
            ExitCode::FAILURE
        }
    }
}
