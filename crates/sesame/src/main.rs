use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sesame_common::{ConfigLoader, SolveOutcome, SolverConfig};
use sesame_engine::Solver;
use sesame_h::{CdpClient, CdpSession};

#[derive(Parser)]
#[command(name = "sesame", version, about = "Slider captcha solver")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Navigate to a page and solve the slider captcha on it
    Solve {
        /// Page URL to open
        #[arg(long)]
        url: String,

        /// Attach to a running browser via its DevTools websocket URL
        /// instead of launching one
        #[arg(long)]
        connect: Option<String>,

        /// Launch browser in visible mode (not headless)
        #[arg(long)]
        visible: bool,

        /// Path to the ONNX detection model; omit to rely on pixel-diff
        #[arg(long)]
        model: Option<PathBuf>,

        /// Config file (YAML); defaults to ./sesame.yaml then
        /// ~/.sesame/config.yaml
        #[arg(long)]
        config: Option<PathBuf>,

        /// Dump per-attempt screenshots into this directory
        #[arg(long)]
        debug_dir: Option<PathBuf>,

        /// Overall wall-clock budget in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging goes to stderr; stdout carries the JSON report.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sesame=info,sesame_engine=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Solve {
            url,
            connect,
            visible,
            model,
            config,
            debug_dir,
            timeout,
        } => {
            let mut config = load_config(config.as_deref()).await?;
            if model.is_some() {
                config.model_path = model;
            }
            if let Some(dir) = debug_dir {
                config.debug = true;
                config.debug_dir = dir;
            }
            run_solve(&url, connect.as_deref(), visible, config, timeout).await
        }
    }
}

async fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<SolverConfig> {
    match path {
        Some(p) => ConfigLoader::load_from(p)
            .await
            .with_context(|| format!("Failed to load config from {}", p.display())),
        None => ConfigLoader::load_default()
            .await
            .context("Failed to load default config"),
    }
}

async fn run_solve(
    url: &str,
    connect: Option<&str>,
    visible: bool,
    config: SolverConfig,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let client = match connect {
        Some(ws_url) => CdpClient::connect(ws_url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to attach to browser: {}", e))?,
        None => CdpClient::launch(visible)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to launch browser: {}", e))?,
    };

    tracing::info!("Navigating to {}", url);
    client
        .page
        .goto(url)
        .await
        .with_context(|| format!("Failed to navigate to {}", url))?;
    client
        .page
        .wait_for_navigation()
        .await
        .context("Navigation did not settle")?;

    let session = CdpSession::new(client.page.clone());
    let solver = Solver::new(session, config);

    let report = match timeout {
        Some(secs) => {
            solver
                .solve_with_deadline(Duration::from_secs(secs))
                .await
        }
        None => solver.solve().await,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Err(e) = client.close().await {
        tracing::warn!("Error closing browser: {}", e);
    }

    match report.outcome {
        SolveOutcome::Solved | SolveOutcome::NoCaptcha => Ok(()),
        SolveOutcome::Failed => anyhow::bail!("captcha not solved"),
    }
}
