mod client;
mod output;
mod server;


use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use relay_agent::AgentMode;
use relay_stream::ReducerStatus;

#[derive(Parser, Debug)]
#[command(name = "relay", version, about = "Streams agent turn sequences to remote clients")]
struct Cli {
    /// Working directory
    #[arg(short = 'c', long = "cwd", global = true)]
    working_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the stream and control endpoints
    Serve {
        /// Listen address (overrides config)
        #[arg(short, long)]
        addr: Option<String>,
    },
    /// Run one prompt against a server and render the stream
    Run {
        #[arg(short, long)]
        prompt: String,

        #[arg(long, default_value = "coding")]
        mode: ModeArg,

        /// Server base URL (overrides config)
        #[arg(long)]
        server: Option<String>,

        /// Document to edit in document mode
        #[arg(long)]
        document_id: Option<String>,

        /// Model to use (overrides the server's default)
        #[arg(short, long)]
        model: Option<String>,

        #[arg(short = 'f', long, default_value = "text")]
        output_format: OutputFormat,

        /// Suppress thinking and tool output
        #[arg(short, long)]
        quiet: bool,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ModeArg {
    Coding,
    Document,
}

impl From<ModeArg> for AgentMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Coding => AgentMode::Coding,
            ModeArg::Document => AgentMode::Document,
        }
    }
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = relay_core::config::load_config(cli.working_dir.clone())
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    match cli.command {
        Command::Serve { addr } => {
            if !config.has_api_key() {
                tracing::warn!("no API key configured; stream requests will be rejected");
            }
            let addr = addr.unwrap_or_else(|| config.server.addr.clone());
            eprintln!("relay listening on {addr}");
            server::serve(server::AppState::new(config), &addr).await
        }
        Command::Run {
            prompt,
            mode,
            server,
            document_id,
            model,
            output_format,
            quiet,
        } => {
            let server_url = server.unwrap_or_else(|| config.client.server_url.clone());
            let request = client::RunRequest {
                prompt,
                mode: mode.into(),
                history: Vec::new(),
                working_dir: cli.working_dir.or(Some(config.working_dir.clone())),
                document_id,
                document_html: None,
                model,
            };
            run(
                &server_url,
                config.client.malformed_frame_budget,
                request,
                output_format,
                quiet,
            )
            .await
        }
    }
}

async fn run(
    server_url: &str,
    malformed_budget: usize,
    request: client::RunRequest,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let interrupt = CancellationToken::new();
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        });
    }

    let mut printer = output::BlockPrinter::new(quiet);
    let live = matches!(format, OutputFormat::Text);
    let observer = move |blocks: &[relay_stream::ExecutionBlock]| {
        if !live {
            return;
        }
        if let Err(e) = printer.render(blocks, &mut std::io::stdout().lock()) {
            tracing::debug!("render failed: {e}");
        }
    };

    let client = client::StreamClient::new(server_url, malformed_budget);
    let output = client.run(&request, observer, interrupt).await?;

    match format {
        OutputFormat::Text => {
            println!();
            eprintln!("{}", output::summary(&output));
        }
        OutputFormat::Json => {
            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &output)?;
            writeln!(stdout)?;
        }
    }

    if output.status == ReducerStatus::Errored {
        std::process::exit(1);
    }
    Ok(())
}
