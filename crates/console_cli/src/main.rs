//! Console host - runs one command console over stdin/stdout
//!
//! Each input line is handed to a [`ShellOrchestrator`]. Results go to
//! stdout (errors to stderr); output of interactive sessions is streamed
//! with a `[session-N]` prefix as it arrives.
//!
//! # Usage
//!
//! ```text
//! console [--config <path>] [--cwd <dir>]
//! ```
//!
//! `exit` or end of input stops every job and session and quits.
//!
//! # Environment Variables
//!
//! - `CONSOLE_LOG` - Log filter (default: "info"), written to stderr

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use ext_console::{ConsoleConfig, ExecutionResult, SessionEvent, ShellOrchestrator};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const PROMPT: &str = "console> ";

struct Args {
    config: Option<PathBuf>,
    cwd: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = env::args().skip(1);
    let mut parsed = Args {
        config: None,
        cwd: None,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                parsed.config = Some(PathBuf::from(
                    args.next().context("--config requires a path")?,
                ));
            }
            "--cwd" => {
                parsed.cwd = Some(PathBuf::from(
                    args.next().context("--cwd requires a directory")?,
                ));
            }
            other => bail!("unknown argument: {}", other),
        }
    }
    Ok(parsed)
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_env("CONSOLE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    rt.block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => ConsoleConfig::load(path)?,
        None => ConsoleConfig::default(),
    };

    let mut builder = ShellOrchestrator::builder(config);
    if let Some(cwd) = args.cwd {
        builder = builder.working_directory(cwd);
    }
    let mut console = builder.build()?;

    // Session output is printed by one writer task so lines never interleave.
    let (print_tx, mut print_rx) = mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(text) = print_rx.recv().await {
            if stdout.write_all(text.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let _ = print_tx.send(PROMPT.to_string());

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed == "exit" || trimmed == "quit" {
            break;
        }

        let result = console.execute(&line).await;
        report(&result, &print_tx);

        if let Some(id) = &result.interactive_session_id {
            if let Some(events) = console.take_session_events(id) {
                tokio::spawn(forward_session(id.clone(), events, print_tx.clone()));
            }
        }
        let _ = print_tx.send(PROMPT.to_string());
    }

    console.shutdown().await;
    drop(print_tx);
    let _ = printer.await;
    Ok(())
}

fn report(result: &ExecutionResult, out: &mpsc::UnboundedSender<String>) {
    if !result.output.is_empty() {
        let _ = out.send(format!("{}\n", result.output));
    }
    if let Some(error) = &result.error_message {
        eprintln!("{}", error);
    }
}

async fn forward_session(
    id: String,
    mut events: mpsc::Receiver<SessionEvent>,
    out: mpsc::UnboundedSender<String>,
) {
    while let Some(event) = events.recv().await {
        let text = match event {
            SessionEvent::Stdout(line) => format!("[{}] {}\n", id, line),
            SessionEvent::Stderr(line) => format!("[{}] ! {}\n", id, line),
            SessionEvent::Close(Some(code)) => format!("[{}] exited ({})\n", id, code),
            SessionEvent::Close(None) => format!("[{}] terminated\n", id),
        };
        if out.send(text).is_err() {
            break;
        }
    }
}
