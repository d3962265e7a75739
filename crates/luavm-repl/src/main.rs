//! luavm REPL entry point.
//!
//! Creates one interactive VM and wires it to the terminal: stdin lines go
//! to the interpreter, session output is printed while attached. `:detach`
//! stops printing without stopping the interpreter, and `:attach` shows
//! everything that accumulated in the meantime.
//!
//! Logs go to stderr; session output goes to stdout.

mod command;
mod config;

use anyhow::Context;
use command::Command;
use config::ReplConfig;
use luavm_core::{CoreError, Orchestrator, OrchestratorConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs on stderr so they never interleave with session output
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("luavm=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = OrchestratorConfig::from_env();
    let repl = ReplConfig::from_env();
    tracing::info!(?config, ?repl, "Configuration loaded");

    let orchestrator = Arc::new(Orchestrator::new(config).context("invalid configuration")?);
    let info = orchestrator
        .create_interactive_vm(&repl.session_id, repl.networked, true)
        .context("failed to start interactive session")?;
    tracing::info!(session_id = %info.id, pid = ?info.pid, "Session ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let printer = tokio::spawn(print_output(
        Arc::clone(&orchestrator),
        repl.session_id.clone(),
        repl.poll_interval,
        shutdown_rx,
    ));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = signal::ctrl_c() => {
                tracing::info!("Received interrupt");
                break;
            }
        };
        let Some(line) = line else {
            tracing::info!("End of input");
            break;
        };
        if !handle_line(&orchestrator, &repl, &line).await? {
            break;
        }
    }

    tracing::info!("Shutting down");
    let _ = shutdown_tx.send(true);
    orchestrator.shutdown().await;
    let _ = printer.await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Act on one input line. Returns `false` when the REPL should exit.
async fn handle_line(
    orchestrator: &Orchestrator,
    repl: &ReplConfig,
    line: &str,
) -> anyhow::Result<bool> {
    let id = repl.session_id.as_str();
    match command::parse(line) {
        Command::Input(text) => match orchestrator.send_input(id, &format!("{text}\n")) {
            Ok(()) => {}
            Err(e @ (CoreError::NotRunning(_) | CoreError::NotFound { .. })) => {
                tracing::warn!(session_id = %id, error = %e, "Session is gone");
                return Ok(false);
            }
            Err(e) => report(&e),
        },
        Command::Attach => match orchestrator.attach_to_vm(id) {
            Ok(()) => status("attached").await?,
            Err(e) => report(&e),
        },
        Command::Detach => match orchestrator.detach_from_vm(id) {
            Ok(()) => status("detached; the interpreter keeps running (:attach to return)").await?,
            Err(e) => report(&e),
        },
        Command::Sessions => {
            let sessions = orchestrator.sessions().list_sessions();
            print_json(&serde_json::to_string_pretty(&sessions)?).await?;
        }
        Command::Vms => {
            print_json(&serde_json::to_string_pretty(&orchestrator.vm_infos())?).await?;
        }
        Command::Stats => {
            print_json(&serde_json::to_string_pretty(&orchestrator.pool_snapshot())?).await?;
        }
        Command::Exec(code) => exec_once(orchestrator, repl, code).await?,
        Command::Help => status(command::HELP).await?,
        Command::Quit => return Ok(false),
        Command::Unknown(name) => status(&format!("unknown command :{name} (try :help)")).await?,
    }
    Ok(true)
}

/// Run code on the side VM through the worker pool and print the outcome.
async fn exec_once(orchestrator: &Orchestrator, repl: &ReplConfig, code: &str) -> anyhow::Result<()> {
    let vm_id = repl.exec_vm_id();
    match orchestrator.create_vm(&vm_id, repl.networked) {
        Ok(_) | Err(CoreError::AlreadyExists { .. }) => {}
        Err(e) => {
            report(&e);
            return Ok(());
        }
    }

    let handle = match orchestrator.execute_vm_async(&vm_id, code, Some(repl.exec_timeout)) {
        Ok(handle) => handle,
        Err(e) => {
            report(&e);
            return Ok(());
        }
    };
    status(&format!(
        "queued {} on {} at {}",
        handle.id(),
        handle.vm_id(),
        handle.submitted_at().format("%H:%M:%S")
    ))
    .await?;

    // The execution timeout bounds the run; allow a little slack for queueing.
    let wait = repl.exec_timeout + Duration::from_secs(5);
    match handle.wait(Some(wait)).await {
        Ok(Some(outcome)) => print_json(&serde_json::to_string_pretty(&outcome)?).await?,
        Ok(None) => status(&format!("operation {} still {}", handle.id(), handle.status())).await?,
        Err(e) => report(&e),
    }
    Ok(())
}

/// Print session output while attached until shutdown or the session ends.
async fn print_output(
    orchestrator: Arc<Orchestrator>,
    id: String,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut stdout = tokio::io::stdout();
    loop {
        if *shutdown.borrow() {
            break;
        }
        let Some(info) = orchestrator.sessions().get_session(&id) else {
            break;
        };

        if !info.attached {
            // Leave output buffered until someone attaches.
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => continue,
                _ = shutdown.changed() => break,
            }
        }

        let chunk = tokio::select! {
            chunk = orchestrator.read_output(&id, poll_interval) => chunk,
            _ = shutdown.changed() => break,
        };
        match chunk {
            Ok(Some(text)) => {
                if stdout.write_all(text.as_bytes()).await.is_err() {
                    break;
                }
                let _ = stdout.flush().await;
            }
            Ok(None) if !info.running => {
                tracing::info!(session_id = %id, "Interpreter exited");
                break;
            }
            Ok(None) => {}
            Err(_) => break,
        }
    }
}

async fn status(message: &str) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("[luavm] {message}\n").as_bytes()).await?;
    stdout.flush().await
}

async fn print_json(json: &str) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(json.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

fn report(error: &CoreError) {
    tracing::error!(kind = ?error.kind(), error = %error, "Command failed");
}
