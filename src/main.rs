use futures::StreamExt;
use procvisor::logger::logs_tracing;
use procvisor::parse::{parser, Config};
use procvisor::shell::run_shell;
use procvisor::{ProcessFuture, Supervisor};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::path::Path;
use tokio::time::{sleep, Duration, Instant};
use tracing::{error, info};

/// Prints the outcome of a process whenever it comes in.
fn report(fut: ProcessFuture) {
    tokio::spawn(async move {
        let name = fut.display_name().to_string();
        match fut.await {
            Ok(outcome) => println!("[{}] pid {} exited with code {}", name, outcome.process_id, outcome.exit_code),
            Err(err) => eprintln!("{}", err),
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "config/config.yml".to_string());
    let cfg: Config = parser(&path)?;
    std::fs::create_dir_all(&cfg.log_dir)?;
    let _guard = logs_tracing(&cfg.log_dir, "procvisor.log", &cfg.log_level)?;

    let supervisor = Supervisor::with_invalidate_on_error(cfg.invalidate_on_error);
    info!(config = %path, programs = cfg.programs.len(), "starting");

    for (name, prog) in &cfg.programs {
        match prog.to_request(name) {
            Ok(request) => report(supervisor.spawn(request)),
            Err(e) => {
                error!(program = %name, error = %e, "cannot prepare program");
                eprintln!("cannot start `{}`: {}", name, e);
            }
        }
    }

    // SIGINT/SIGTERM: stop everything and refuse new work
    let signals = Signals::new([SIGINT, SIGTERM])?;
    let signals_handle = signals.handle();
    let on_signal = supervisor.clone();
    let signal_task = tokio::spawn(async move {
        let mut signals = signals;
        while let Some(signal) = signals.next().await {
            info!(signal, "received signal, invalidating");
            on_signal.invalidate().await;
        }
    });

    let history = Path::new(&cfg.log_dir).join("history.txt");
    run_shell(
        &history,
        || {
            let supervisor = supervisor.clone();
            async move {
                let active = supervisor.list_active();
                if active.is_empty() {
                    println!("no running processes");
                }
                for p in active {
                    let state = if p.cancelled { "  (cancelled)" } else { "" };
                    println!("{:>7}  {}  {}{}", p.id, p.started_at.format("%H:%M:%S"), p.display_name, state);
                }
                if supervisor.is_invalid() {
                    println!("supervisor is invalidated");
                }
            }
        },
        |line: &str| {
            let supervisor = supervisor.clone();
            let line = line.to_string();
            async move { report(supervisor.spawn(line)) }
        },
        || {
            let supervisor = supervisor.clone();
            async move {
                let count = supervisor.running().len();
                supervisor.kill_remaining().await;
                println!("killed {} process(es)", count);
            }
        },
        || {
            let supervisor = supervisor.clone();
            async move {
                supervisor.invalidate().await;
                println!("supervisor invalidated");
            }
        },
    )
    .await?;

    supervisor.kill_remaining().await;
    let deadline = Instant::now() + Duration::from_secs(2);
    while !supervisor.running().is_empty() && Instant::now() < deadline {
        sleep(Duration::from_millis(50)).await;
    }

    signals_handle.close();
    let _ = signal_task.await;
    info!("shutdown complete");
    Ok(())
}
