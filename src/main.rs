use clap::Parser;
use gradesheetd::config::{Cli, DaemonConfig};
use gradesheetd::{ipc, telemetry};
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    let config = match DaemonConfig::load().and_then(|c| c.apply_cli(Cli::parse())) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("gradesheetd: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = telemetry::init(&config.telemetry) {
        eprintln!("gradesheetd: {e}");
        return ExitCode::FAILURE;
    }

    let mut state = ipc::AppState::new(config.utc_offset_minutes);
    if let Some(path) = config.workspace.clone() {
        // A bad startup workspace is not fatal; the host can select another.
        if let Err(e) = ipc::select_workspace(&mut state, path) {
            tracing::error!(error = ?e, "failed to open configured workspace");
        }
    }
    tracing::info!(
        utc_offset_minutes = config.utc_offset_minutes,
        "gradesheetd ready"
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                tracing::warn!(error = %e, "unparseable request line");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    tracing::info!("stdin closed, exiting");
    ExitCode::SUCCESS
}
