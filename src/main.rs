mod ipc;

use anyhow::Context;
use clap::Parser;
use kioskstore::config::Config;
use std::io::{self, BufRead, Write};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cfg = Config::parse();
    init_logging(&cfg.log_level);

    let mut state = ipc::AppState { store: None };
    if let Some(dir) = cfg.data_dir.clone() {
        let store = ipc::OpenStore::open(Some(dir.clone()), &cfg.tenant, cfg.backend)
            .with_context(|| format!("failed to open store at {}", dir.display()))?;
        info!(
            tenant = %cfg.tenant,
            backend = cfg.backend.as_str(),
            data_dir = %dir.display(),
            "store opened at startup"
        );
        state.store = Some(store);
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            // No id to echo back.
            Err(e) => serde_json::json!({
                "ok": false,
                "error": { "code": "bad_json", "message": e.to_string() }
            }),
        };
        let encoded = serde_json::to_string(&resp).context("failed to encode response")?;
        writeln!(stdout, "{}", encoded).context("failed to write response")?;
        stdout.flush().context("failed to flush stdout")?;
    }
    Ok(())
}
