mod compile;
mod ipc;
mod table;

use std::io::{self, BufRead, Write};

use anyhow::Result;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // stdout carries the protocol; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply with an id we failed to parse.
                let reply = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                writeln!(stdout, "{reply}")?;
                stdout.flush()?;
                continue;
            }
        };

        debug!(id = %req.id, method = %req.method, "handling request");
        let resp = ipc::handle_request(req);
        writeln!(stdout, "{resp}")?;
        stdout.flush()?;
    }

    Ok(())
}
