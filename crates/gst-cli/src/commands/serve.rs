use std::path::Path;

use anyhow::Result;

pub fn run(pairs_file: &Path, legacy: bool) -> Result<()> {
    serve(pairs_file, legacy)
}

#[cfg(target_os = "windows")]
fn serve(pairs_file: &Path, legacy: bool) -> Result<()> {
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Arc;
    use std::thread;

    use anyhow::Context;
    use tracing::{info, warn};

    use gst_core::ipc::pipe::PipeListener;
    use gst_core::ipc::{
        serve_connection, serve_legacy_connection, CHANNEL_NAME, LEGACY_CHANNEL_NAME,
    };
    use gst_core::orchestrator::TranslationPair;

    let content = fs::read_to_string(pairs_file)
        .with_context(|| format!("cannot read {}", pairs_file.display()))?;
    let pairs: Vec<TranslationPair> =
        serde_json::from_str(&content).context("pairs file is not a JSON pair list")?;
    let table: Arc<HashMap<String, String>> = Arc::new(
        pairs
            .into_iter()
            .map(|p| (p.original, p.translated))
            .collect(),
    );

    let channel = if legacy { LEGACY_CHANNEL_NAME } else { CHANNEL_NAME };
    let listener = PipeListener::bind(channel);
    info!("serving {} translations on {}", table.len(), channel);
    println!("Serving on {} (ctrl-c to stop).", channel);

    loop {
        let (reader, writer) = match listener.accept() {
            Ok(connection) => connection,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };

        let table = Arc::clone(&table);
        thread::spawn(move || {
            let outcome = if legacy {
                serve_legacy_connection(reader, writer, table.as_ref())
            } else {
                serve_connection(reader, writer, table.as_ref())
            };
            match outcome {
                Ok(stats) => info!(
                    "session ended: {} request(s), {} log line(s)",
                    stats.requests_served, stats.log_messages
                ),
                Err(e) => warn!("session failed: {}", e),
            }
        });
    }
}

#[cfg(not(target_os = "windows"))]
fn serve(_pairs_file: &Path, _legacy: bool) -> Result<()> {
    anyhow::bail!("the translation channel server is only supported on Windows")
}
