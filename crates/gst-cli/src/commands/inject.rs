use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use gst_core::orchestrator::{inject_translations, InjectionReport, TranslationPair};

#[derive(Serialize)]
struct SavedReport<'a> {
    timestamp: String,
    pid: u32,
    #[serde(flatten)]
    report: &'a InjectionReport,
}

pub fn run(pid: u32, pairs_file: &Path, report_path: Option<&Path>) -> Result<()> {
    let content = fs::read_to_string(pairs_file)
        .with_context(|| format!("cannot read {}", pairs_file.display()))?;
    let pairs: Vec<TranslationPair> =
        serde_json::from_str(&content).context("pairs file is not a JSON pair list")?;

    info!("injecting {} pairs into pid {}", pairs.len(), pid);
    let report = inject_translations(pid, &pairs)?;

    for injected in &report.injected {
        println!(
            "{:#018x} [{}] {:?} -> {:?}",
            injected.address, injected.encoding, injected.original, injected.translated
        );
    }
    println!(
        "{} of {} pairs produced {} patched location(s).",
        pairs
            .iter()
            .filter(|p| report.injected.iter().any(|i| i.original == p.original))
            .count(),
        pairs.len(),
        report.injected_count
    );

    if let Some(path) = report_path {
        let saved = SavedReport {
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            pid,
            report: &report,
        };
        fs::write(path, serde_json::to_string_pretty(&saved)?)
            .with_context(|| format!("cannot write {}", path.display()))?;
        println!("Report saved to {}", path.display());
    }

    Ok(())
}
