use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use gst_core::process::inject_module;

pub fn run(pid: u32, dll: &Path) -> Result<()> {
    let dll = dll
        .canonicalize()
        .with_context(|| format!("cannot resolve {}", dll.display()))?;
    let Some(path) = dll.to_str() else {
        bail!("module path is not valid unicode: {}", dll.display());
    };

    info!("loading {} into pid {}", path, pid);
    inject_module(pid, path)?;
    println!("Module loaded into pid {}.", pid);
    Ok(())
}
