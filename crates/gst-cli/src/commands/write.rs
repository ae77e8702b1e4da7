use anyhow::{bail, Result};

use gst_core::orchestrator::write_memory;

use super::parse_address;

pub fn run(pid: u32, address: &str, bytes: &str) -> Result<()> {
    let address = parse_address(address)?;

    let mut payload = Vec::new();
    for token in bytes.split_whitespace() {
        payload.push(u8::from_str_radix(token, 16).map_err(|e| {
            anyhow::anyhow!("invalid byte token {:?}: {}", token, e)
        })?);
    }
    if payload.is_empty() {
        bail!("no bytes to write");
    }

    if write_memory(pid, address, &payload)? {
        println!("Wrote {} byte(s) at {:#x}.", payload.len(), address);
    } else {
        bail!("short write at {:#x}", address);
    }
    Ok(())
}
