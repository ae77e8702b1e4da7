use anyhow::Result;

use gst_core::orchestrator::scan_memory;

use super::pattern_to_bytes_mask;

pub fn run(pid: u32, pattern: &str, json: bool) -> Result<()> {
    let (bytes, mask) = pattern_to_bytes_mask(pattern)?;
    let hits = scan_memory(pid, &bytes, &mask)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    println!("{:<18} {:<18} {:>10}", "Address", "Region", "Size");
    for hit in &hits {
        println!("{:#018x} {:#018x} {:>10}", hit.address, hit.region, hit.size);
    }
    println!("{} match(es).", hits.len());
    Ok(())
}
