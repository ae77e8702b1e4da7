use anyhow::Result;

use gst_core::orchestrator::read_memory;

use super::{hexdump, parse_address};

pub fn run(pid: u32, address: &str, size: usize) -> Result<()> {
    let address = parse_address(address)?;
    let bytes = read_memory(pid, address, size)?;
    print!("{}", hexdump(address, &bytes));
    Ok(())
}
