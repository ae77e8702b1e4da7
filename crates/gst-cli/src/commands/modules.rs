use anyhow::Result;

use gst_core::orchestrator::{get_process_modules, has_admin_privileges, is_process_64_bit};

pub fn run(pid: u32, json: bool) -> Result<()> {
    let modules = get_process_modules(pid)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&modules)?);
        return Ok(());
    }

    println!(
        "pid {} ({}-bit target, {} privileges)",
        pid,
        if is_process_64_bit(pid)? { 64 } else { 32 },
        if has_admin_privileges() {
            "admin"
        } else {
            "user"
        }
    );
    println!("{:<40} {:<18} {:>12}", "Module", "Base", "Size");
    for module in &modules {
        println!(
            "{:<40} {:#018x} {:>12}",
            module.name, module.base, module.size
        );
    }
    Ok(())
}
