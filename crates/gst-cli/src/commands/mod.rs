pub mod attach;
pub mod inject;
pub mod modules;
pub mod read;
pub mod scan;
pub mod serve;
pub mod write;

use anyhow::{anyhow, Result};

/// Parse an address argument: 0x-prefixed hex or plain decimal.
pub fn parse_address(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).map_err(|e| anyhow!("invalid address {:?}: {}", input, e))
    } else {
        trimmed
            .parse::<u64>()
            .map_err(|e| anyhow!("invalid address {:?}: {}", input, e))
    }
}

/// Lower a "48 89 ?? 24" pattern string into the `(bytes, mask)` pair the
/// scanner API takes.
pub fn pattern_to_bytes_mask(pattern: &str) -> Result<(Vec<u8>, String)> {
    let parsed = gst_core::scan::parse_pattern(pattern)?;
    let bytes: Vec<u8> = parsed.iter().map(|b| b.unwrap_or(0)).collect();
    let mask: String = parsed
        .iter()
        .map(|b| if b.is_some() { 'x' } else { '?' })
        .collect();
    Ok((bytes, mask))
}

/// Format a classic 16-column hex dump with an ASCII gutter.
pub fn hexdump(base: u64, bytes: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let address = base + (row * 16) as u64;
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02X}", b)).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| {
                if (0x20..0x7F).contains(&b) {
                    b as char
                } else {
                    '.'
                }
            })
            .collect();
        out.push_str(&format!(
            "{:016X}  {:<47}  {}\n",
            address,
            hex.join(" "),
            ascii
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_address("0XFF").unwrap(), 0xFF);
        assert_eq!(parse_address("4096").unwrap(), 4096);
        assert!(parse_address("zz").is_err());
    }

    #[test]
    fn test_pattern_to_bytes_mask() {
        let (bytes, mask) = pattern_to_bytes_mask("48 89 ?? 24").unwrap();
        assert_eq!(bytes, vec![0x48, 0x89, 0x00, 0x24]);
        assert_eq!(mask, "xx?x");
    }

    #[test]
    fn test_hexdump_shape() {
        let dump = hexdump(0x1000, b"Hello, world!\x00\x01 tail");
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0000000000001000"));
        assert!(lines[0].contains("Hello, world!.."));
        assert!(lines[1].starts_with("0000000000001010"));
    }
}
