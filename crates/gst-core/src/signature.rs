//! Version-keyed byte signatures for locating engine functions.
//!
//! Engine builds move their text APIs around; a signature set maps a function
//! name and engine version to the byte patterns that find it. Sets ship as
//! built-in defaults and can be overridden from a JSON file.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::scan::parse_pattern;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookSignature {
    /// Function this signature locates, e.g. `FText::ToString`.
    pub name: String,
    /// Engine version key, e.g. `UE4.27` or `UE5`.
    pub version: String,
    /// Candidate patterns, tried in order. `??` tokens are wildcards.
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookSignatureSet {
    pub signatures: Vec<HookSignature>,
}

impl HookSignatureSet {
    /// Patterns for `name` under `version`, parsed into wildcard form.
    /// Unparseable patterns are skipped rather than failing the lookup.
    pub fn patterns_for(&self, name: &str, version: &str) -> Vec<Vec<Option<u8>>> {
        self.signatures
            .iter()
            .filter(|s| s.name.eq_ignore_ascii_case(name) && s.version.eq_ignore_ascii_case(version))
            .flat_map(|s| s.patterns.iter())
            .filter_map(|p| parse_pattern(p).ok())
            .collect()
    }

    /// Merge `other` on top: its signatures are tried before the existing
    /// ones for the same name and version.
    pub fn override_with(&mut self, other: HookSignatureSet) {
        let mut merged = other.signatures;
        merged.append(&mut self.signatures);
        self.signatures = merged;
    }
}

pub fn load_signatures<P: AsRef<Path>>(path: P) -> Result<HookSignatureSet> {
    let content = fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_signatures<P: AsRef<Path>>(path: P, set: &HookSignatureSet) -> Result<()> {
    let content = serde_json::to_string_pretty(set)?;
    fs::write(path, content)?;
    Ok(())
}
