//! Bounded write-through translation cache with binary persistence.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// `"GSTC"` little-endian.
const CACHE_MAGIC: u32 = 0x4753_5443;
const CACHE_VERSION: u32 = 1;

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Mapping from original to translated string, bounded by an LRU policy:
/// a lookup refreshes the entry's recency and a full cache evicts the least
/// recently used key.
///
/// Lookups and insertions count hits and misses as monotonic counters; the
/// caller wraps the whole cache in a mutex and holds it only for map
/// operations.
#[derive(Debug)]
pub struct TranslationCache {
    entries: HashMap<String, String>,
    recency: HashMap<String, u64>,
    tick: u64,
    max_entries: usize,
    hits: u64,
    misses: u64,
}

impl TranslationCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: HashMap::new(),
            tick: 0,
            max_entries: max_entries.max(1),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a translation, counting the hit or miss and refreshing the
    /// entry's recency.
    pub fn get(&mut self, original: &str) -> Option<String> {
        match self.entries.get(original) {
            Some(translated) => {
                let translated = translated.clone();
                self.hits += 1;
                self.touch(original);
                Some(translated)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert a translation, evicting the least recently used entry when the
    /// cache is full.
    pub fn put(&mut self, original: impl Into<String>, translated: impl Into<String>) {
        let original = original.into();
        if !self.entries.contains_key(&original) && self.entries.len() >= self.max_entries {
            self.evict_lru();
        }
        self.entries.insert(original.clone(), translated.into());
        self.touch(&original);
    }

    /// Membership test; does not count as a hit or a miss.
    pub fn contains(&self, original: &str) -> bool {
        self.entries.contains_key(original)
    }

    pub fn remove(&mut self, original: &str) {
        self.entries.remove(original);
        self.recency.remove(original);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.entries.iter()
    }

    fn touch(&mut self, original: &str) {
        self.tick += 1;
        self.recency.insert(original.to_string(), self.tick);
    }

    fn evict_lru(&mut self) {
        let victim = self
            .recency
            .iter()
            .min_by_key(|(_, &tick)| tick)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            debug!("cache full, evicting {:?}", key);
            self.entries.remove(&key);
            self.recency.remove(&key);
        }
    }

    /// Persist every entry in the binary cache format.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(&CACHE_MAGIC.to_le_bytes())?;
        writer.write_all(&CACHE_VERSION.to_le_bytes())?;
        writer.write_all(&(self.entries.len() as u32).to_le_bytes())?;

        for (original, translated) in &self.entries {
            write_utf16_field(&mut writer, original)?;
            write_utf16_field(&mut writer, translated)?;
        }

        writer.flush()?;
        info!(
            "saved {} cache entries to {}",
            self.entries.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Replace the in-memory contents with the entries from `path`.
    ///
    /// A bad magic or version leaves the cache untouched and reports the file
    /// as invalid; a truncated file loads the entries that parse.
    pub fn load_from<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let file = File::open(&path)?;
        let mut reader = BufReader::new(file);

        let magic = read_u32(&mut reader)?;
        let version = read_u32(&mut reader)?;
        if magic != CACHE_MAGIC {
            return Err(Error::CacheFileInvalid(format!(
                "bad magic {:#010x}",
                magic
            )));
        }
        if version != CACHE_VERSION {
            return Err(Error::CacheFileInvalid(format!(
                "unsupported version {}",
                version
            )));
        }
        let count = read_u32(&mut reader)?;

        let mut loaded = HashMap::new();
        for _ in 0..count {
            let original = match read_utf16_field(&mut reader) {
                Ok(value) => value,
                Err(e) => {
                    warn!("cache file truncated: {}", e);
                    break;
                }
            };
            let translated = match read_utf16_field(&mut reader) {
                Ok(value) => value,
                Err(e) => {
                    warn!("cache file truncated: {}", e);
                    break;
                }
            };
            loaded.insert(original, translated);
        }

        self.clear();
        for (original, translated) in loaded {
            self.put(original, translated);
        }
        info!(
            "loaded {} cache entries from {}",
            self.entries.len(),
            path.as_ref().display()
        );
        Ok(self.entries.len())
    }
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

fn write_utf16_field<W: Write>(writer: &mut W, text: &str) -> Result<()> {
    let units: Vec<u16> = text.encode_utf16().collect();
    writer.write_all(&(units.len() as u32).to_le_bytes())?;
    for unit in units {
        writer.write_all(&unit.to_le_bytes())?;
    }
    Ok(())
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_utf16_field<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_u32(reader)? as usize;
    let mut bytes = vec![0u8; len * 2];
    reader.read_exact(&mut bytes)?;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units))
}
