//! Named byte resources (impulse responses).

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Resolves a resource name to raw bytes. Implementations may block; they
/// are only ever called off the audio thread.
pub trait ResourceProvider: Send + Sync {
    fn fetch(&self, name: &str) -> Result<Vec<u8>>;
}

/// Looks up `<root>/<name>.wav`, or `<root>/<name>` when the name already
/// carries an extension.
#[derive(Debug, Clone)]
pub struct DirProvider {
    root: PathBuf,
}

impl DirProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        let candidate = self.root.join(name);
        if candidate.extension().is_some() {
            candidate
        } else {
            candidate.with_extension("wav")
        }
    }
}

impl ResourceProvider for DirProvider {
    fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name);
        std::fs::read(&path).map_err(|e| Error::load_failed(name, format!("{}: {e}", path.display())))
    }
}

/// In-memory provider, handy for embedding and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryProvider {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.entries.insert(name.into(), bytes);
        self
    }
}

impl ResourceProvider for MemoryProvider {
    fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| Error::load_failed(name, "no such resource"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_names_get_a_wav_extension() {
        let p = DirProvider::new("/irs");
        assert_eq!(p.path_for("hall"), PathBuf::from("/irs/hall.wav"));
        assert_eq!(p.path_for("plate.aiff"), PathBuf::from("/irs/plate.aiff"));
    }

    #[test]
    fn missing_memory_entry_is_a_load_failure() {
        let p = MemoryProvider::new().with("hall", vec![1, 2, 3]);
        assert_eq!(p.fetch("hall").unwrap(), vec![1, 2, 3]);
        assert!(matches!(p.fetch("room"), Err(Error::ResourceLoadFailed { .. })));
    }
}
