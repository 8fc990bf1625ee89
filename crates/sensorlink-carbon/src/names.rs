// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device name table.
//!
//! Maps a device key (sensor id or plug hardware address) to the
//! hierarchical metric path it is published under:
//!
//! ```text
//! rfmpi-7,home.kitchen.rfmpi
//! 00:0d:6f:00:0b:12:34:56,home.office.plug.
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum NameTableError {
    #[error("failed to read name table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Read-only `device_key -> display path` lookup.
#[derive(Debug, Clone, Default)]
pub struct DeviceNames {
    names: HashMap<String, String>,
}

impl DeviceNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the table from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NameTableError> {
        let path = path.as_ref();
        let io_err = |source| NameTableError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(io_err)?;
        let names = Self::from_reader(BufReader::new(file)).map_err(io_err)?;
        debug!("Loaded {} device names from {}", names.len(), path.display());
        Ok(names)
    }

    /// Parse `key,path` lines. Blank lines and lines without a comma are
    /// skipped.
    pub fn from_reader<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut names = HashMap::new();

        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match line.split_once(',') {
                Some((key, path)) => {
                    names.insert(key.trim().to_string(), path.trim().to_string());
                }
                None => {
                    warn!(line = lineno + 1, "Name table entry without comma skipped");
                }
            }
        }

        Ok(Self { names })
    }

    /// Display path for `key`, or the key itself when unmapped.
    pub fn resolve<'a>(&'a self, key: &'a str) -> &'a str {
        match self.names.get(key) {
            Some(path) => path,
            None => {
                warn!(device = key, "No name mapped for device, using raw key");
                key
            }
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, path: impl Into<String>) {
        self.names.insert(key.into(), path.into());
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DeviceNames {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            names: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn test_parse_lines() {
        let input = "rfmpi-7,home.kitchen.rfmpi\n\n  th-1 , home.garden.th \nbroken line\n";
        let names = DeviceNames::from_reader(Cursor::new(input)).unwrap();

        assert_eq!(names.len(), 2);
        assert_eq!(names.resolve("rfmpi-7"), "home.kitchen.rfmpi");
        assert_eq!(names.resolve("th-1"), "home.garden.th");
    }

    #[test]
    fn test_unknown_key_resolves_to_raw_key() {
        let names: DeviceNames = [("a", "home.a")].into_iter().collect();
        assert_eq!(names.resolve("00:0d:6f:00:0b:12:34:56"), "00:0d:6f:00:0b:12:34:56");
    }

    #[test]
    fn test_path_keeps_text_after_first_comma() {
        let names = DeviceNames::from_reader(Cursor::new("k,a,b\n")).unwrap();
        assert_eq!(names.resolve("k"), "a,b");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "00:0d:6f:00:0b:12:34:56,home.office.plug.").unwrap();
        file.flush().unwrap();

        let names = DeviceNames::load(file.path()).unwrap();
        assert_eq!(names.resolve("00:0d:6f:00:0b:12:34:56"), "home.office.plug.");
    }

    #[test]
    fn test_load_missing_file() {
        let err = DeviceNames::load("/nonexistent/namespace.csv").unwrap_err();
        assert!(err.to_string().contains("namespace.csv"));
    }
}
