//! Canonical version strings for overlay metadata.
//!
//! Overlay authors write versions in assorted shapes ("1.2", "1.02.3",
//! "2.0.1-rc1"). Annotated entry nodes carry the canonical rendition so the
//! same release always compares and displays identically.

use std::fmt;

/// A dotted numeric version with an optional trailing suffix.
///
/// Parsing is lenient: leading dotted numeric components are collected,
/// anything after the first non-numeric component is kept verbatim as the
/// suffix. The canonical form always has at least three components.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Version {
    components: Vec<u64>,
    suffix: String,
}

impl Version {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let mut components = Vec::new();
        let mut rest = "";
        for (i, part) in text.split('.').enumerate() {
            match part.parse::<u64>() {
                Ok(n) => components.push(n),
                Err(_) => {
                    // Everything from this component on is the suffix.
                    rest = &text[text
                        .split('.')
                        .take(i)
                        .map(|p| p.len() + 1)
                        .sum::<usize>()..];
                    break;
                }
            }
        }
        let mut version = Self {
            components,
            suffix: rest.to_string(),
        };
        while version.components.len() < 3 {
            version.components.push(0);
        }
        version
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .components
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(".");
        if self.suffix.is_empty() {
            write!(f, "{joined}")
        } else {
            write!(f, "{joined}.{}", self.suffix)
        }
    }
}
