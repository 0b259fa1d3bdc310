//! Cached representation of a static resource

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;

/// Compressed variants an artifact may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Encoding {
    Gzip,
    Deflate,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable once stored. A re-fetch builds a new one under the same key.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub last_modified: Option<String>,
    pub compressed: BTreeMap<Encoding, Bytes>,
    /// Unix milliseconds
    pub created_at: u64,
}

impl Artifact {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            content_type: None,
            last_modified: None,
            compressed: BTreeMap::new(),
            created_at: crate::common::timestamp_now_millis(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_last_modified(mut self, last_modified: impl Into<String>) -> Self {
        self.last_modified = Some(last_modified.into());
        self
    }

    pub fn with_variants(mut self, compressed: BTreeMap<Encoding, Bytes>) -> Self {
        self.compressed = compressed;
        self
    }

    pub fn variant(&self, encoding: Encoding) -> Option<&Bytes> {
        self.compressed.get(&encoding)
    }

    /// Bytes held by the body plus every variant
    pub fn size(&self) -> usize {
        self.body.len() + self.compressed.values().map(Bytes::len).sum::<usize>()
    }
}

/// Cache key for a path served under a version tag
pub fn cache_key(tag: &str, path: &str) -> String {
    format!("{}#{}", tag, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key("1.0.2", "/css/a.css"), "1.0.2#/css/a.css");
        assert_eq!(cache_key("", "/img/a.png"), "#/img/a.png");
    }

    #[test]
    fn test_size_counts_variants() {
        let mut variants = BTreeMap::new();
        variants.insert(Encoding::Gzip, Bytes::from_static(b"abc"));
        let artifact = Artifact::new("hello").with_variants(variants);
        assert_eq!(artifact.size(), 8);
        assert!(artifact.variant(Encoding::Deflate).is_none());
    }
}
