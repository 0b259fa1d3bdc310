//! Known configuration keys

use std::fmt;

pub const VERSION: &str = "version";
pub const ALIASES: &str = "aliases";
pub const MAX_AGE: &str = "max age";
pub const EXPIRE_INTERNAL_CACHE: &str = "expire internal cache";
pub const POLLING_INTERVAL: &str = "polling interval";
pub const BLACKLISTED_EXTENSIONS: &str = "blacklisted extensions";
pub const FORCE_EXTENSIONS: &str = "force extensions";
pub const ORIGIN_SERVERS: &str = "origin servers";
pub const CORS: &str = "cors";
pub const PORT: &str = "port";
pub const NAMESPACE: &str = "namespace";
pub const SYNC: &str = "sync";
pub const LOG_LEVEL: &str = "log level";
pub const AUTH: &str = "auth";
pub const REDIS: &str = "redis";
pub const SERVER: &str = "server";

/// Keys whose text values are converted to milliseconds on every set
pub const DURATION_KEYS: [&str; 3] = [MAX_AGE, EXPIRE_INTERNAL_CACHE, POLLING_INTERVAL];

pub fn is_duration_key(key: &str) -> bool {
    DURATION_KEYS.contains(&key)
}

/// Keys that only hold text, even when the value looks like a number
pub const STRING_KEYS: [&str; 7] = [VERSION, AUTH, NAMESPACE, CORS, SERVER, LOG_LEVEL, REDIS];

pub fn is_string_key(key: &str) -> bool {
    STRING_KEYS.contains(&key)
}

/// Keys replicated across the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SyncKey {
    Version,
    Aliases,
}

impl SyncKey {
    pub const ALL: [SyncKey; 2] = [SyncKey::Version, SyncKey::Aliases];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKey::Version => VERSION,
            SyncKey::Aliases => ALIASES,
        }
    }

    pub fn parse(key: &str) -> Option<SyncKey> {
        match key {
            VERSION => Some(SyncKey::Version),
            ALIASES => Some(SyncKey::Aliases),
            _ => None,
        }
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_key_schema() {
        assert_eq!(SyncKey::parse("version"), Some(SyncKey::Version));
        assert_eq!(SyncKey::parse("aliases"), Some(SyncKey::Aliases));
        assert_eq!(SyncKey::parse("auth"), None);
        assert_eq!(SyncKey::Aliases.to_string(), "aliases");
    }

    #[test]
    fn test_duration_keys() {
        assert!(is_duration_key("max age"));
        assert!(!is_duration_key("version"));
        assert!(is_string_key("auth"));
        assert!(!is_string_key("port"));
    }
}
