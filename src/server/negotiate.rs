//! Content negotiation: which encodings, extensions and conditional
//! responses a request may receive

use crate::common::extname;
use crate::store::{keys, ConfigStore};
use axum::http::{header, HeaderMap, Method};
use std::str::FromStr;
use std::sync::Arc;

/// Header names some firewalls produce when they mangle `Accept-Encoding`
const OBFUSCATED_NAMES: [&str; 2] = ["accept-encodxng", "x-cept-encoding"];
const FILLER: [char; 3] = ['x', '~', '-'];
const FILLER_NAME_LEN: usize = 15;
const MIN_FILLER_RUN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Gzip,
    Deflate,
    Extension,
    NotModified,
}

impl FromStr for Capability {
    type Err = crate::Error;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            "gzip" => Ok(Capability::Gzip),
            "deflate" => Ok(Capability::Deflate),
            "extension" => Ok(Capability::Extension),
            "304" => Ok(Capability::NotModified),
            other => Err(crate::Error::Validation(format!(
                "unknown capability: {}",
                other
            ))),
        }
    }
}

/// The parts of a request negotiation looks at. `path` is the path after
/// any `/versions:<tag>` prefix has been stripped.
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
}

#[derive(Debug, Clone)]
pub struct ContentNegotiator {
    store: Arc<ConfigStore>,
}

impl ContentNegotiator {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self { store }
    }

    /// String-keyed variant of [`allows`](Self::allows); unknown kinds are refused
    pub fn allows_kind(&self, kind: &str, request: &RequestInfo<'_>) -> bool {
        kind.parse()
            .map(|capability| self.allows(capability, request))
            .unwrap_or(false)
    }

    pub fn allows(&self, capability: Capability, request: &RequestInfo<'_>) -> bool {
        match capability {
            Capability::Gzip => accepts_gzip(request.headers),
            Capability::Deflate => header_str(request.headers, header::ACCEPT_ENCODING)
                .to_ascii_lowercase()
                .contains("deflate"),
            Capability::Extension => self.allows_extension(request.path),
            Capability::NotModified => {
                *request.method == Method::GET
                    && (request.headers.contains_key(header::IF_NONE_MATCH)
                        || request.headers.contains_key(header::IF_MODIFIED_SINCE))
            }
        }
    }

    fn allows_extension(&self, path: &str) -> bool {
        let extension = extname(path);
        let forced = self.store.get_bool(keys::FORCE_EXTENSIONS).unwrap_or(true);
        if forced && extension.is_empty() {
            return false;
        }
        !self
            .store
            .get_strings(keys::BLACKLISTED_EXTENSIONS)
            .iter()
            .any(|blocked| blocked == extension)
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> &str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn accepts_gzip(headers: &HeaderMap) -> bool {
    // IE 5 and 6 before SP2 advertise gzip but mishandle it
    let ua = header_str(headers, header::USER_AGENT).to_ascii_lowercase();
    if (ua.contains("msie 5") || ua.contains("msie 6")) && !ua.contains("sv1") {
        return false;
    }

    if header_str(headers, header::ACCEPT_ENCODING)
        .to_ascii_lowercase()
        .contains("gzip")
    {
        return true;
    }

    headers.iter().any(|(name, value)| {
        is_obfuscated_name(name.as_str())
            && value.to_str().map(is_obfuscated_value).unwrap_or(false)
    })
}

fn is_obfuscated_name(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    if OBFUSCATED_NAMES.contains(&name.as_str()) {
        return true;
    }
    name.len() == FILLER_NAME_LEN
        && FILLER
            .iter()
            .any(|filler| name.chars().all(|c| c == *filler))
}

fn is_obfuscated_value(value: &str) -> bool {
    let value = value.trim().to_ascii_lowercase();
    if value.starts_with("gzip") || value.starts_with("deflate") {
        return true;
    }
    let run = value
        .chars()
        .rev()
        .take_while(|c| FILLER.contains(c))
        .count();
    run >= MIN_FILLER_RUN
}
