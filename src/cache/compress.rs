//! Content-type gated gzip/deflate variant generation

use super::Encoding;
use crate::common::{Error, Result};
use bytes::Bytes;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::Write;

/// Binary types that still compress well
const ALLOW_LIST: [&str; 4] = [
    "application/vnd.ms-fontobject",
    "application/x-font-ttf",
    "font/opentype",
    "image/x-icon",
];

/// Textual substrings that make a MIME type compressible
const TEXTUAL: [&str; 4] = ["json", "text", "javascript", "xml"];

pub fn is_compressible(content_type: &str) -> bool {
    let mime = content_type.to_ascii_lowercase();
    let essence = mime.split(';').next().unwrap_or_default().trim();
    TEXTUAL.iter().any(|t| essence.contains(t)) || ALLOW_LIST.contains(&essence)
}

fn encode(encoding: Encoding, body: &[u8]) -> Result<Bytes> {
    let out = match encoding {
        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(body)?;
            encoder.finish()?
        }
        Encoding::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(body)?;
            encoder.finish()?
        }
    };
    Ok(Bytes::from(out))
}

async fn encode_blocking(encoding: Encoding, body: Bytes) -> Result<Bytes> {
    tokio::task::spawn_blocking(move || encode(encoding, &body))
        .await
        .map_err(|e| Error::Internal(format!("{} task failed: {}", encoding, e)))?
}

/// Build compressed variants for an eligible content type.
///
/// Both encodings run concurrently; a failed one is left out while the other
/// is kept. Ineligible types yield no variants after one scheduler turn.
pub async fn compress(content_type: &str, body: Bytes) -> BTreeMap<Encoding, Bytes> {
    let mut variants = BTreeMap::new();

    if !is_compressible(content_type) {
        tokio::task::yield_now().await;
        return variants;
    }

    let (gzip, deflate) = tokio::join!(
        encode_blocking(Encoding::Gzip, body.clone()),
        encode_blocking(Encoding::Deflate, body)
    );

    for (encoding, outcome) in [(Encoding::Gzip, gzip), (Encoding::Deflate, deflate)] {
        match outcome {
            Ok(buf) => {
                variants.insert(encoding, buf);
            }
            Err(e) => tracing::warn!(%encoding, "compression failed: {}", e),
        }
    }

    variants
}
