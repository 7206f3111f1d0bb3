//! Graph and transaction loading with compression support.
//!
//! Graphs are stored as JSON, RON, or a packed form for transport:
//! `base64(gzip(json))`, or `raw:` + `base64(json)` when uncompressed.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use flate2::read::GzDecoder;
use predicate_core::Phase;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::types::{GraphPayload, TransactionPayload};

/// Errors that can occur during graph or transaction loading.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("Gzip decompression error: {0}")]
    DecompressError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("RON parse error: {0}")]
    RonError(#[from] ron::error::SpannedError),

    #[error("Invalid graph format: missing nodes")]
    InvalidFormat,

    #[error("Graph has no nodes")]
    EmptyGraph,

    #[error("Unknown graph file extension: {0}")]
    UnknownFormat(String),

    #[error("Transaction phases must be strictly increasing and not 'none' (at '{0}')")]
    PhaseOrder(Phase),

    #[error("Decompressed graph exceeds {0} bytes")]
    TooLarge(u64),
}

/// Largest decompressed graph accepted from a packed file.
pub const MAX_GRAPH_BYTES: u64 = 16 * 1024 * 1024;

/// On-disk encoding of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Json,
    Ron,
    Packed,
}

impl GraphFormat {
    /// Picks the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(GraphFormat::Json),
            Some("ron") => Ok(GraphFormat::Ron),
            Some("packed") => Ok(GraphFormat::Packed),
            other => Err(LoadError::UnknownFormat(other.unwrap_or("").to_string())),
        }
    }
}

/// A loaded graph with the digest of the bytes it came from.
#[derive(Debug, Clone)]
pub struct LoadedGraph {
    pub payload: GraphPayload,
    pub digest: String,
}

/// Decompresses and parses a packed graph.
///
/// Expected encoding: base64(gzip(JSON)) or "raw:" + base64(JSON)
pub fn decompress_graph(packed: &str) -> Result<GraphPayload, LoadError> {
    let packed = packed.trim();
    let json = if let Some(b64) = packed.strip_prefix("raw:") {
        let bytes = BASE64.decode(b64)?;
        String::from_utf8(bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?
    } else {
        let compressed = BASE64.decode(packed)?;
        inflate(&compressed, MAX_GRAPH_BYTES)?
    };

    parse_graph(&json, GraphFormat::Json)
}

/// Gunzips `compressed`, reading at most `limit` bytes of output.
fn inflate(compressed: &[u8], limit: u64) -> Result<String, LoadError> {
    let mut bytes = Vec::new();
    GzDecoder::new(compressed).take(limit + 1).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > limit {
        return Err(LoadError::TooLarge(limit));
    }
    String::from_utf8(bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
}

/// Parses a graph document in the given format.
pub fn parse_graph(text: &str, format: GraphFormat) -> Result<GraphPayload, LoadError> {
    let graph: GraphPayload = match format {
        GraphFormat::Packed => return decompress_graph(text),
        GraphFormat::Ron => ron::from_str(text)?,
        GraphFormat::Json => {
            let value: serde_json::Value = serde_json::from_str(text)?;
            if value.get("nodes").is_none() {
                return Err(LoadError::InvalidFormat);
            }
            serde_json::from_value(value)?
        }
    };

    if graph.nodes.is_empty() {
        return Err(LoadError::EmptyGraph);
    }
    debug!(nodes = graph.nodes.len(), rules = graph.rules.len(), "Parsed graph");
    Ok(graph)
}

/// First 16 hex chars of the SHA-256 of `bytes`.
pub fn graph_digest(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    hex::encode(&hash[..8])
}

fn read_file(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads a graph file, choosing the format by extension.
pub fn load_graph_from_file(path: &Path) -> Result<LoadedGraph, LoadError> {
    let format = GraphFormat::from_path(path)?;
    let text = read_file(path)?;
    let payload = parse_graph(&text, format)?;
    Ok(LoadedGraph {
        digest: graph_digest(text.as_bytes()),
        payload,
    })
}

/// Parses a JSON transaction and checks its phase order.
pub fn parse_transaction(text: &str) -> Result<TransactionPayload, LoadError> {
    let payload: TransactionPayload = serde_json::from_str(text)?;
    let mut last = Phase::None;
    for data in &payload.phases {
        if data.phase <= last {
            return Err(LoadError::PhaseOrder(data.phase));
        }
        last = data.phase;
    }
    Ok(payload)
}

pub fn load_transaction_from_file(path: &Path) -> Result<TransactionPayload, LoadError> {
    parse_transaction(&read_file(path)?)
}
