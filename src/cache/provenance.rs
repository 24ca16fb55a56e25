/// Provenance sidecar: metadata recorded at fetch time and persisted beside
/// the cached content so later validation needs no network round-trip.
use crate::config::types::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// URI the content was fetched from
    #[serde(default)]
    pub source: String,
    /// Last-Modified token, replayed as If-Modified-Since
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<String>,
    /// Content type reported by the transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctype: Option<String>,
    /// Fingerprints of the TLS peer certificates
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls_certs: Vec<String>,
    /// Fingerprints of certificates signing every archive entry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jar_certs: Vec<String>,
}

impl Provenance {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ..Self::default()
        }
    }

    /// Load from an open (and locked) sidecar. An empty or unreadable
    /// sidecar yields empty provenance, which simply disables the
    /// conditional request.
    pub fn load(file: &mut File) -> Result<Self> {
        file.seek(SeekFrom::Start(0))?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        match serde_json::from_str(&content) {
            Ok(props) => Ok(props),
            Err(e) => {
                warn!("Ignoring corrupt provenance sidecar: {}", e);
                Ok(Self::default())
            }
        }
    }

    /// Replace the sidecar's contents with this provenance.
    pub fn store(&self, file: &mut File) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        clear(file)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        Ok(())
    }
}

/// Truncate a sidecar to zero length, keeping the handle (and its lock).
pub fn clear(file: &mut File) -> Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    Ok(())
}
