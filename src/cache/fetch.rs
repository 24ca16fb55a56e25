//! Transport seam for the resource cache.
//!
//! The cache talks to a [`Fetcher`]; [`SchemeFetcher`] routes `http`/`https`
//! to reqwest and `file` to the local filesystem. Tests substitute their own.

use crate::config::settings::LauncherSettings;
use crate::config::types::{LaunchError, Result};
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::header::{CONTENT_TYPE, IF_MODIFIED_SINCE, LAST_MODIFIED, REFERER, USER_AGENT};
use reqwest::StatusCode;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::sync::{Arc, Mutex};
use url::Url;

/// Conditional GET parameters
#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub uri: Url,
    pub user_agent: String,
    pub referrer: Option<Url>,
    /// Last known modification token; absent when forcing
    pub if_modified_since: Option<String>,
}

/// Transport answer. `body` is empty when `not_modified` is set.
pub struct FetchResponse {
    pub not_modified: bool,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub last_modified: Option<String>,
    /// DER certificates presented by the TLS peer, leaf first
    pub peer_certificates: Vec<Vec<u8>>,
    pub body: Box<dyn Read + Send>,
}

impl FetchResponse {
    pub fn not_modified() -> Self {
        Self {
            not_modified: true,
            content_length: None,
            content_type: None,
            last_modified: None,
            peer_certificates: Vec::new(),
            body: Box::new(std::io::empty()),
        }
    }
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("not_modified", &self.not_modified)
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .field("last_modified", &self.last_modified)
            .field("peer_certificates", &self.peer_certificates.len())
            .finish()
    }
}

/// Fetch contract used by the resource cache
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}

/// Certificate verifier that remembers the chain each server presented.
///
/// Verification itself is delegated to webpki against the bundled roots,
/// unless invalid certificates are accepted, in which case only pinning
/// protects the fetch.
#[derive(Debug)]
pub struct ChainRecorder {
    webpki: Arc<WebPkiServerVerifier>,
    algorithms: WebPkiSupportedAlgorithms,
    accept_invalid: bool,
    /// server name -> DER chain, leaf first
    chains: Mutex<HashMap<String, Vec<Vec<u8>>>>,
}

impl ChainRecorder {
    pub fn new(provider: Arc<CryptoProvider>, accept_invalid: bool) -> Result<Self> {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        let algorithms = provider.signature_verification_algorithms;
        let webpki = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| LaunchError::Config(format!("failed to build certificate verifier: {}", e)))?;
        Ok(Self {
            webpki,
            algorithms,
            accept_invalid,
            chains: Mutex::new(HashMap::new()),
        })
    }

    /// Chain last presented by `host`, leaf first.
    pub fn chain_for(&self, host: &str) -> Vec<Vec<u8>> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        self.chains
            .lock()
            .map(|chains| chains.get(host).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl ServerCertVerifier for ChainRecorder {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let chain: Vec<Vec<u8>> = std::iter::once(end_entity)
            .chain(intermediates)
            .map(|cert| cert.as_ref().to_vec())
            .collect();
        debug!("{} presented {} certificate(s)", server_name.to_str(), chain.len());
        if let Ok(mut chains) = self.chains.lock() {
            chains.insert(server_name.to_str().into_owned(), chain);
        }

        if self.accept_invalid {
            return Ok(ServerCertVerified::assertion());
        }
        self.webpki
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// HTTP(S) transport over a blocking reqwest client
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    recorder: Arc<ChainRecorder>,
}

impl HttpFetcher {
    pub fn new(settings: &LauncherSettings) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let recorder = Arc::new(ChainRecorder::new(
            Arc::clone(&provider),
            settings.accept_invalid_certs,
        )?);
        let tls = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| LaunchError::Config(format!("failed to configure TLS: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::clone(&recorder) as Arc<dyn ServerCertVerifier>)
            .with_no_client_auth();

        let client = reqwest::blocking::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.read_timeout())
            .use_preconfigured_tls(tls)
            .tls_info(true)
            .build()
            .map_err(|e| LaunchError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, recorder })
    }

    /// Chain presented for `url`, falling back to the leaf reqwest saw.
    fn peer_chain(&self, url: &Url, tls: Option<&reqwest::tls::TlsInfo>) -> Vec<Vec<u8>> {
        if url.scheme() != "https" {
            return Vec::new();
        }
        let chain = url
            .host_str()
            .map(|host| self.recorder.chain_for(host))
            .unwrap_or_default();
        if !chain.is_empty() {
            return chain;
        }
        tls.and_then(|info| info.peer_certificate())
            .map(|der| vec![der.to_vec()])
            .unwrap_or_default()
    }
}

fn header_string(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let uri = request.uri.as_str();
        let mut req = self
            .client
            .get(uri)
            .header(USER_AGENT, request.user_agent.as_str());
        if let Some(ref referrer) = request.referrer {
            req = req.header(REFERER, referrer.as_str());
        }
        if let Some(ref since) = request.if_modified_since {
            req = req.header(IF_MODIFIED_SINCE, since.as_str());
        }

        let resp = req.send().map_err(|e| LaunchError::Network {
            uri: uri.to_string(),
            details: e.to_string(),
        })?;

        let peer_certificates =
            self.peer_chain(resp.url(), resp.extensions().get::<reqwest::tls::TlsInfo>());

        let status = resp.status();
        debug!("GET {} -> {}", uri, status);
        if status == StatusCode::NOT_MODIFIED {
            let mut ret = FetchResponse::not_modified();
            ret.peer_certificates = peer_certificates;
            return Ok(ret);
        }
        if status != StatusCode::OK {
            return Err(LaunchError::HttpStatus {
                uri: uri.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(FetchResponse {
            not_modified: false,
            content_length: resp.content_length(),
            content_type: header_string(resp.headers(), CONTENT_TYPE),
            last_modified: header_string(resp.headers(), LAST_MODIFIED),
            peer_certificates,
            body: Box::new(resp),
        })
    }
}

/// `file:` transport, honouring If-Modified-Since against the file's mtime
#[derive(Debug, Default)]
pub struct FileFetcher;

fn guess_content_type(uri: &Url) -> &'static str {
    let path = uri.path().to_ascii_lowercase();
    if path.ends_with(".jar") {
        "application/java-archive"
    } else if path.ends_with(".zip") {
        "application/zip"
    } else if path.ends_with(".hl") || path.ends_with(".txt") {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

impl Fetcher for FileFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let uri = &request.uri;
        let path = uri.to_file_path().map_err(|_| LaunchError::Network {
            uri: uri.to_string(),
            details: "not a local file path".to_string(),
        })?;
        let file = File::open(&path)?;
        let meta = file.metadata()?;
        if meta.is_dir() {
            return Err(LaunchError::Network {
                uri: uri.to_string(),
                details: "is a directory".to_string(),
            });
        }

        let modified: DateTime<Utc> = meta.modified()?.into();
        if let Some(ref since) = request.if_modified_since {
            if let Ok(since) = DateTime::parse_from_rfc2822(since) {
                if modified.timestamp() <= since.timestamp() {
                    return Ok(FetchResponse::not_modified());
                }
            }
        }

        Ok(FetchResponse {
            not_modified: false,
            content_length: Some(meta.len()),
            content_type: Some(guess_content_type(uri).to_string()),
            last_modified: Some(modified.to_rfc2822()),
            peer_certificates: Vec::new(),
            body: Box::new(file),
        })
    }
}

/// Routes requests to a transport by URI scheme
pub struct SchemeFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl SchemeFetcher {
    pub fn new(settings: &LauncherSettings) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(settings)?,
            file: FileFetcher,
        })
    }
}

impl Fetcher for SchemeFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        match request.uri.scheme() {
            "http" | "https" => self.http.fetch(request),
            "file" => self.file.fetch(request),
            other => Err(LaunchError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Whether a content type denotes a signed-archive capable format
pub fn is_archive_type(ctype: &str) -> bool {
    let base = ctype.split(';').next().unwrap_or("").trim();
    matches!(
        base.to_ascii_lowercase().as_str(),
        "application/java-archive" | "application/x-java-archive" | "application/zip"
    )
}
