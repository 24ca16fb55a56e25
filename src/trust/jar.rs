//! Signed-archive verification.
//!
//! Computes the certificates that sign *every* content entry of an archive,
//! the way a signed jar is checked: the PKCS#7 block signs the `.SF` file,
//! the `.SF` file carries digests of the manifest, and the manifest carries
//! digests of each entry. Any broken link in that chain is a corrupt archive.
//! Entries under `META-INF/` are not required to be signed.

use crate::config::types::{LaunchError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedData, SignerIdentifier, SignerInfo};
use der::oid::{AssociatedOid, ObjectIdentifier};
use der::{Decode, Encode};
use log::{debug, warn};
use dsa::signature::hazmat::PrehashVerifier;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use x509_cert::Certificate;
use zip::ZipArchive;

pub const MANIFEST: &str = "META-INF/MANIFEST.MF";

const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const ID_DSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10040.4.1");
const ID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

/// Upper bound on buffer preallocation from sizes declared in zip headers
const MAX_PREALLOC: u64 = 1 << 20;
const MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HashAlg {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlg {
    /// Manifest attribute spelling, e.g. `SHA-256` in `SHA-256-Digest`.
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "SHA1" | "SHA-1" => Some(Self::Sha1),
            "SHA-256" => Some(Self::Sha256),
            "SHA-384" => Some(Self::Sha384),
            "SHA-512" => Some(Self::Sha512),
            _ => None,
        }
    }

    fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        if *oid == Sha1::OID {
            Some(Self::Sha1)
        } else if *oid == Sha256::OID {
            Some(Self::Sha256)
        } else if *oid == Sha384::OID {
            Some(Self::Sha384)
        } else if *oid == Sha512::OID {
            Some(Self::Sha512)
        } else {
            None
        }
    }

    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    fn pkcs1v15(self) -> Pkcs1v15Sign {
        match self {
            Self::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
            Self::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
            Self::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
            Self::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
        }
    }
}

/// Public key of a signature block's signer
enum SignerKey {
    Rsa(RsaPublicKey),
    Dsa(dsa::VerifyingKey),
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
}

impl SignerKey {
    /// `None` for key types whose signatures are not checked.
    fn from_certificate(cert: &Certificate) -> std::result::Result<Option<Self>, String> {
        let spki = &cert.tbs_certificate.subject_public_key_info;
        let der = spki.to_der().map_err(|e| e.to_string())?;
        let oid = spki.algorithm.oid;
        let key = if oid == RSA_ENCRYPTION {
            Self::Rsa(RsaPublicKey::from_public_key_der(&der).map_err(|e| e.to_string())?)
        } else if oid == ID_DSA {
            Self::Dsa(dsa::VerifyingKey::from_public_key_der(&der).map_err(|e| e.to_string())?)
        } else if oid == ID_EC_PUBLIC_KEY {
            if let Ok(key) = p256::ecdsa::VerifyingKey::from_public_key_der(&der) {
                Self::P256(key)
            } else if let Ok(key) = p384::ecdsa::VerifyingKey::from_public_key_der(&der) {
                Self::P384(key)
            } else {
                debug!("Skipping signature block on unsupported curve");
                return Ok(None);
            }
        } else {
            debug!("Skipping signature block with key algorithm {}", oid);
            return Ok(None);
        };
        Ok(Some(key))
    }

    fn verify(&self, alg: HashAlg, message: &[u8], signature: &[u8]) -> bool {
        let hashed = alg.digest(message);
        match self {
            Self::Rsa(key) => key.verify(alg.pkcs1v15(), &hashed, signature).is_ok(),
            Self::Dsa(key) => {
                // leftmost bits of the digest, as wide as the subgroup order
                let width = key.components().q().bits() / 8;
                let hashed = &hashed[..hashed.len().min(width)];
                match dsa::Signature::try_from(signature) {
                    Ok(sig) => key.verify_prehash(hashed, &sig).is_ok(),
                    Err(_) => false,
                }
            }
            Self::P256(key) => match p256::ecdsa::Signature::from_der(signature) {
                Ok(sig) => key.verify_prehash(&hashed, &sig).is_ok(),
                Err(_) => false,
            },
            Self::P384(key) => match p384::ecdsa::Signature::from_der(signature) {
                Ok(sig) => key.verify_prehash(&hashed, &sig).is_ok(),
                Err(_) => false,
            },
        }
    }
}

/// One main or per-entry section of a manifest-format file
#[derive(Debug, Clone, Default)]
pub struct Section {
    /// Exact bytes of the section, including its terminating blank line
    pub raw: Vec<u8>,
    pub attrs: Vec<(String, String)>,
}

impl Section {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Check every `<ALG><suffix>` digest attribute against `data`.
    ///
    /// `Some(true)` when at least one known algorithm is present and all of
    /// them match, `Some(false)` on any mismatch, `None` when there is
    /// nothing to check.
    fn check_digests(&self, suffix: &str, data: &[u8]) -> Option<bool> {
        let mut checked = false;
        for (name, value) in &self.attrs {
            if name.len() <= suffix.len() || !name.is_char_boundary(name.len() - suffix.len()) {
                continue;
            }
            let (alg, tail) = name.split_at(name.len() - suffix.len());
            if !tail.eq_ignore_ascii_case(suffix) {
                continue;
            }
            let Some(alg) = HashAlg::from_name(alg) else {
                continue;
            };
            if STANDARD.encode(alg.digest(data)) != value.trim() {
                return Some(false);
            }
            checked = true;
        }
        checked.then_some(true)
    }
}

/// Split manifest-format bytes into sections. The first is the main section.
pub fn parse_manifest(bytes: &[u8]) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current = Section::default();
    let mut start = 0;
    let mut pos = 0;

    while pos < bytes.len() {
        let line_start = pos;
        while pos < bytes.len() && bytes[pos] != b'\n' && bytes[pos] != b'\r' {
            pos += 1;
        }
        let content = &bytes[line_start..pos];
        if pos < bytes.len() {
            if bytes[pos] == b'\r' && bytes.get(pos + 1) == Some(&b'\n') {
                pos += 1;
            }
            pos += 1;
        }

        if content.is_empty() {
            if line_start > start {
                current.raw = bytes[start..pos].to_vec();
                sections.push(std::mem::take(&mut current));
            }
            start = pos;
            continue;
        }

        let text = String::from_utf8_lossy(content);
        if let Some(rest) = text.strip_prefix(' ') {
            if let Some(last) = current.attrs.last_mut() {
                last.1.push_str(rest);
            }
            continue;
        }
        if let Some((name, value)) = text.split_once(':') {
            let value = value.strip_prefix(' ').unwrap_or(value);
            current.attrs.push((name.to_string(), value.to_string()));
        }
    }

    if start < bytes.len() {
        current.raw = bytes[start..].to_vec();
        sections.push(current);
    }
    sections
}

/// Capacity to reserve for an entry whose header declares `declared` bytes.
fn prealloc(declared: u64) -> usize {
    declared.min(MAX_PREALLOC) as usize
}

fn corrupt(uri: &str, details: impl Into<String>) -> LaunchError {
    LaunchError::CorruptArchive {
        uri: uri.to_string(),
        details: details.into(),
    }
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    uri: &str,
) -> Result<Option<Vec<u8>>> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut buf = Vec::with_capacity(prealloc(entry.size()));
            entry.read_to_end(&mut buf)?;
            Ok(Some(buf))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(corrupt(uri, e.to_string())),
    }
}

/// Certificates (DER) of the CMS signer, or `None` when the block uses a
/// key type whose signatures are not checked.
fn verify_block(block: &[u8], signed: &[u8]) -> std::result::Result<Option<Vec<Vec<u8>>>, String> {
    let info = ContentInfo::from_der(block).map_err(|e| format!("signature block: {}", e))?;
    let content = info.content.to_der().map_err(|e| e.to_string())?;
    let data = SignedData::from_der(&content).map_err(|e| format!("signed data: {}", e))?;

    let certs: Vec<Certificate> = data
        .certificates
        .as_ref()
        .map(|set| {
            set.0
                .iter()
                .filter_map(|choice| match choice {
                    CertificateChoices::Certificate(cert) => Some(cert.clone()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    let signer: &SignerInfo = data
        .signer_infos
        .0
        .iter()
        .next()
        .ok_or_else(|| "no signer info".to_string())?;

    let cert = match &signer.sid {
        SignerIdentifier::IssuerAndSerialNumber(id) => certs.iter().find(|c| {
            c.tbs_certificate.issuer == id.issuer
                && c.tbs_certificate.serial_number == id.serial_number
        }),
        SignerIdentifier::SubjectKeyIdentifier(_) => certs.first(),
    }
    .ok_or_else(|| "signer certificate missing".to_string())?;

    let Some(key) = SignerKey::from_certificate(cert)? else {
        return Ok(None);
    };

    let alg = HashAlg::from_oid(&signer.digest_alg.oid)
        .ok_or_else(|| format!("unsupported digest algorithm {}", signer.digest_alg.oid))?;

    let message = match &signer.signed_attrs {
        Some(attrs) => {
            let expected = attrs
                .iter()
                .find(|attr| attr.oid == MESSAGE_DIGEST)
                .and_then(|attr| attr.values.iter().next())
                .map(|value| value.value().to_vec())
                .ok_or_else(|| "message digest attribute missing".to_string())?;
            if expected != alg.digest(signed) {
                return Err("signature file digest mismatch".to_string());
            }
            attrs.to_der().map_err(|e| e.to_string())?
        }
        None => signed.to_vec(),
    };

    if !key.verify(alg, &message, signer.signature.as_bytes()) {
        return Err("bad signature".to_string());
    }

    certs
        .iter()
        .map(|c| c.to_der().map_err(|e| e.to_string()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(Some)
}

/// Names covered by a verified `.SF` file, after checking its manifest digests.
fn covered_names(sf: &[Section], manifest: &[u8], sections: &BTreeMap<String, Section>) -> std::result::Result<BTreeSet<String>, String> {
    let mut ret = BTreeSet::new();
    let Some((main, entries)) = sf.split_first() else {
        return Ok(ret);
    };
    let whole = main.check_digests("-Digest-Manifest", manifest) == Some(true);

    for entry in entries {
        let Some(name) = entry.attr("Name") else {
            continue;
        };
        if !whole {
            let section = sections
                .get(name)
                .ok_or_else(|| format!("{} signed but not in manifest", name))?;
            match entry.check_digests("-Digest", &section.raw) {
                Some(true) => {}
                Some(false) => return Err(format!("manifest section digest mismatch for {}", name)),
                None => continue,
            }
        }
        ret.insert(name.to_string());
    }
    Ok(ret)
}

fn is_signature_file(name: &str) -> bool {
    let Some(rest) = name.strip_prefix("META-INF/") else {
        return false;
    };
    !rest.contains('/') && rest.len() > 3 && rest.to_ascii_uppercase().ends_with(".SF")
}

/// DER certificates that sign every content entry of the archive at `path`.
///
/// Empty when the archive is unsigned or any content entry is unsigned.
/// `uri` names the archive in errors.
pub fn archive_signers(path: &Path, uri: &str) -> Result<Vec<Vec<u8>>> {
    let file = BufReader::new(File::open(path)?);
    let mut archive = ZipArchive::new(file).map_err(|e| corrupt(uri, e.to_string()))?;

    let Some(manifest) = read_entry(&mut archive, MANIFEST, uri)? else {
        return Ok(Vec::new());
    };
    let mut sections = BTreeMap::new();
    for section in parse_manifest(&manifest).into_iter().skip(1) {
        if let Some(name) = section.attr("Name") {
            sections.insert(name.to_string(), section.clone());
        }
    }

    let sf_names: Vec<String> = archive
        .file_names()
        .filter(|n| is_signature_file(n))
        .map(str::to_string)
        .collect();

    // signer chain -> names it covers
    let mut signers: Vec<(Vec<Vec<u8>>, BTreeSet<String>)> = Vec::new();
    for sf_name in &sf_names {
        let stem = &sf_name[..sf_name.len() - 3];
        let mut block = None;
        for ext in ["RSA", "DSA", "EC"] {
            if let Some(bytes) = read_entry(&mut archive, &format!("{}.{}", stem, ext), uri)? {
                block = Some(bytes);
                break;
            }
        }
        let Some(block) = block else {
            warn!("{}: signature file {} has no signature block", uri, sf_name);
            continue;
        };
        let Some(sf) = read_entry(&mut archive, sf_name, uri)? else {
            continue;
        };

        let Some(chain) = verify_block(&block, &sf).map_err(|e| corrupt(uri, format!("{}: {}", sf_name, e)))? else {
            continue;
        };
        let names = covered_names(&parse_manifest(&sf), &manifest, &sections)
            .map_err(|e| corrupt(uri, e))?;
        signers.push((chain, names));
    }

    if signers.is_empty() {
        return Ok(Vec::new());
    }

    let mut common: Option<BTreeSet<Vec<u8>>> = None;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| corrupt(uri, e.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut data = Vec::with_capacity(prealloc(entry.size()));
        entry.read_to_end(&mut data)?;

        if let Some(section) = sections.get(&name) {
            if section.check_digests("-Digest", &data) == Some(false) {
                return Err(corrupt(uri, format!("digest mismatch for {}", name)));
            }
        }
        if name.starts_with("META-INF/") {
            continue;
        }

        let mut certs = BTreeSet::new();
        if sections.get(&name).and_then(|s| s.check_digests("-Digest", &data)) == Some(true) {
            for (chain, names) in &signers {
                if names.contains(&name) {
                    certs.extend(chain.iter().cloned());
                }
            }
        }
        if certs.is_empty() {
            debug!("{}: entry {} is unsigned", uri, name);
            return Ok(Vec::new());
        }
        common = Some(match common {
            None => certs,
            Some(prev) => prev.intersection(&certs).cloned().collect(),
        });
    }

    Ok(common.map(|set| set.into_iter().collect()).unwrap_or_default())
}
