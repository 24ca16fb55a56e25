/// Certificate and public-key fingerprints recorded as provenance
use der::oid::ObjectIdentifier;
use der::{Decode, Encode};
use log::debug;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use sha2::{Digest, Sha256};
use x509_cert::Certificate;

const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const ID_DSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10040.4.1");

fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut dig = Sha256::new();
    for part in parts {
        dig.update(part);
    }
    hex::encode_upper(dig.finalize())
}

/// Fingerprints for one DER certificate.
///
/// Always `dig:sha256:<hex>` over the encoding; additionally `key:rsa:<hex>`
/// or `key:dsa:<hex>` over the key's defining integers in decimal, so a
/// re-issued certificate for the same key keeps matching.
pub fn certificate_fingerprints(der: &[u8]) -> Vec<String> {
    let mut ret = vec![format!("dig:sha256:{}", sha256_hex(&[der]))];
    match Certificate::from_der(der) {
        Ok(cert) => {
            if let Some(key) = key_fingerprint(&cert) {
                ret.push(key);
            }
        }
        Err(e) => debug!("Certificate not parseable, recording digest only: {}", e),
    }
    ret
}

/// Key-parameter fingerprint for RSA and DSA subjects.
pub fn key_fingerprint(cert: &Certificate) -> Option<String> {
    let spki = &cert.tbs_certificate.subject_public_key_info;
    let spki_der = spki.to_der().ok()?;

    if spki.algorithm.oid == RSA_ENCRYPTION {
        let key = rsa::RsaPublicKey::from_public_key_der(&spki_der).ok()?;
        let e = key.e().to_string();
        let n = key.n().to_string();
        return Some(format!(
            "key:rsa:{}",
            sha256_hex(&[e.as_bytes(), b":", n.as_bytes()])
        ));
    }

    if spki.algorithm.oid == ID_DSA {
        let key = dsa::VerifyingKey::from_public_key_der(&spki_der).ok()?;
        let params = key.components();
        let g = params.g().to_string();
        let p = params.p().to_string();
        let q = params.q().to_string();
        let y = key.y().to_string();
        return Some(format!(
            "key:dsa:{}",
            sha256_hex(&[
                g.as_bytes(),
                b":",
                p.as_bytes(),
                b":",
                q.as_bytes(),
                b":",
                y.as_bytes()
            ])
        ));
    }

    None
}

/// Fingerprints for a whole set of certificates, in order, deduplicated.
pub fn fingerprints<'a, I>(certs: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Vec<u8>>,
{
    let mut ret: Vec<String> = Vec::new();
    for der in certs {
        for fp in certificate_fingerprints(der) {
            if !ret.contains(&fp) {
                ret.push(fp);
            }
        }
    }
    ret
}
