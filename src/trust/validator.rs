/// Pinning rules evaluated against recorded provenance
use crate::cache::provenance::Provenance;
use crate::config::types::{LaunchError, Result};
use log::{debug, warn};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Validator {
    /// Accept content fetched over TLS from a peer with this fingerprint
    TlsCert(String),
    /// Accept archives whose every entry is signed by this fingerprint
    JarCert(String),
    Always,
}

impl Validator {
    /// Parse `KIND:ARG`. Unparseable specs yield `None` and are logged.
    pub fn parse(spec: &str) -> Option<Self> {
        if spec == "always" {
            return Some(Validator::Always);
        }
        let Some((kind, arg)) = spec.split_once(':') else {
            warn!("Ignoring validator without kind separator: {}", spec);
            return None;
        };
        match kind {
            "tls-cert" => Some(Validator::TlsCert(arg.to_string())),
            "jar-cert" => Some(Validator::JarCert(arg.to_string())),
            "always" => Some(Validator::Always),
            other => {
                warn!("Ignoring validator of unknown kind {}: {}", other, spec);
                None
            }
        }
    }

    /// Check one rule; the error is a human-readable rejection reason.
    pub fn check(&self, props: &Provenance) -> std::result::Result<(), String> {
        match self {
            Validator::TlsCert(key) if props.tls_certs.iter().any(|k| k == key) => Ok(()),
            Validator::TlsCert(key) => Err(format!(
                "file not downloaded over tls connection signed with {}",
                key
            )),
            Validator::JarCert(key) if props.jar_certs.iter().any(|k| k == key) => Ok(()),
            Validator::JarCert(key) => Err(format!("jar file not signed with {}", key)),
            Validator::Always => Ok(()),
        }
    }
}

impl fmt::Display for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validator::TlsCert(key) => write!(f, "tls-cert:{}", key),
            Validator::JarCert(key) => write!(f, "jar-cert:{}", key),
            Validator::Always => write!(f, "always:"),
        }
    }
}

/// Accept if the set is empty or any member accepts.
pub fn validate(uri: &str, props: &Provenance, validators: &[Validator]) -> Result<()> {
    if validators.is_empty() {
        return Ok(());
    }
    let mut rejections = Vec::with_capacity(validators.len());
    for validator in validators {
        match validator.check(props) {
            Ok(()) => {
                debug!("{} accepted by {}", uri, validator);
                return Ok(());
            }
            Err(reason) => rejections.push(reason),
        }
    }
    Err(LaunchError::Validation {
        uri: uri.to_string(),
        rejections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> Provenance {
        let mut props = Provenance::new("https://h/a.jar");
        props.tls_certs = vec!["dig:sha256:AA".to_string(), "key:rsa:BB".to_string()];
        props.jar_certs = vec!["key:rsa:CC".to_string()];
        props
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            Validator::parse("tls-cert:key:rsa:BB"),
            Some(Validator::TlsCert("key:rsa:BB".to_string()))
        );
        assert_eq!(
            Validator::parse("jar-cert:X"),
            Some(Validator::JarCert("X".to_string()))
        );
        assert_eq!(Validator::parse("always:"), Some(Validator::Always));
        assert_eq!(Validator::parse("always"), Some(Validator::Always));
        assert_eq!(Validator::parse("nocolon"), None);
        assert_eq!(Validator::parse("md5:abc"), None);
    }

    #[test]
    fn test_empty_set_always_passes() {
        assert!(validate("u", &Provenance::default(), &[]).is_ok());
        assert!(validate("u", &Provenance::default(), &[Validator::Always]).is_ok());
    }

    #[test]
    fn test_tls_cert_membership() {
        let p = props();
        assert!(validate("u", &p, &[Validator::TlsCert("key:rsa:BB".to_string())]).is_ok());
        let err = validate("u", &p, &[Validator::TlsCert("X".to_string())]).unwrap_err();
        match err {
            LaunchError::Validation { rejections, .. } => assert_eq!(rejections.len(), 1),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_any_member_accepting_is_enough() {
        let set = [
            Validator::TlsCert("X".to_string()),
            Validator::JarCert("key:rsa:CC".to_string()),
        ];
        assert!(validate("u", &props(), &set).is_ok());
        assert!(validate("u", &Provenance::default(), &set).is_err());
    }
}
