/// A remote artifact together with the rules its content must satisfy
use crate::cache::{Cached, ResourceCache};
use crate::config::types::Result;
use crate::trust::{validate, Validator};
use log::info;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    pub uri: Url,
    pub validators: Arc<[Validator]>,
    /// Descriptor that referenced this resource, sent as the referrer
    pub referrer: Option<Url>,
}

impl Resource {
    pub fn new(uri: Url, validators: Arc<[Validator]>) -> Self {
        Self {
            uri,
            validators,
            referrer: None,
        }
    }

    pub fn unvalidated(uri: Url) -> Self {
        Self::new(uri, Arc::from(Vec::new()))
    }

    pub fn with_referrer(mut self, referrer: Option<Url>) -> Self {
        self.referrer = referrer;
        self
    }

    fn validate(&self, cached: &Cached) -> Result<()> {
        validate(self.uri.as_str(), &cached.provenance, &self.validators)
    }

    /// Resolve to a validated local path.
    ///
    /// A rejected cache hit gets exactly one forced refetch before the
    /// rejection is final; a rejected fresh fetch fails immediately.
    pub fn update(&self, cache: &ResourceCache) -> Result<PathBuf> {
        let cached = cache.update(&self.uri, self.referrer.as_ref(), false)?;
        match self.validate(&cached) {
            Ok(()) => Ok(cached.path),
            Err(e) if cached.fresh => Err(e),
            Err(e) => {
                info!("Cached {} rejected ({}), refetching", self.uri, e);
                let cached = cache.update(&self.uri, self.referrer.as_ref(), true)?;
                self.validate(&cached)?;
                Ok(cached.path)
            }
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}
