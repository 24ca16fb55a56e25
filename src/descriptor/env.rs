/// Immutable interpretation environment
use crate::config::types::{LaunchError, Result};
use crate::descriptor::expand::{expand, is_host_property};
use crate::launch::runtime::HostInfo;
use crate::resource::Resource;
use crate::trust::Validator;
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

/// Scope of one descriptor.
///
/// Every modifier returns a new value; clones share storage, so handing an
/// environment to a nested scope can never leak changes back.
#[derive(Clone, Debug)]
pub struct Environment {
    /// Base for resolving relative references (`rel` changes it); `None`
    /// admits absolute references only
    pub base: Option<Url>,
    /// The descriptor being read; sent as referrer
    pub source: Option<Url>,
    pub validators: Arc<[Validator]>,
    vars: Arc<BTreeMap<String, String>>,
    host: Arc<HostInfo>,
}

impl Environment {
    pub fn new(host: Arc<HostInfo>) -> Self {
        Self {
            base: None,
            source: None,
            validators: Arc::from(Vec::new()),
            vars: Arc::new(BTreeMap::new()),
            host,
        }
    }

    /// Fresh scope for reading the descriptor behind `res`.
    pub fn for_resource(res: &Resource, host: Arc<HostInfo>) -> Self {
        Self {
            base: Some(res.uri.clone()),
            source: Some(res.uri.clone()),
            validators: Arc::clone(&res.validators),
            ..Self::new(host)
        }
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    pub fn with_base(&self, base: Url) -> Self {
        Self {
            base: Some(base),
            ..self.clone()
        }
    }

    pub fn with_validators(&self, validators: Vec<Validator>) -> Self {
        Self {
            validators: Arc::from(validators),
            ..self.clone()
        }
    }

    pub fn with_var(&self, name: &str, value: &str) -> Self {
        let mut vars = (*self.vars).clone();
        vars.insert(name.to_string(), value.to_string());
        Self {
            vars: Arc::new(vars),
            ..self.clone()
        }
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Expand `$`-references against host properties and variables.
    pub fn expand(&self, word: &str) -> Result<String> {
        expand(word, |name| {
            if is_host_property(name) {
                self.host.property(name).map(str::to_string)
            } else {
                self.var(name).map(str::to_string)
            }
        })
    }

    /// Resolve a (possibly relative) reference against the base.
    pub fn resolve(&self, reference: &str) -> Result<Url> {
        let resolved = match self.base {
            Some(ref base) => base.join(reference),
            None => Url::parse(reference),
        };
        resolved.map_err(|e| {
            let base = self.base.as_ref().map(Url::as_str).unwrap_or("nothing");
            LaunchError::Usage(format!("cannot resolve {} against {}: {}", reference, base, e))
        })
    }

    /// Resource for a reference, carrying the active validators and this
    /// descriptor as referrer.
    pub fn resource(&self, reference: &str) -> Result<Resource> {
        Ok(Resource::new(self.resolve(reference)?, Arc::clone(&self.validators))
            .with_referrer(self.source.clone()))
    }
}
