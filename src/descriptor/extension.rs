//! Pluggable descriptor commands.
//!
//! An extension package is an archive whose `META-INF/relaunch-extension`
//! entry holds `key=value` lines; `factory` names the constructor that turns
//! the package into a [`CommandHandler`].

use crate::config::types::{LaunchError, Result};
use crate::descriptor::env::Environment;
use crate::descriptor::tokenize::split_words;
use crate::resource::Resource;
use log::debug;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use zip::ZipArchive;

pub const EXTENSION_MANIFEST: &str = "META-INF/relaunch-extension";
pub const ALIAS_TABLE: &str = "META-INF/aliases";

/// Outcome of offering a command to a handler
#[derive(Debug)]
pub enum Handled {
    /// Not this handler's command
    No,
    Yes,
    /// Claimed, and the rest of the descriptor runs in this environment
    Rebind(Environment),
    /// Claimed by rewriting into another command line
    Redispatch(Vec<String>),
}

pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &str;
    fn command(&self, words: &[String], env: &Environment) -> Result<Handled>;
}

/// Opened extension package handed to a factory
pub struct ExtensionPackage {
    pub resource: Resource,
    pub properties: BTreeMap<String, String>,
    archive: ZipArchive<BufReader<File>>,
}

impl ExtensionPackage {
    pub fn open(path: &Path, resource: &Resource) -> Result<Self> {
        let file = BufReader::new(File::open(path)?);
        let mut archive = ZipArchive::new(file).map_err(|e| corrupt(resource, e.to_string()))?;
        let manifest = read_text(&mut archive, EXTENSION_MANIFEST, resource)?
            .ok_or_else(|| corrupt(resource, format!("missing {}", EXTENSION_MANIFEST)))?;
        Ok(Self {
            resource: resource.clone(),
            properties: parse_properties(&manifest),
            archive,
        })
    }

    /// Text of an entry, `None` when absent.
    pub fn entry(&mut self, name: &str) -> Result<Option<String>> {
        read_text(&mut self.archive, name, &self.resource)
    }
}

fn corrupt(res: &Resource, details: String) -> LaunchError {
    LaunchError::CorruptArchive {
        uri: res.uri.to_string(),
        details,
    }
}

fn read_text(
    archive: &mut ZipArchive<BufReader<File>>,
    name: &str,
    res: &Resource,
) -> Result<Option<String>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(corrupt(res, e.to_string())),
    };
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|e| corrupt(res, format!("{}: {}", name, e)))?;
    Ok(Some(text))
}

/// `key=value` lines; blank lines and `#` comments are skipped.
pub fn parse_properties(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

pub type ExtensionFactory = fn(&mut ExtensionPackage) -> Result<Box<dyn CommandHandler>>;

pub fn factory_for(name: &str) -> Option<ExtensionFactory> {
    match name {
        "alias" => Some(AliasExtension::load),
        _ => None,
    }
}

/// Open the package at `path` and build its handler.
pub fn load(path: &Path, resource: &Resource) -> Result<Box<dyn CommandHandler>> {
    let mut package = ExtensionPackage::open(path, resource)?;
    let name = package
        .properties
        .get("factory")
        .cloned()
        .ok_or_else(|| corrupt(resource, "extension names no factory".to_string()))?;
    let factory = factory_for(&name)
        .ok_or_else(|| corrupt(resource, format!("unknown extension factory {}", name)))?;
    debug!("Loading extension {} from {}", name, resource);
    factory(&mut package)
}

/// Command aliases: `NAME WORD...` lines, claiming `NAME ARGS...` as
/// `WORD... ARGS...`.
pub struct AliasExtension {
    source: String,
    aliases: BTreeMap<String, Vec<String>>,
}

impl AliasExtension {
    pub fn load(package: &mut ExtensionPackage) -> Result<Box<dyn CommandHandler>> {
        let table = package.entry(ALIAS_TABLE)?.ok_or_else(|| {
            corrupt(&package.resource, format!("missing {}", ALIAS_TABLE))
        })?;
        Ok(Box::new(Self::parse(package.resource.uri.as_str(), &table)?))
    }

    pub fn parse(source: &str, table: &str) -> Result<Self> {
        let mut aliases = BTreeMap::new();
        for (n, line) in table.lines().enumerate() {
            if line.starts_with('#') {
                continue;
            }
            let mut words = split_words(line).ok_or_else(|| {
                LaunchError::Syntax("unterminated quoting".to_string()).at(source, n + 1)
            })?;
            if words.len() < 2 {
                continue;
            }
            let name = words.remove(0);
            aliases.insert(name, words);
        }
        Ok(Self {
            source: source.to_string(),
            aliases,
        })
    }
}

impl CommandHandler for AliasExtension {
    fn name(&self) -> &str {
        &self.source
    }

    fn command(&self, words: &[String], _env: &Environment) -> Result<Handled> {
        let Some((first, args)) = words.split_first() else {
            return Ok(Handled::No);
        };
        match self.aliases.get(first) {
            Some(expansion) => {
                let mut line = expansion.clone();
                line.extend(args.iter().cloned());
                Ok(Handled::Redispatch(line))
            }
            None => Ok(Handled::No),
        }
    }
}
