//! Descriptor run loop.
//!
//! Descriptors are read line by line. Each command is offered, in order, to
//! the loaded extensions, the status sink, the active launcher and finally
//! the builtin table; the first claim wins. `include` only queues work: the
//! queue is drained after the current descriptor, every URI at most once.

use crate::config::types::{LaunchError, Result};
use crate::descriptor::condition::evaluate;
use crate::descriptor::env::Environment;
use crate::descriptor::extension::{self, CommandHandler, Handled};
use crate::descriptor::tokenize::split_words;
use crate::launch::{ChainLauncher, Launcher};
use crate::resource::Resource;
use crate::session::Session;
use crate::trust::Validator;
use log::{debug, info};
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::sync::Arc;
use url::Url;

pub const MAJOR_VERSION: u32 = 1;
pub const MINOR_VERSION: u32 = 3;

/// Bound on alias and `when` rewrites of a single line
const MAX_REDISPATCH: usize = 32;

pub struct Interpreter<'a> {
    session: &'a Session,
    extensions: Vec<Box<dyn CommandHandler>>,
    loaded_extensions: HashSet<Url>,
    seen: HashSet<Url>,
    queue: VecDeque<Resource>,
    launcher: Launcher,
}

fn usage(text: &str) -> LaunchError {
    LaunchError::Usage(text.to_string())
}

fn word<'w>(words: &'w [String], i: usize, text: &str) -> Result<&'w str> {
    words.get(i).map(String::as_str).ok_or_else(|| usage(text))
}

impl<'a> Interpreter<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self {
            session,
            extensions: Vec::new(),
            loaded_extensions: HashSet::new(),
            seen: HashSet::new(),
            queue: VecDeque::new(),
            launcher: Launcher::default(),
        }
    }

    /// Register a command handler ahead of the builtins.
    pub fn register(&mut self, handler: Box<dyn CommandHandler>) {
        debug!("Registered command handler {}", handler.name());
        self.extensions.push(handler);
    }

    /// URIs of every descriptor read so far
    pub fn seen(&self) -> &HashSet<Url> {
        &self.seen
    }

    fn enqueue(&mut self, res: Resource) {
        if self.seen.contains(&res.uri) {
            debug!("Already included {}", res.uri);
            return;
        }
        self.queue.push_back(res);
    }

    /// Read `root` and everything it includes, returning the launcher the
    /// descriptors configured.
    pub fn run(mut self, root: &Resource) -> Result<Launcher> {
        self.enqueue(root.clone());
        while let Some(res) = self.queue.pop_front() {
            if !self.seen.insert(res.uri.clone()) {
                continue;
            }
            info!("[{}] Reading {}", self.session.id, res.uri);
            let path = res.update(&self.session.cache)?;
            let text = fs::read_to_string(&path)?;
            let env = Environment::for_resource(&res, Arc::clone(&self.session.host));
            self.read(&text, env, res.uri.as_str())?;
        }
        Ok(self.launcher)
    }

    /// Execute descriptor text. Failures are annotated with `source` and the
    /// line number.
    pub fn read(&mut self, text: &str, env: Environment, source: &str) -> Result<()> {
        let mut env = env;
        for (n, line) in text.lines().enumerate() {
            if line.starts_with('#') {
                continue;
            }
            let words = split_words(line).ok_or_else(|| {
                LaunchError::Syntax("unterminated quote or escape".to_string()).at(source, n + 1)
            })?;
            if words.is_empty() {
                continue;
            }
            if let Some(next) = self.dispatch(words, &env).map_err(|e| e.at(source, n + 1))? {
                env = next;
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, words: Vec<String>, env: &Environment) -> Result<Option<Environment>> {
        let mut words = words;
        for _ in 0..MAX_REDISPATCH {
            match self.offer(&words, env)? {
                Handled::No => {
                    debug!("Ignoring unknown command {}", words[0]);
                    return Ok(None);
                }
                Handled::Yes => return Ok(None),
                Handled::Rebind(next) => return Ok(Some(next)),
                Handled::Redispatch(next) if next.is_empty() => return Ok(None),
                Handled::Redispatch(next) => words = next,
            }
        }
        Err(usage("command rewritten too many times"))
    }

    fn offer(&mut self, words: &[String], env: &Environment) -> Result<Handled> {
        for handler in &self.extensions {
            match handler.command(words, env)? {
                Handled::No => {}
                claimed => return Ok(claimed),
            }
        }
        match self.session.status.command(words, env)? {
            Handled::No => {}
            claimed => return Ok(claimed),
        }
        if self.launcher.command(words, env)? {
            return Ok(Handled::Yes);
        }
        self.builtin(words, env)
    }

    fn builtin(&mut self, words: &[String], env: &Environment) -> Result<Handled> {
        match words[0].as_str() {
            "require" => {
                let spec = env.expand(word(words, 1, "require MAJOR.MINOR")?)?;
                let (major, minor) = spec
                    .split_once('.')
                    .and_then(|(a, b)| Some((a.parse::<u32>().ok()?, b.parse::<u32>().ok()?)))
                    .ok_or_else(|| usage("require MAJOR.MINOR"))?;
                if major != MAJOR_VERSION || minor > MINOR_VERSION {
                    return Err(LaunchError::VersionMismatch {
                        required_major: major,
                        required_minor: minor,
                        major: MAJOR_VERSION,
                        minor: MINOR_VERSION,
                    });
                }
                Ok(Handled::Yes)
            }
            "error" => {
                word(words, 1, "error MESSAGE")?;
                let message = words[1..]
                    .iter()
                    .map(|w| env.expand(w))
                    .collect::<Result<Vec<_>>>()?;
                Err(LaunchError::User(message.join(" ")))
            }
            "rel" => {
                let base = env.resolve(&env.expand(word(words, 1, "rel URI")?)?)?;
                Ok(Handled::Rebind(env.with_base(base)))
            }
            "validate" => {
                word(words, 1, "validate VALIDATOR...")?;
                let mut validators = Vec::new();
                for spec in &words[1..] {
                    if let Some(v) = Validator::parse(&env.expand(spec)?) {
                        validators.push(v);
                    }
                }
                Ok(Handled::Rebind(env.with_validators(validators)))
            }
            "include" => {
                let res = env.resource(&env.expand(word(words, 1, "include URL")?)?)?;
                self.enqueue(res);
                Ok(Handled::Yes)
            }
            "extension" => {
                let res = env.resource(&env.expand(word(words, 1, "extension URL")?)?)?;
                if self.loaded_extensions.insert(res.uri.clone()) {
                    let path = res.update(&self.session.cache)?;
                    let handler = extension::load(&path, &res)?;
                    self.register(handler);
                }
                Ok(Handled::Yes)
            }
            "set" => {
                let name = env.expand(word(words, 1, "set VARIABLE VALUE")?)?;
                let value = env.expand(word(words, 2, "set VARIABLE VALUE")?)?;
                Ok(Handled::Rebind(env.with_var(&name, &value)))
            }
            "when" => {
                let colon = words
                    .iter()
                    .position(|w| w == ":")
                    .ok_or_else(|| usage("when TERM... : COMMAND..."))?;
                if colon + 1 >= words.len() {
                    return Err(usage("when TERM... : COMMAND..."));
                }
                if evaluate(&words[1..colon], env)? {
                    Ok(Handled::Redispatch(words[colon + 1..].to_vec()))
                } else {
                    Ok(Handled::Yes)
                }
            }
            "chain" => {
                let res = env.resource(&env.expand(word(words, 1, "chain URL")?)?)?;
                self.launcher = Launcher::Chain(ChainLauncher::new(res));
                Ok(Handled::Yes)
            }
            _ => Ok(Handled::No),
        }
    }
}
