//! Launchers: what happens once a descriptor has been read.

pub mod chain;
pub mod native;
pub mod process;
pub mod runtime;
pub mod script;

use crate::config::types::{LaunchError, Result};
use crate::descriptor::env::Environment;
use crate::descriptor::interpreter::Interpreter;
use crate::resource::Resource;
use crate::session::Session;
use std::process::Child;

pub use chain::ChainLauncher;
pub use process::{LaunchPlan, ProcessLauncher};

#[derive(Clone, Debug)]
pub enum Launcher {
    Process(ProcessLauncher),
    Chain(ChainLauncher),
}

impl Default for Launcher {
    fn default() -> Self {
        Launcher::Process(ProcessLauncher::new())
    }
}

impl Launcher {
    /// Offer a descriptor command to the active launcher.
    pub fn command(&mut self, words: &[String], env: &Environment) -> Result<bool> {
        match self {
            Launcher::Process(launcher) => launcher.command(words, env),
            Launcher::Chain(_) => Ok(false),
        }
    }

    /// Follow chain hand-offs until a process launcher remains.
    pub fn settle(self, session: &Session) -> Result<ProcessLauncher> {
        let mut current = self;
        let mut hops = 0;
        loop {
            match current {
                Launcher::Process(launcher) => return Ok(launcher),
                Launcher::Chain(chain) => {
                    hops += 1;
                    if hops > session.settings.max_chain_depth {
                        return Err(LaunchError::Config(format!(
                            "more than {} chained descriptors (last: {})",
                            session.settings.max_chain_depth, chain.target
                        )));
                    }
                    current = chain.follow(session)?;
                }
            }
        }
    }
}

/// Interpret `root` and every descriptor it chains to, without starting
/// anything.
pub fn plan(session: &Session, root: &Resource) -> Result<LaunchPlan> {
    Interpreter::new(session)
        .run(root)?
        .settle(session)?
        .prepare(session)
}

/// Interpret `root`, follow chains, and start the runtime process.
pub fn launch(session: &Session, root: &Resource) -> Result<(LaunchPlan, Child)> {
    Interpreter::new(session)
        .run(root)?
        .settle(session)?
        .launch(session)
}
