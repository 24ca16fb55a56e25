/// Hand-off to another descriptor
use crate::config::types::Result;
use crate::descriptor::interpreter::Interpreter;
use crate::launch::Launcher;
use crate::resource::Resource;
use crate::session::Session;
use log::info;

#[derive(Clone, Debug)]
pub struct ChainLauncher {
    pub target: Resource,
}

impl ChainLauncher {
    pub fn new(target: Resource) -> Self {
        Self { target }
    }

    /// Interpret the chained descriptor from scratch and return the
    /// launcher it settles on.
    pub fn follow(&self, session: &Session) -> Result<Launcher> {
        info!("[{}] Chaining to {}", session.id, self.target);
        Interpreter::new(session).run(&self.target)
    }
}
