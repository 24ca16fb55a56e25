//! Launch descriptor language: tokenizing, expansion, conditions and the
//! interpreter that drives launchers.

pub mod condition;
pub mod env;
pub mod expand;
pub mod extension;
pub mod interpreter;
pub mod tokenize;

pub use env::Environment;
pub use extension::{CommandHandler, Handled};
pub use interpreter::{Interpreter, MAJOR_VERSION, MINOR_VERSION};
