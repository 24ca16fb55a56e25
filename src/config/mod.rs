//! Configuration and errors
//!
//! Settings loading, startup validation, and the shared error taxonomy.

pub mod settings;
pub mod types;
pub mod validator;
