pub mod fingerprint;
pub mod jar;
pub mod validator;

pub use validator::{validate, Validator};
