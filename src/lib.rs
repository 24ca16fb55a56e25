//! relaunch: a self-updating application bootstrapper
//! Reads a launch descriptor, brings every resource it names up to date in a
//! local cache, checks it against pinned fingerprints and starts the runtime.
//!
//! # Architecture
//!
//! ## Resource Cache ([`cache`])
//! - [`cache::mangle`]: Deterministic URI to cache path mapping
//! - [`cache::provenance`]: `.info` sidecar (modification token, fingerprints)
//! - [`cache::fetch`]: Transports (`http`/`https`, `file`) behind the `Fetcher` seam
//! - [`cache::commit`]: Atomic replacement with in-place fallback
//! - [`cache::store`]: Locked, retried, conditional updates
//!
//! ## Trust ([`trust`])
//! - [`trust::validator`]: `tls-cert`, `jar-cert` and `always` validators
//! - [`trust::fingerprint`]: Certificate digest and public key fingerprints
//! - [`trust::jar`]: Signed archive verification
//!
//! ## Descriptor Language ([`descriptor`])
//! - [`descriptor::tokenize`]: Word splitting with quotes and escapes
//! - [`descriptor::expand`]: `${name}` expansion
//! - [`descriptor::condition`]: `when` terms and the version comparator
//! - [`descriptor::env`]: Immutable per-line environment
//! - [`descriptor::extension`]: Extension packages and command handlers
//! - [`descriptor::interpreter`]: Include worklist and command dispatch
//!
//! ## Launch ([`launch`])
//! - [`launch::process`]: Argument vector assembly and spawning
//! - [`launch::chain`]: Hand-off to another descriptor
//! - [`launch::native`]: Native library extraction
//! - [`launch::runtime`]: Host identification and runtime discovery
//! - [`launch::script`]: Command file rendering
//!
//! ## Status ([`status`])
//! - Console, null and threaded status sinks
//!
//! ## Configuration ([`config`])
//! - [`config::settings`]: relaunch.json loading
//! - [`config::validator`]: Startup validation
//! - [`config::types`]: Error taxonomy

// Configuration & Errors
pub mod config;

// Resource Cache
pub mod cache;

// Trust
pub mod trust;

pub mod resource;

// Descriptor Language
pub mod descriptor;

// Launchers
pub mod launch;

pub mod status;

pub mod session;

// CLI entrypoint wiring for the relaunch binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use resource::Resource;
pub use session::Session;
