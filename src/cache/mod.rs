pub mod commit;
pub mod fetch;
pub mod mangle;
pub mod provenance;
pub mod store;

pub use fetch::{FetchRequest, FetchResponse, Fetcher, SchemeFetcher};
pub use provenance::Provenance;
pub use store::{Cached, ResourceCache};
