//! Local persistence (SQLite listing store, run artifacts) and HTTP client setup.

pub mod artifacts;
pub mod http;
pub mod listing_store;

pub use artifacts::{ArtifactStore, StoredArtifact};
pub use http::HttpClientConfig;
pub use listing_store::{ListingStore, StoreError, StoreStats, UpsertCounts};
