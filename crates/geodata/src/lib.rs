//! Viewport-driven geodata cache and case timeline synchronisation.
//!
//! Data flows one way: user input updates `FilterState` and the viewport,
//! `BoundsKey` turns the combination into a cache key, and a
//! `ViewportFetcher` per data kind decides between cache, debounce and
//! network. Case timelines are reconciled separately by
//! `TimelineReconciler`.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod filters;
pub mod key;
pub mod kinds;
pub mod model;
pub mod reconciler;
pub mod records;
pub mod screen;
pub mod timeline;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::*;
pub use cache::*;
pub use config::*;
pub use error::*;
pub use fetcher::*;
pub use filters::*;
pub use key::*;
pub use kinds::*;
pub use model::*;
pub use reconciler::*;
pub use records::*;
pub use screen::*;
pub use timeline::*;
