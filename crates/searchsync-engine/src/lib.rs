//! Change-log driven index synchronisation and the query side on top of it.
pub mod bootstrap;
pub mod engine;
pub mod feed;
pub mod index;
pub mod rebuild;
pub mod results;
pub mod update;

pub use engine::{Consumer, ConsumerStatus, Engine, EngineBuilder, EngineOptions, EngineStatus, DEFAULT_CONSUMER};
pub use feed::{OpenSearchMeta, OpenSearchQuery, OPENSEARCH_NAMESPACE};
pub use index::SearchIndex;
pub use rebuild::{IndexRebuild, RebuildReport};
pub use results::{ResultSet, SearchResult};
pub use update::{ApplyOutcome, UpdateReport};
