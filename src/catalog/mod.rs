//! Pipeline configuration catalog
//!
//! Step definitions and document classes live in a [`ConfigStore`]; the
//! [`StepCatalog`] serves them through a TTL cache that is invalidated
//! wholesale on every mutation.

pub mod cache;
pub mod classes;
pub mod steps;
pub mod store;

pub use cache::{CacheBackend, CacheError, Clock, ManualClock, MemoryCache, SystemClock};
pub use classes::{build_classification_prompt, match_class_token, DocumentClassRegistry};
pub use steps::{CatalogError, StepCatalog, STEP_CATALOG_NAMESPACE};
pub use store::{ConfigStore, InMemoryConfigStore};
