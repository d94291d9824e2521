//! Model and provider capability tracking
//!
//! The catalog combines the curated [`StaticTable`] with whatever the
//! transport's discovery feed reports, and answers capability and
//! context-window questions for the selector.

mod catalog;
mod feature;
mod static_table;

pub use catalog::{CatalogSettings, ModelCatalog, ModelInfo, ModelSource, ProviderBinding};
pub use feature::{Feature, FeatureSet};
pub use static_table::{
    ModelEntry, ProviderEntry, StaticTable, GENERIC_CONTEXT_TOKENS, STABLE_WEIGHT,
    UNSTABLE_WEIGHT,
};
