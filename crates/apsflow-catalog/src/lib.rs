//! # apsflow Catalog
//!
//! The definition loader: declarative YAML recipes scanned from a
//! directory plus programmatic factories, normalized into one catalog of
//! `SequenceDefinition` values for the engine.

mod catalog;
mod document;
mod factory;
mod validate;

pub use catalog::{Catalog, CatalogError, CatalogManager, CatalogWatcher, LoadReport};
pub use document::{parse_document, SequenceDocument, StepDocument, WaitConditionDocument};
pub use factory::{FnSequenceFactory, SequenceFactory};
pub use validate::validate_definition;
