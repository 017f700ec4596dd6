//! Programmatic recipe factories.
//!
//! Some recipes compute payload defaults at load time or branch on
//! load-time state; those are expressed as factories registered with the
//! catalog. Factory output passes through the same validation as
//! declarative files and lands in the same catalog map.

use std::sync::Arc;

use apsflow_core::SequenceDefinition;

use crate::catalog::CatalogError;

/// A loadable unit that constructs a definition on demand.
pub trait SequenceFactory: Send + Sync {
    /// Catalog name the factory produces. Must match the returned
    /// definition's name.
    fn name(&self) -> &str;

    /// Build the definition. Invoked on every `load_all`/`reload`.
    fn build(&self) -> Result<SequenceDefinition, CatalogError>;
}

/// Closure-backed factory for recipes defined inline.
pub struct FnSequenceFactory {
    name: String,
    build: Box<dyn Fn() -> Result<SequenceDefinition, CatalogError> + Send + Sync>,
}

impl FnSequenceFactory {
    pub fn new(
        name: impl Into<String>,
        build: impl Fn() -> Result<SequenceDefinition, CatalogError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            build: Box::new(build),
        })
    }
}

impl SequenceFactory for FnSequenceFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self) -> Result<SequenceDefinition, CatalogError> {
        (self.build)()
    }
}
