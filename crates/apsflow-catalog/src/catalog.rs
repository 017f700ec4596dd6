//! Recipe catalog.
//!
//! Scans a directory of declarative YAML recipes, invokes registered
//! programmatic factories, and surfaces the union as a catalog of
//! `SequenceDefinition` values. One bad file never aborts the scan; it
//! is reported and skipped. Reloads replace the catalog atomically while
//! in-flight runs keep the `Arc` they were started with.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;

use apsflow_core::SequenceDefinition;

use crate::document::parse_document;
use crate::factory::SequenceFactory;
use crate::validate::validate_definition;

/// Catalog errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid definition '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },
    #[error("sequence not found: {0}")]
    NotFound(String),
    #[error("file watch error: {0}")]
    Notify(#[from] notify::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Outcome of one scan: what loaded and what was skipped, with reasons.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub skipped: Vec<(String, String)>,
}

impl LoadReport {
    fn skip(&mut self, source: impl Into<String>, reason: impl ToString) {
        let source = source.into();
        let reason = reason.to_string();
        tracing::warn!(%source, %reason, "recipe skipped");
        self.skipped.push((source, reason));
    }
}

/// Catalog of sequence definitions.
pub struct Catalog {
    recipe_dir: PathBuf,
    factories: RwLock<Vec<Arc<dyn SequenceFactory>>>,
    definitions: RwLock<HashMap<String, Arc<SequenceDefinition>>>,
}

impl Catalog {
    pub fn new(recipe_dir: impl Into<PathBuf>) -> Self {
        Self {
            recipe_dir: recipe_dir.into(),
            factories: RwLock::new(Vec::new()),
            definitions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a programmatic factory. Takes effect on the next scan.
    pub fn register_factory(&self, factory: Arc<dyn SequenceFactory>) -> Result<(), CatalogError> {
        let mut factories = self
            .factories
            .write()
            .map_err(|e| CatalogError::Internal(e.to_string()))?;
        factories.push(factory);
        Ok(())
    }

    /// Scan the recipe directory and run every registered factory,
    /// replacing the catalog atomically.
    pub fn load_all(&self) -> Result<LoadReport, CatalogError> {
        let mut report = LoadReport::default();
        let mut next: HashMap<String, Arc<SequenceDefinition>> = HashMap::new();

        for path in self.recipe_files()? {
            let source = path.display().to_string();
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(err) => {
                    report.skip(source, err);
                    continue;
                }
            };
            match parse_document(&content) {
                Ok(definition) => insert_definition(&mut next, definition, &source, &mut report),
                Err(err) => report.skip(source, err),
            }
        }

        let factories = self
            .factories
            .read()
            .map_err(|e| CatalogError::Internal(e.to_string()))?;
        for factory in factories.iter() {
            let source = format!("factory:{}", factory.name());
            match factory.build().and_then(|definition| {
                validate_definition(&definition)?;
                Ok(definition)
            }) {
                Ok(definition) => insert_definition(&mut next, definition, &source, &mut report),
                Err(err) => report.skip(source, err),
            }
        }

        let mut definitions = self
            .definitions
            .write()
            .map_err(|e| CatalogError::Internal(e.to_string()))?;
        *definitions = next;
        tracing::info!(
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            "catalog scan complete"
        );
        Ok(report)
    }

    /// Rescan and replace. In-flight runs keep the definition they were
    /// started with; the engine never re-resolves by name mid-run.
    pub fn reload(&self) -> Result<LoadReport, CatalogError> {
        self.load_all()
    }

    /// Definition by name.
    pub fn get(&self, name: &str) -> Result<Arc<SequenceDefinition>, CatalogError> {
        let definitions = self
            .definitions
            .read()
            .map_err(|e| CatalogError::Internal(e.to_string()))?;
        definitions
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }

    /// Snapshot of all names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .definitions
            .read()
            .map(|definitions| definitions.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn recipe_files(&self) -> Result<Vec<PathBuf>, CatalogError> {
        let mut files = Vec::new();
        if !self.recipe_dir.exists() {
            return Ok(files);
        }
        for entry in fs::read_dir(&self.recipe_dir)? {
            let path = entry?.path();
            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
                .unwrap_or(false);
            if path.is_file() && is_yaml {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn insert_definition(
    next: &mut HashMap<String, Arc<SequenceDefinition>>,
    definition: SequenceDefinition,
    source: &str,
    report: &mut LoadReport,
) {
    let name = definition.name.clone();
    if next.contains_key(&name) {
        report.skip(source, format!("duplicate sequence name '{name}'"));
        return;
    }
    report.loaded.push(name.clone());
    next.insert(name, Arc::new(definition));
}

/// Owns a catalog and rescans it when the recipe directory changes.
pub struct CatalogManager {
    catalog: Arc<Catalog>,
}

impl CatalogManager {
    pub fn new(recipe_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog: Arc::new(Catalog::new(recipe_dir)),
        }
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.clone()
    }

    /// Start watching the recipe directory for changes.
    pub fn start_watching(&self) -> Result<CatalogWatcher, CatalogError> {
        let catalog = self.catalog.clone();
        let recipe_dir = catalog.recipe_dir.clone();

        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    if matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) {
                        if let Err(e) = catalog.reload() {
                            tracing::error!("failed to reload catalog: {}", e);
                        }
                    }
                }
            })?;

        watcher.watch(&recipe_dir, RecursiveMode::Recursive)?;
        Ok(CatalogWatcher { _watcher: watcher })
    }
}

/// Keeps the directory watcher alive.
pub struct CatalogWatcher {
    _watcher: RecommendedWatcher,
}
