//! Plugin registry
//!
//! Built once at start-up by scanning the plugin root for manifests and
//! read-only afterwards. Supported layouts, scanned in this order:
//!
//! - `<root>/<group>/<plugin>/<manifest>.json` (legacy)
//! - `<root>/<plugin>/<manifest>.json`
//!
//! A plugin is checked completely (manifest shape, handler class,
//! capability, duplicate type names) before any of its types is committed.
//! Failures are collected in [`PluginRegistry::load_errors`] and never abort
//! the scan; the first plugin to claim a type name keeps it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use provisioner_core::domain::plugin::{PluginKind, PluginManifest, TypeDefinition};
use tracing::{debug, info, warn};

use crate::plugin::catalog::HandlerCatalog;
use crate::plugin::error::RegistryError;
use crate::repository::PluginRepository;

/// One provider or automator type and the plugin that declared it
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredType {
    pub kind: PluginKind,
    pub type_name: String,
    pub plugin: String,
    /// Directory holding the plugin's manifest
    pub directory: PathBuf,
    pub definition: TypeDefinition,
}

impl RegisteredType {
    pub fn classname(&self) -> &str {
        &self.definition.classname
    }
}

#[derive(Debug)]
pub struct PluginRegistry {
    catalog: HandlerCatalog,
    providers: BTreeMap<String, RegisteredType>,
    automators: BTreeMap<String, RegisteredType>,
    load_errors: Vec<RegistryError>,
}

impl PluginRegistry {
    /// Creates an empty registry resolving classnames against `catalog`
    pub fn new(catalog: HandlerCatalog) -> Self {
        Self {
            catalog,
            providers: BTreeMap::new(),
            automators: BTreeMap::new(),
            load_errors: Vec::new(),
        }
    }

    /// Scans `root` and loads every manifest found
    pub fn scan(root: &Path, catalog: HandlerCatalog) -> Self {
        let mut registry = Self::new(catalog);

        if !root.is_dir() {
            warn!("Plugin directory {} does not exist", root.display());
            return registry;
        }

        for path in manifest_paths(root) {
            registry.load_manifest(&path);
        }

        info!(
            "Loaded {} provider type(s) and {} automator type(s) from {}",
            registry.providers.len(),
            registry.automators.len(),
            root.display()
        );
        registry
    }

    /// Loads one manifest file, recording any failure as a load error
    pub fn load_manifest(&mut self, path: &Path) {
        debug!("Loading plugin manifest {}", path.display());
        if let Err(e) = self.try_load(path) {
            warn!("Skipping plugin: {}", e);
            self.load_errors.push(e);
        }
    }

    fn try_load(&mut self, path: &Path) -> Result<(), RegistryError> {
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest = PluginManifest::from_json(&text).map_err(|source| RegistryError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let validated = manifest.validate().map_err(|source| RegistryError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;

        let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let plugin = validated.name;

        let mut staged = Vec::with_capacity(validated.types.len());
        for (kind, type_name, definition) in validated.types {
            let classname = definition.classname.clone();
            match self.catalog.capability(&classname) {
                None => {
                    return Err(RegistryError::UnknownClass {
                        plugin,
                        kind,
                        type_name,
                        classname,
                    });
                }
                Some(capability) if capability != kind => {
                    return Err(RegistryError::CapabilityMismatch {
                        plugin,
                        kind,
                        type_name,
                        classname,
                    });
                }
                Some(_) => {}
            }

            if let Some(existing) = self.types(kind).get(&type_name) {
                return Err(RegistryError::DuplicateType {
                    plugin,
                    kind,
                    type_name,
                    existing: existing.plugin.clone(),
                });
            }

            staged.push(RegisteredType {
                kind,
                type_name,
                plugin: plugin.clone(),
                directory: directory.clone(),
                definition,
            });
        }

        for registered in staged {
            debug!(
                "Registered {} type {} ({}) from plugin {}",
                registered.kind,
                registered.type_name,
                registered.classname(),
                registered.plugin
            );
            let types = match registered.kind {
                PluginKind::Provider => &mut self.providers,
                PluginKind::Automator => &mut self.automators,
            };
            types.insert(registered.type_name.clone(), registered);
        }
        Ok(())
    }

    fn types(&self, kind: PluginKind) -> &BTreeMap<String, RegisteredType> {
        match kind {
            PluginKind::Provider => &self.providers,
            PluginKind::Automator => &self.automators,
        }
    }

    /// Looks up the type registered under `type_name`
    pub fn resolve(&self, kind: PluginKind, type_name: &str) -> Result<&RegisteredType, RegistryError> {
        self.types(kind)
            .get(type_name)
            .filter(|registered| !registered.classname().is_empty())
            .ok_or_else(|| RegistryError::UnregisteredType {
                kind,
                type_name: type_name.to_string(),
            })
    }

    /// Registered type names of one kind, sorted
    pub fn type_names(&self, kind: PluginKind) -> Vec<&str> {
        self.types(kind).keys().map(String::as_str).collect()
    }

    pub fn catalog(&self) -> &HandlerCatalog {
        &self.catalog
    }

    pub fn load_errors(&self) -> &[RegistryError] {
        &self.load_errors
    }

    /// Sends every registered type definition to the server
    ///
    /// Each type is registered independently; failures are returned and
    /// never stop the remaining registrations.
    pub async fn register_plugins(&self, repository: &dyn PluginRepository) -> Vec<RegistryError> {
        let mut errors = Vec::new();

        for registered in self.providers.values().chain(self.automators.values()) {
            match repository
                .register_type(registered.kind, &registered.type_name, &registered.definition)
                .await
            {
                Ok(()) => info!(
                    "Registered {} type {} with the server",
                    registered.kind, registered.type_name
                ),
                Err(e) => {
                    warn!(
                        "Failed to register {} type {}: {:#}",
                        registered.kind, registered.type_name, e
                    );
                    errors.push(RegistryError::Registration {
                        kind: registered.kind,
                        type_name: registered.type_name.clone(),
                        message: format!("{:#}", e),
                    });
                }
            }
        }

        errors
    }
}

/// Manifest files under `root`, legacy layout first, each layer sorted
fn manifest_paths(root: &Path) -> Vec<PathBuf> {
    let mut legacy = Vec::new();
    let mut current = Vec::new();

    for dir in sorted_entries(root).into_iter().filter(|p| p.is_dir()) {
        for entry in sorted_entries(&dir) {
            if entry.is_dir() {
                legacy.extend(sorted_entries(&entry).into_iter().filter(|p| is_manifest(p)));
            } else if is_manifest(&entry) {
                current.push(entry);
            }
        }
    }

    legacy.sort();
    current.sort();
    legacy.extend(current);
    legacy
}

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read {}: {}", dir.display(), e);
            return Vec::new();
        }
    };
    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();
    paths
}

fn is_manifest(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == "json")
}
