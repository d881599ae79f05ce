use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use beacon_config::catalog_path;
use beacon_core::{Component, ComponentKind, EntityRef, SystemName};
use serde::Deserialize;
use thiserror::Error;

/// Mapping from system name to the components belonging to it, in catalog
/// order within each group.
pub type SystemGrouping = BTreeMap<SystemName, Vec<EntityRef>>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    components: Vec<RawComponent>,
}

// Raw shape: everything optional so one malformed entry does not take the
// whole catalog down.
#[derive(Debug, Deserialize)]
struct RawComponent {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    kind: Option<ComponentKind>,
    // Tolerates non-string values; anything but a string reads as untagged.
    #[serde(default)]
    system: Option<toml::Value>,
    #[serde(default)]
    repo: Option<String>,
    #[serde(default)]
    sonar_project: Option<String>,
}

/// Load the component catalog from `.beacon/catalog.toml`. A missing file
/// is an empty catalog; entries without a usable name are dropped with a
/// warning.
pub fn load_catalog(workspace_root: impl AsRef<Path>) -> Result<Vec<Component>, CatalogError> {
    let path = catalog_path(workspace_root);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: CatalogFile = toml::from_str(&raw)?;

    let mut components = Vec::with_capacity(parsed.components.len());
    for entry in parsed.components {
        let Some(name) = entry
            .name
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            tracing::warn!("dropping catalog entry without a name");
            continue;
        };

        components.push(Component {
            name: name.to_owned(),
            namespace: entry
                .namespace
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or("default")
                .to_owned(),
            kind: entry.kind.unwrap_or_default(),
            system: entry
                .system
                .as_ref()
                .and_then(toml::Value::as_str)
                .map(str::to_owned),
            repo: entry.repo,
            sonar_project: entry.sonar_project,
        });
    }

    Ok(components)
}

/// Group components by their system tag. Components without a valid tag are
/// excluded, not an error; catalog order is preserved within each group.
pub fn group_by_system(components: &[Component]) -> SystemGrouping {
    let mut grouping = SystemGrouping::new();

    for component in components {
        let Some(system) = component.system_tag() else {
            continue;
        };

        grouping
            .entry(system.to_owned())
            .or_default()
            .push(component.entity_ref());
    }

    grouping
}

/// All distinct system names in the catalog, in first-seen order. The
/// dashboard lists every one of these even when it has no summaries.
pub fn known_systems(components: &[Component]) -> Vec<SystemName> {
    let mut systems = Vec::new();

    for component in components {
        if let Some(system) = component.system_tag()
            && !systems.iter().any(|known| known == system)
        {
            systems.push(system.to_owned());
        }
    }

    systems
}
