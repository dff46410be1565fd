//! Short plugin names derived from the project manifest.
//!
//! Every dependency listed in `Cargo.toml` becomes a catalog entry. The
//! `sluice-` prefix is stripped and the remaining segments are folded into a
//! `snake_case` short name, so `sluice-minify-css` is reachable as
//! `minify_css`. A prefixed dependency claims its short name from plain
//! packages, which only fill names nobody else claimed.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs;

use camino::Utf8Path;
use serde::Deserialize;

/// Prefix that marks a dependency as a sluice plugin.
pub const PLUGIN_PREFIX: &str = "sluice-";

/// Name of the manifest scanned for plugins.
pub const MANIFEST: &str = "Cargo.toml";

/// Packages of the tool itself, never plugins.
const SELF: &[&str] = &["sluice", "sluice-cli"];

#[derive(Debug, Default, Deserialize)]
struct Manifest {
    #[serde(default)]
    dependencies: BTreeMap<String, toml::Value>,
    #[serde(default, rename = "dev-dependencies")]
    dev_dependencies: BTreeMap<String, toml::Value>,
}

/// Folds a dependency name into its catalog key.
pub fn short_name(dependency: &str) -> String {
    dependency
        .strip_prefix(PLUGIN_PREFIX)
        .unwrap_or(dependency)
        .split(['-', '_'])
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Builds the catalog from a set of dependency names. A prefixed dependency
/// beats a plain one in any order, otherwise the first one seen keeps the
/// short name.
pub fn derive_catalog<'a, I>(dependencies: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut catalog = BTreeMap::new();

    for dependency in dependencies {
        if SELF.contains(&dependency) {
            continue;
        }

        let short = short_name(dependency);
        if short.is_empty() {
            continue;
        }

        let official = dependency.starts_with(PLUGIN_PREFIX);

        match catalog.entry(short) {
            Entry::Vacant(entry) => {
                entry.insert(dependency.to_string());
            }
            Entry::Occupied(mut entry) => {
                if official && !entry.get().starts_with(PLUGIN_PREFIX) {
                    entry.insert(dependency.to_string());
                }
            }
        }
    }

    catalog
}

fn read_manifest(root: &Utf8Path) -> anyhow::Result<Manifest> {
    let text = fs::read_to_string(root.join(MANIFEST))?;
    Ok(toml::from_str(&text)?)
}

/// Dependency names of `<root>/Cargo.toml`, the union of `[dependencies]`
/// and `[dev-dependencies]`. A missing or malformed manifest lists nothing.
pub fn manifest_dependencies(root: &Utf8Path) -> Vec<String> {
    match read_manifest(root) {
        Ok(manifest) => manifest
            .dev_dependencies
            .into_keys()
            .chain(manifest.dependencies.into_keys())
            .collect(),
        Err(e) => {
            tracing::debug!("no plugins loaded from {MANIFEST}: {e}");
            Vec::new()
        }
    }
}

/// Catalog of the dependencies in `<root>/Cargo.toml`.
pub fn load_catalog(root: &Utf8Path) -> BTreeMap<String, String> {
    derive_catalog(manifest_dependencies(root).iter().map(String::as_str))
}
