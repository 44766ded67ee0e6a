//! Typed binder configuration.
//!
//! Hosts configure the binder through a closed set of named properties, the same
//! key/value protocol a CLR host passes at runtime initialization. Values are typed:
//! plain text, ordered path lists, string lists and flags. Path lists use the platform
//! path-list separator (`:` on Unix, `;` on Windows).
//!
//! # Examples
//!
//! ```rust
//! use clrbind::binder::{PropertyMap, PropertyName};
//!
//! let mut properties = PropertyMap::new();
//! properties.append_path(PropertyName::AppPaths, "/app")?;
//! properties.append_path(PropertyName::AppPaths, "/app/")?;
//! properties.set_str(PropertyName::ProbeExecutables, "false")?;
//!
//! assert_eq!(properties.paths(PropertyName::AppPaths).len(), 1);
//! assert!(!properties.flag(PropertyName::ProbeExecutables));
//! # Ok::<(), clrbind::Error>(())
//! ```

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use log::warn;
use strum::{EnumIter, EnumString, IntoStaticStr};

use crate::{Error::Configuration, Result};

#[cfg(windows)]
const PATH_LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
const PATH_LIST_SEPARATOR: char = ':';

/// Names of the binder properties.
///
/// The textual form is the host key, e.g. `TRUSTED_PLATFORM_ASSEMBLIES`; parsing is
/// ASCII case-insensitive.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    EnumString,
    EnumIter,
    IntoStaticStr,
    strum::Display,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum PropertyName {
    /// Files of the platform, bound ahead of any application directory
    TrustedPlatformAssemblies,
    /// Ordered global probing directories
    AppPaths,
    /// Roots searched for satellite assemblies
    PlatformResourceRoots,
    /// Application base directory, probed when no app paths are configured
    AppContextBaseDirectory,
    /// Preference order of non-neutral cultures
    CultureFallbackList,
    /// Application configuration file holding binding redirects
    AppConfigFile,
    /// Whether `<name>.exe` is probed after `<name>.dll`
    ProbeExecutables,
    /// Whether the default binding log records events
    BindingLogEnabled,
}

/// Value type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum PropertyKind {
    /// Single string
    Text,
    /// Ordered, de-duplicated list of paths
    Paths,
    /// Ordered list of strings
    List,
    /// Boolean switch
    Flag,
}

impl PropertyName {
    /// The value type accepted by this property.
    #[must_use]
    pub fn kind(self) -> PropertyKind {
        match self {
            PropertyName::TrustedPlatformAssemblies
            | PropertyName::AppPaths
            | PropertyName::PlatformResourceRoots => PropertyKind::Paths,
            PropertyName::AppContextBaseDirectory | PropertyName::AppConfigFile => {
                PropertyKind::Text
            }
            PropertyName::CultureFallbackList => PropertyKind::List,
            PropertyName::ProbeExecutables | PropertyName::BindingLogEnabled => {
                PropertyKind::Flag
            }
        }
    }

    /// The value reported for this property while it is unset.
    #[must_use]
    pub fn default_value(self) -> PropertyValue {
        match self.kind() {
            PropertyKind::Text => PropertyValue::Text(String::new()),
            PropertyKind::Paths => PropertyValue::Paths(Vec::new()),
            PropertyKind::List => PropertyValue::List(Vec::new()),
            PropertyKind::Flag => PropertyValue::Flag(true),
        }
    }
}

/// A typed property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    /// Single string
    Text(String),
    /// Ordered list of paths
    Paths(Vec<PathBuf>),
    /// Ordered list of strings
    List(Vec<String>),
    /// Boolean switch
    Flag(bool),
}

impl PropertyValue {
    /// The type of this value.
    #[must_use]
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Text(_) => PropertyKind::Text,
            PropertyValue::Paths(_) => PropertyKind::Paths,
            PropertyValue::List(_) => PropertyKind::List,
            PropertyValue::Flag(_) => PropertyKind::Flag,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Text(text) => f.write_str(text),
            PropertyValue::Paths(paths) => {
                for (index, path) in paths.iter().enumerate() {
                    if index > 0 {
                        write!(f, "{PATH_LIST_SEPARATOR}")?;
                    }
                    write!(f, "{}", path.display())?;
                }
                Ok(())
            }
            PropertyValue::List(items) => f.write_str(&items.join(";")),
            PropertyValue::Flag(flag) => write!(f, "{flag}"),
        }
    }
}

/// Ordered map of binder properties.
///
/// Last write wins for [`PropertyMap::set`]; path lists can additionally be extended
/// with [`PropertyMap::append_path`], which keeps insertion order and silently skips
/// paths that are already present after normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyMap {
    values: BTreeMap<PropertyName, PropertyValue>,
}

impl PropertyMap {
    /// Creates an empty map; every property reports its default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map from host key/value string pairs.
    ///
    /// Unknown keys are skipped with a warning; the host protocol carries many keys
    /// that are meant for other runtime components.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] if the slices differ in length or a
    /// value cannot be converted to its property's type.
    pub fn from_pairs<K, V>(keys: &[K], values: &[V]) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        if keys.len() != values.len() {
            return Err(Configuration(format!(
                "{} property keys but {} values",
                keys.len(),
                values.len()
            )));
        }

        let mut map = PropertyMap::new();
        for (key, value) in keys.iter().zip(values) {
            match key.as_ref().parse::<PropertyName>() {
                Ok(name) => map.set_str(name, value.as_ref())?,
                Err(_) => warn!("Ignoring unknown binder property '{}'", key.as_ref()),
            }
        }

        Ok(map)
    }

    /// Returns the value of `name`, or its default when unset.
    #[must_use]
    pub fn get(&self, name: PropertyName) -> PropertyValue {
        self.values
            .get(&name)
            .cloned()
            .unwrap_or_else(|| name.default_value())
    }

    /// Returns `true` if `name` was explicitly set.
    #[must_use]
    pub fn contains(&self, name: PropertyName) -> bool {
        self.values.contains_key(&name)
    }

    /// Sets `name`, replacing any earlier value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] if the value type does not match the
    /// property.
    pub fn set(&mut self, name: PropertyName, value: PropertyValue) -> Result<()> {
        if value.kind() != name.kind() {
            return Err(Configuration(format!(
                "{name} expects a {} value, got {}",
                name.kind(),
                value.kind()
            )));
        }

        let value = match value {
            PropertyValue::Paths(paths) => {
                let mut unique: Vec<PathBuf> = Vec::with_capacity(paths.len());
                for path in paths {
                    let path = normalize(&path);
                    if !unique.contains(&path) {
                        unique.push(path);
                    }
                }
                PropertyValue::Paths(unique)
            }
            other => other,
        };

        self.values.insert(name, value);
        Ok(())
    }

    /// Sets `name` from its host string form.
    ///
    /// Path lists are split on the platform separator, string lists on `;` or `,` and
    /// flags accept `true`/`false`/`1`/`0`/`yes`/`no`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] for a flag that is not a boolean.
    pub fn set_str(&mut self, name: PropertyName, raw: &str) -> Result<()> {
        let value = match name.kind() {
            PropertyKind::Text => PropertyValue::Text(raw.trim().to_string()),
            PropertyKind::Paths => PropertyValue::Paths(
                raw.split(PATH_LIST_SEPARATOR)
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(PathBuf::from)
                    .collect(),
            ),
            PropertyKind::List => PropertyValue::List(
                raw.split([';', ','])
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            PropertyKind::Flag => PropertyValue::Flag(parse_flag(name, raw)?),
        };

        self.set(name, value)
    }

    /// Appends `path` to a path-list property.
    ///
    /// Returns `false` without changing anything if the normalized path is already
    /// present.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] if `name` is not a path list.
    pub fn append_path(&mut self, name: PropertyName, path: impl AsRef<Path>) -> Result<bool> {
        if name.kind() != PropertyKind::Paths {
            return Err(Configuration(format!("{name} is not a path list")));
        }

        let path = normalize(path.as_ref());
        let entry = self
            .values
            .entry(name)
            .or_insert_with(|| PropertyValue::Paths(Vec::new()));

        match entry {
            PropertyValue::Paths(paths) if paths.contains(&path) => Ok(false),
            PropertyValue::Paths(paths) => {
                paths.push(path);
                Ok(true)
            }
            _ => Err(Configuration(format!("{name} holds a non-path value"))),
        }
    }

    /// Text value of `name`, `None` when unset or empty.
    #[must_use]
    pub fn text(&self, name: PropertyName) -> Option<&str> {
        match self.values.get(&name) {
            Some(PropertyValue::Text(text)) if !text.is_empty() => Some(text),
            _ => None,
        }
    }

    /// Path list of `name`, empty when unset.
    #[must_use]
    pub fn paths(&self, name: PropertyName) -> &[PathBuf] {
        match self.values.get(&name) {
            Some(PropertyValue::Paths(paths)) => paths,
            _ => &[],
        }
    }

    /// String list of `name`, empty when unset.
    #[must_use]
    pub fn list(&self, name: PropertyName) -> &[String] {
        match self.values.get(&name) {
            Some(PropertyValue::List(items)) => items,
            _ => &[],
        }
    }

    /// Flag value of `name`, its default when unset.
    #[must_use]
    pub fn flag(&self, name: PropertyName) -> bool {
        match self.values.get(&name) {
            Some(PropertyValue::Flag(flag)) => *flag,
            _ => matches!(name.default_value(), PropertyValue::Flag(true)),
        }
    }

    /// Explicitly set properties in name order.
    pub fn iter(&self) -> impl Iterator<Item = (PropertyName, &PropertyValue)> {
        self.values.iter().map(|(name, value)| (*name, value))
    }

    /// Number of explicitly set properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no property was set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

fn parse_flag(name: PropertyName, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Configuration(format!(
            "{name} expects a boolean, got '{other}'"
        ))),
    }
}
