//! Entity id synthesis
//!
//! Ids follow `urn:ngsi-ld:<type>:<site>:<service>[:<group>]:<entityName>`.
//! The entity name is one of:
//!
//! - the sanitized identity value, as is
//! - the sanitized identity value plus `-<ordinal>` when the value is a
//!   static prefix
//! - the sanitized source file stem plus `-<ordinal>` when no value exists
//!
//! Ordinals strictly increase within a run, so the last two forms are
//! unique per run by construction.

use std::path::Path;

use tracing::debug;

use crate::mapping::sanitize_identity;

/// Run-scoped parts of every id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityScope {
    pub site: String,
    pub service: String,
    pub group: Option<String>,

    /// Base name used when a row has no identity value
    pub fallback_name: String,
}

impl IdentityScope {
    pub fn new(site: impl Into<String>, service: impl Into<String>, group: Option<String>) -> Self {
        Self {
            site: site.into(),
            service: service.into(),
            group: group.filter(|g| !g.is_empty()),
            fallback_name: String::new(),
        }
    }

    /// Use the stem of the source file as the fallback base name
    pub fn with_source(mut self, source: &Path) -> Self {
        self.fallback_name = fallback_name(source);
        self
    }

    /// Build the id for one row
    pub fn synthesize(&self, entity_type: &str, value: Option<&str>, is_id_prefix: bool, ordinal: u64) -> String {
        let entity_name = match value.map(sanitize_identity).filter(|v| !v.is_empty()) {
            Some(name) if is_id_prefix => format!("{}-{}", name, ordinal),
            Some(name) => name,
            None => format!("{}-{}", sanitize_identity(&self.fallback_name), ordinal),
        };

        let id = match &self.group {
            Some(group) => format!(
                "urn:ngsi-ld:{}:{}:{}:{}:{}",
                entity_type, self.site, self.service, group, entity_name
            ),
            None => format!("urn:ngsi-ld:{}:{}:{}:{}", entity_type, self.site, self.service, entity_name),
        };
        debug!(%id, ordinal, is_id_prefix, "IdentityScope::synthesize");
        id
    }
}

/// File stem of a source path, whitespace removed
pub fn fallback_name(source: &Path) -> String {
    source
        .file_stem()
        .map(|stem| stem.to_string_lossy().chars().filter(|c| !c.is_whitespace()).collect())
        .unwrap_or_default()
}
