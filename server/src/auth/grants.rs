//! File-backed capability grants
//!
//! ```json
//! {
//!   "capabilities": ["download", "upload"],
//!   "users": { "alice": { "download": ["/reports/", "/logo.png"] } }
//! }
//! ```
//!
//! A path ending in `/` grants the whole subtree, any other path grants
//! exactly that file. Superusers hold every registered capability.

use super::{Authorizer, Capability, User};
use crate::error::{FsError, FsResult};
use crate::node::{File, Folder};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantDocument {
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub users: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl GrantDocument {
    /// Registers the download and upload capabilities, grants nothing.
    pub fn initial() -> Self {
        Self {
            capabilities: Capability::ALL.iter().map(|c| c.name().to_string()).collect(),
            users: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GrantTable {
    doc: GrantDocument,
}

impl GrantTable {
    pub fn from_document(doc: GrantDocument) -> FsResult<Self> {
        let missing: Vec<&str> = Capability::ALL
            .iter()
            .map(|c| c.name())
            .filter(|name| !doc.capabilities.contains(*name))
            .collect();
        if !missing.is_empty() {
            return Err(FsError::Operating(format!(
                "missing initial permission rows: {} (run `mfsd init`)",
                missing.join(", ")
            )));
        }
        Ok(Self { doc })
    }

    pub async fn load(path: &Path) -> FsResult<Self> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FsError::Operating(format!(
                    "grant table {} not found (run `mfsd init`)",
                    path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let doc: GrantDocument = serde_json::from_str(&raw).map_err(|e| {
            FsError::Operating(format!("invalid grant table {}: {}", path.display(), e))
        })?;
        let table = Self::from_document(doc)?;
        tracing::info!(
            path = %path.display(),
            users = table.doc.users.len(),
            "grant table loaded"
        );
        Ok(table)
    }

    /// Write the initial document. Returns `false` if a table already exists
    /// and `force` is not set.
    pub async fn write_initial(path: &Path, force: bool) -> anyhow::Result<bool> {
        if !force && tokio::fs::try_exists(path).await? {
            return Ok(false);
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_string_pretty(&GrantDocument::initial())?;
        tokio::fs::write(path, body).await?;
        Ok(true)
    }

    pub fn grant(&mut self, username: &str, capability: Capability, path: &str) {
        self.doc
            .users
            .entry(username.to_string())
            .or_default()
            .entry(capability.name().to_string())
            .or_default()
            .push(path.to_string());
    }

    pub fn document(&self) -> &GrantDocument {
        &self.doc
    }

    fn allows(&self, username: &str, capability: Capability, relpath: &str) -> bool {
        self.doc
            .users
            .get(username)
            .and_then(|caps| caps.get(capability.name()))
            .is_some_and(|paths| {
                paths.iter().any(|granted| {
                    if granted.ends_with('/') {
                        relpath.starts_with(granted.as_str())
                    } else {
                        relpath == granted
                    }
                })
            })
    }
}

#[async_trait]
impl Authorizer for GrantTable {
    async fn has_capability(
        &self,
        user: &User,
        capability: Capability,
        file: &File,
    ) -> anyhow::Result<bool> {
        if user.is_superuser {
            return Ok(true);
        }
        let relpath = file.relpath()?;
        Ok(self.allows(&user.username, capability, relpath))
    }
}
