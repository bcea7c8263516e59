//! Principals, capabilities and access control
//!
//! Authentication itself happens elsewhere; the server only verifies an
//! identity token and asks an [`Authorizer`] whether a user holds a
//! capability on a file.

pub mod access;
pub mod grants;
pub mod token;

pub use access::{AccessController, AccessGrant, AccessUrl, Rejection, Verdict};
pub use grants::{GrantDocument, GrantTable};
pub use token::{
    create_identity_token, verify_identity_token, AccessClaims, UserClaim, ANONYMOUS,
};

use crate::node::File;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An authenticated user as described by the identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub is_superuser: bool,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            first_name: String::new(),
            last_name: String::new(),
            is_staff: false,
            is_superuser: false,
        }
    }
}

/// Whoever is making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    User(User),
}

impl Principal {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Principal::User(_))
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Principal::User(user) => Some(user),
            Principal::Anonymous => None,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::Anonymous => f.write_str(ANONYMOUS),
            Principal::User(user) => f.write_str(&user.username),
        }
    }
}

/// Named permission grants checked per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Download,
    Upload,
}

impl Capability {
    pub const ALL: [Capability; 2] = [Capability::Download, Capability::Upload];

    pub fn name(&self) -> &'static str {
        match self {
            Capability::Download => "download",
            Capability::Upload => "upload",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// "Does user U hold capability C on file F?"
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn has_capability(
        &self,
        user: &User,
        capability: Capability,
        file: &File,
    ) -> anyhow::Result<bool>;

    async fn has_download_capability(&self, user: &User, file: &File) -> anyhow::Result<bool> {
        self.has_capability(user, Capability::Download, file).await
    }

    fn is_staff_or_superuser(&self, user: &User) -> bool {
        user.is_staff || user.is_superuser
    }
}
