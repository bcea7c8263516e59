//! Visibility-based access decisions and signed download URLs

use super::token::{decode_access_token, encode_access_token};
use super::{AccessClaims, Authorizer, Principal, UserClaim};
use crate::error::FsResult;
use crate::node::{File, Folder, Visibility};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_TOKEN_TTL_SECS: i64 = 60;

/// A signed, time-limited download link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessUrl {
    pub url: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessGrant {
    Granted(AccessUrl),
    Denied,
}

/// Why the gate refused a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("no access token supplied")]
    Missing,
    #[error("access token signature mismatch")]
    BadSignature,
    #[error("malformed access token")]
    Malformed,
    #[error("access token expired")]
    Expired,
    #[error("access token names an unknown principal")]
    UnknownPrincipal,
    #[error("access token was issued to another client")]
    OriginMismatch,
    #[error("access token was issued for another file")]
    PathMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(AccessClaims),
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }
}

#[derive(Clone)]
pub struct AccessController {
    secret: String,
    site: String,
    base_url: String,
    default_ttl: Duration,
    bind_origin: bool,
    bind_path: bool,
    authorizer: Arc<dyn Authorizer>,
}

impl AccessController {
    pub fn new(
        secret: impl Into<String>,
        site: impl Into<String>,
        base_url: impl Into<String>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            secret: secret.into(),
            site: site.into(),
            base_url: base_url.into(),
            default_ttl: Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
            bind_origin: false,
            bind_path: false,
            authorizer,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Reject tokens presented from an address other than the one they
    /// were issued to.
    pub fn with_origin_binding(mut self, bind: bool) -> Self {
        self.bind_origin = bind;
        self
    }

    pub fn binds_origin(&self) -> bool {
        self.bind_origin
    }

    /// Reject tokens presented for a file other than the one they were
    /// issued for.
    pub fn with_path_binding(mut self, bind: bool) -> Self {
        self.bind_path = bind;
        self
    }

    pub fn binds_path(&self) -> bool {
        self.bind_path
    }

    /// Whether `principal` may download `file`. Authorizer failures deny.
    pub async fn check_permission(&self, file: &File, principal: &Principal) -> bool {
        let visibility = file.visibility();
        if visibility == Visibility::Public {
            return true;
        }
        let Some(user) = principal.user() else {
            return false;
        };
        if visibility == Visibility::Private && !self.authorizer.is_staff_or_superuser(user) {
            return false;
        }

        match self.authorizer.has_download_capability(user, file).await {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::error!(
                    path = %file,
                    user = %user.username,
                    error = %e,
                    "capability check failed, denying"
                );
                false
            }
        }
    }

    /// Public URL of a file: `{site}{base_url}{relpath}`.
    pub fn public_url(&self, file: &File) -> FsResult<String> {
        let relpath = file.relpath()?;
        let mut url = self.site.trim_end_matches('/').to_string();
        let base = self.base_url.trim_matches('/');
        if !base.is_empty() {
            url.push('/');
            url.push_str(base);
        }
        url.push('/');
        url.push_str(relpath.trim_start_matches('/'));
        Ok(url)
    }

    pub async fn issue_access_token(
        &self,
        file: &File,
        principal: &Principal,
        origin: &str,
        valid_for: Option<Duration>,
    ) -> FsResult<AccessGrant> {
        self.issue_access_token_at(file, principal, origin, valid_for, Utc::now())
            .await
    }

    pub async fn issue_access_token_at(
        &self,
        file: &File,
        principal: &Principal,
        origin: &str,
        valid_for: Option<Duration>,
        now: DateTime<Utc>,
    ) -> FsResult<AccessGrant> {
        if !self.check_permission(file, principal).await {
            tracing::info!(path = %file, principal = %principal, "access denied");
            return Ok(AccessGrant::Denied);
        }

        let expires_at = now + valid_for.unwrap_or(self.default_ttl);
        let claims = AccessClaims {
            user: principal
                .user()
                .map(UserClaim::from_user)
                .unwrap_or_else(UserClaim::anonymous),
            ipc: origin.to_string(),
            exp: expires_at.timestamp(),
            path: Some(file.relpath()?.to_string()),
        };
        let token = encode_access_token(&self.secret, &claims)?;
        let url = self.public_url(file)?;

        tracing::debug!(path = %file, principal = %principal, ipc = origin, "access token issued");
        Ok(AccessGrant::Granted(AccessUrl {
            url,
            token,
            expires_at: Utc
                .timestamp_opt(claims.exp, 0)
                .single()
                .unwrap_or(expires_at),
        }))
    }

    pub fn verify_access_token(&self, token: Option<&str>) -> Verdict {
        self.verify_access_token_at(token, Utc::now())
    }

    pub fn verify_access_token_at(&self, token: Option<&str>, now: DateTime<Utc>) -> Verdict {
        let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            return Verdict::Rejected(Rejection::Missing);
        };

        let claims = match decode_access_token(&self.secret, token) {
            Ok(claims) => claims,
            Err(e) => {
                let rejection = match e.kind() {
                    ErrorKind::InvalidSignature => Rejection::BadSignature,
                    ErrorKind::ExpiredSignature => Rejection::Expired,
                    _ => Rejection::Malformed,
                };
                return Verdict::Rejected(rejection);
            }
        };

        if claims.exp <= now.timestamp() {
            return Verdict::Rejected(Rejection::Expired);
        }
        if !claims.user.is_known() {
            return Verdict::Rejected(Rejection::UnknownPrincipal);
        }
        Verdict::Accepted(claims)
    }

    /// Verify a token presented by `client`, honoring origin binding.
    pub fn verify_for_client(&self, token: Option<&str>, client: Option<&str>) -> Verdict {
        self.verify_for_client_at(token, client, Utc::now())
    }

    pub fn verify_for_client_at(
        &self,
        token: Option<&str>,
        client: Option<&str>,
        now: DateTime<Utc>,
    ) -> Verdict {
        match self.verify_access_token_at(token, now) {
            Verdict::Accepted(claims) if self.bind_origin && client != Some(claims.ipc.as_str()) => {
                Verdict::Rejected(Rejection::OriginMismatch)
            }
            verdict => verdict,
        }
    }

    /// Verify a token presented by `client` for the file at `path`,
    /// honoring origin and path binding.
    pub fn verify_request(&self, token: Option<&str>, client: Option<&str>, path: &str) -> Verdict {
        self.verify_request_at(token, client, path, Utc::now())
    }

    pub fn verify_request_at(
        &self,
        token: Option<&str>,
        client: Option<&str>,
        path: &str,
        now: DateTime<Utc>,
    ) -> Verdict {
        match self.verify_for_client_at(token, client, now) {
            Verdict::Accepted(claims) if self.bind_path && claims.path.as_deref() != Some(path) => {
                Verdict::Rejected(Rejection::PathMismatch)
            }
            verdict => verdict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Capability, GrantDocument, GrantTable, User};
    use crate::path::PathNormalizer;

    const SECRET: &str = "access-secret";

    fn file(raw: &str, visibility: Visibility) -> File {
        File::new(&PathNormalizer::default(), raw)
            .unwrap()
            .with_visibility(visibility)
    }

    fn controller(table: GrantTable) -> AccessController {
        AccessController::new(SECRET, "http://files.example.com/", "/file/", Arc::new(table))
    }

    fn empty_table() -> GrantTable {
        GrantTable::from_document(GrantDocument::initial()).unwrap()
    }

    #[tokio::test]
    async fn test_public_file_open_to_anonymous() {
        let access = controller(empty_table());
        assert!(access
            .check_permission(&file("logo.png", Visibility::Public), &Principal::Anonymous)
            .await);
    }

    #[tokio::test]
    async fn test_protected_needs_download_capability() {
        let mut table = empty_table();
        table.grant("alice", Capability::Download, "/docs/");
        let access = controller(table);
        let doc = file("docs/plan.pdf", Visibility::Protected);

        assert!(!access.check_permission(&doc, &Principal::Anonymous).await);
        assert!(!access.check_permission(&doc, &Principal::User(User::new("bob"))).await);
        assert!(access.check_permission(&doc, &Principal::User(User::new("alice"))).await);
    }

    #[tokio::test]
    async fn test_private_needs_staff_and_capability() {
        let mut table = empty_table();
        table.grant("alice", Capability::Download, "/secret/");
        table.grant("sam", Capability::Download, "/secret/");
        let access = controller(table);
        let secret = file("secret/keys.txt", Visibility::Private);

        // authenticated, not staff, no capability
        assert!(!access.check_permission(&secret, &Principal::User(User::new("bob"))).await);
        // capability without staff
        assert!(!access.check_permission(&secret, &Principal::User(User::new("alice"))).await);

        let mut sam = User::new("sam");
        sam.is_staff = true;
        assert!(access.check_permission(&secret, &Principal::User(sam)).await);

        let mut eve = User::new("eve");
        eve.is_staff = true;
        assert!(!access.check_permission(&secret, &Principal::User(eve)).await);
    }

    #[tokio::test]
    async fn test_token_accepted_then_expires() {
        let access = controller(empty_table());
        let logo = file("img/logo.png", Visibility::Public);
        let now = Utc::now();

        let AccessGrant::Granted(grant) = access
            .issue_access_token_at(&logo, &Principal::Anonymous, "127.0.0.1", Some(Duration::minutes(1)), now)
            .await
            .unwrap()
        else {
            panic!("public file should be granted");
        };
        assert_eq!(grant.url, "http://files.example.com/file/img/logo.png");
        assert_eq!(grant.expires_at.timestamp(), (now + Duration::minutes(1)).timestamp());

        let verdict = access.verify_access_token_at(Some(&grant.token), now);
        let Verdict::Accepted(claims) = verdict else {
            panic!("fresh token rejected: {:?}", verdict);
        };
        assert_eq!(claims.user, UserClaim::anonymous());
        assert_eq!(claims.ipc, "127.0.0.1");

        let later = now + Duration::seconds(61);
        assert_eq!(
            access.verify_access_token_at(Some(&grant.token), later),
            Verdict::Rejected(Rejection::Expired)
        );
    }

    #[tokio::test]
    async fn test_default_ttl_applies() {
        let access = controller(empty_table()).with_ttl(Duration::seconds(5));
        let now = Utc::now();
        let AccessGrant::Granted(grant) = access
            .issue_access_token_at(&file("a.txt", Visibility::Public), &Principal::Anonymous, "::1", None, now)
            .await
            .unwrap()
        else {
            panic!("public file should be granted");
        };
        assert!(access.verify_access_token_at(Some(&grant.token), now + Duration::seconds(4)).is_accepted());
        assert!(!access.verify_access_token_at(Some(&grant.token), now + Duration::seconds(5)).is_accepted());
    }

    #[tokio::test]
    async fn test_denied_grant() {
        let access = controller(empty_table());
        let grant = access
            .issue_access_token(&file("p.txt", Visibility::Private), &Principal::Anonymous, "1.2.3.4", None)
            .await
            .unwrap();
        assert_eq!(grant, AccessGrant::Denied);
    }

    #[test]
    fn test_rejections() {
        let access = controller(empty_table());
        assert_eq!(access.verify_access_token(None), Verdict::Rejected(Rejection::Missing));
        assert_eq!(access.verify_access_token(Some("  ")), Verdict::Rejected(Rejection::Missing));
        assert_eq!(
            access.verify_access_token(Some("not-a-jwt")),
            Verdict::Rejected(Rejection::Malformed)
        );

        let claims = AccessClaims {
            user: UserClaim::anonymous(),
            ipc: "1.1.1.1".into(),
            exp: (Utc::now() + Duration::minutes(5)).timestamp(),
            path: None,
        };
        let forged = encode_access_token("wrong-secret", &claims).unwrap();
        assert_eq!(
            access.verify_access_token(Some(&forged)),
            Verdict::Rejected(Rejection::BadSignature)
        );

        let stranger = AccessClaims {
            user: UserClaim::Marker("__root__".into()),
            ..claims
        };
        let token = encode_access_token(SECRET, &stranger).unwrap();
        assert_eq!(
            access.verify_access_token(Some(&token)),
            Verdict::Rejected(Rejection::UnknownPrincipal)
        );
    }

    #[tokio::test]
    async fn test_origin_binding() {
        let access = controller(empty_table()).with_origin_binding(true);
        let AccessGrant::Granted(grant) = access
            .issue_access_token(&file("a.txt", Visibility::Public), &Principal::Anonymous, "10.0.0.1", None)
            .await
            .unwrap()
        else {
            panic!("public file should be granted");
        };

        assert!(access.verify_for_client(Some(&grant.token), Some("10.0.0.1")).is_accepted());
        assert_eq!(
            access.verify_for_client(Some(&grant.token), Some("10.0.0.2")),
            Verdict::Rejected(Rejection::OriginMismatch)
        );
    }

    #[tokio::test]
    async fn test_path_binding() {
        let access = controller(empty_table()).with_path_binding(true);
        let AccessGrant::Granted(grant) = access
            .issue_access_token(&file("docs/a.txt", Visibility::Public), &Principal::Anonymous, "", None)
            .await
            .unwrap()
        else {
            panic!("public file should be granted");
        };

        assert!(access.verify_request(Some(&grant.token), None, "/docs/a.txt").is_accepted());
        assert_eq!(
            access.verify_request(Some(&grant.token), None, "/docs/b.txt"),
            Verdict::Rejected(Rejection::PathMismatch)
        );

        let unbound = controller(empty_table());
        assert!(unbound.verify_request(Some(&grant.token), None, "/docs/b.txt").is_accepted());
    }
}
