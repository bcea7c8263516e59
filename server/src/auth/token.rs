//! JWT handling
//!
//! Two kinds of HS256 tokens share the server secret:
//! - access tokens, `{user, ipc, exp}`, minted per download and checked by
//!   the file gate;
//! - identity tokens, presented as `Authorization: Bearer`, naming the
//!   calling user.

use super::User;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Marker stored in place of a user descriptor for anonymous downloads.
pub const ANONYMOUS: &str = "__anonymous__";

/// Who an access token was issued to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserClaim {
    User {
        username: String,
        first_name: String,
        last_name: String,
    },
    /// Expected to be [`ANONYMOUS`]; anything else is rejected on verify.
    Marker(String),
}

impl UserClaim {
    pub fn anonymous() -> Self {
        UserClaim::Marker(ANONYMOUS.to_string())
    }

    pub fn from_user(user: &User) -> Self {
        UserClaim::User {
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
        }
    }

    pub fn is_known(&self) -> bool {
        match self {
            UserClaim::User { username, .. } => !username.is_empty(),
            UserClaim::Marker(marker) => marker == ANONYMOUS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub user: UserClaim,
    /// Client address the token was issued to
    pub ipc: String,
    pub exp: i64,
    /// Relpath of the file the token was issued for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

pub(crate) fn encode_access_token(
    secret: &str,
    claims: &AccessClaims,
) -> jsonwebtoken::errors::Result<String> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Check the signature and shape only; expiry is compared by the caller
/// against its own clock.
pub(crate) fn decode_access_token(
    secret: &str,
    token: &str,
) -> jsonwebtoken::errors::Result<AccessClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.set_required_spec_claims(&["exp"]);

    let data = decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

#[derive(Debug, Serialize, Deserialize)]
struct IdentityClaims {
    sub: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    is_staff: bool,
    #[serde(default)]
    is_superuser: bool,
    exp: i64,
    iat: i64,
    token_type: String,
}

/// Create an identity token for `user`, valid for `ttl`.
pub fn create_identity_token(secret: &str, user: &User, ttl: Duration) -> anyhow::Result<String> {
    create_identity_token_at(secret, user, ttl, Utc::now())
}

pub fn create_identity_token_at(
    secret: &str,
    user: &User,
    ttl: Duration,
    now: DateTime<Utc>,
) -> anyhow::Result<String> {
    let claims = IdentityClaims {
        sub: user.username.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        is_staff: user.is_staff,
        is_superuser: user.is_superuser,
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
        token_type: "access".to_string(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Verify an identity token and extract the user it names.
pub fn verify_identity_token(secret: &str, token: &str) -> anyhow::Result<User> {
    let token_data = decode::<IdentityClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    let claims = token_data.claims;
    if claims.token_type != "access" {
        anyhow::bail!("Not an access token");
    }
    if claims.sub.is_empty() {
        anyhow::bail!("Token has no subject");
    }

    Ok(User {
        username: claims.sub,
        first_name: claims.first_name,
        last_name: claims.last_name,
        is_staff: claims.is_staff,
        is_superuser: claims.is_superuser,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_secret";

    #[test]
    fn test_identity_roundtrip() {
        let mut user = User::new("alice");
        user.first_name = "Alice".into();
        user.is_staff = true;

        let token = create_identity_token(SECRET, &user, Duration::hours(1)).unwrap();
        assert_eq!(verify_identity_token(SECRET, &token).unwrap(), user);
    }

    #[test]
    fn test_invalid_identity_token() {
        assert!(verify_identity_token(SECRET, "invalid_token").is_err());

        let token = create_identity_token(SECRET, &User::new("bob"), Duration::hours(1)).unwrap();
        assert!(verify_identity_token("other_secret", &token).is_err());
    }

    #[test]
    fn test_expired_identity_token() {
        let issued = Utc::now() - Duration::hours(2);
        let token =
            create_identity_token_at(SECRET, &User::new("bob"), Duration::hours(1), issued)
                .unwrap();
        assert!(verify_identity_token(SECRET, &token).is_err());
    }

    #[test]
    fn test_access_claims_wire_shape() {
        let claims = AccessClaims {
            user: UserClaim::anonymous(),
            ipc: "10.0.0.7".into(),
            exp: 1_700_000_000,
            path: None,
        };
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"user": "__anonymous__", "ipc": "10.0.0.7", "exp": 1_700_000_000})
        );

        let token = encode_access_token(SECRET, &claims).unwrap();
        // exp is in the past but decoding leaves expiry to the caller
        assert_eq!(decode_access_token(SECRET, &token).unwrap(), claims);
    }

    #[test]
    fn test_user_descriptor_claim() {
        let mut user = User::new("carol");
        user.last_name = "Doe".into();
        let json = serde_json::to_value(UserClaim::from_user(&user)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"username": "carol", "first_name": "", "last_name": "Doe"})
        );
        assert!(UserClaim::from_user(&user).is_known());
        assert!(!UserClaim::Marker("__nobody__".into()).is_known());
    }
}
