use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::users::repo_types::RoleSet;

/// Type of an issued credential.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
    ResetPassword,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
            TokenKind::ResetPassword => "reset_password",
        }
    }

    /// Scopes granted to a token of this kind.
    pub fn scopes(&self) -> Vec<String> {
        let scopes: &[&str] = match self {
            TokenKind::Access => &["profile", "sessions", "users", "face_verifications"],
            TokenKind::Refresh => &["refresh"],
            TokenKind::ResetPassword => &["reset_password"],
        };
        scopes.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(TokenKind::Access),
            "refresh" => Ok(TokenKind::Refresh),
            "reset_password" => Ok(TokenKind::ResetPassword),
            other => anyhow::bail!("unknown token type: {other}"),
        }
    }
}

/// JWT payload for access and refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,      // user ID
    pub email: String,
    pub roles: RoleSet,
    pub scopes: Vec<String>,
    pub kind: TokenKind,
    pub sid: Uuid,      // session shared by an access/refresh pair
    pub jti: Uuid,      // unique per token, keeps two pairs issued in the same second distinct
    pub iat: usize,     // issued at (unix timestamp)
    pub exp: usize,     // expires at (unix timestamp)
    pub iss: String,
    pub aud: String,
}
