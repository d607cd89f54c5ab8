//! OAuth credentials handed to adapters.

use serde::{Deserialize, Serialize};

/// Credentials for one side of a transfer.
///
/// Serialized as tagged JSON before encryption; the tag keeps the variant
/// stable across worker versions.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthData {
    /// Bare bearer token.
    Token {
        #[serde(rename = "accessToken")]
        access_token: String,
    },
    /// OAuth2 tokens plus the endpoint to refresh them.
    TokensAndUrl {
        #[serde(rename = "accessToken")]
        access_token: String,
        #[serde(rename = "refreshToken")]
        refresh_token: String,
        #[serde(rename = "tokenServerUrl")]
        token_server_url: String,
    },
    /// OAuth1 token/secret pair.
    TokenSecret { token: String, secret: String },
}

impl AuthData {
    pub fn token(access_token: impl Into<String>) -> Self {
        Self::Token {
            access_token: access_token.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuthData::Token { .. } => "token",
            AuthData::TokensAndUrl { .. } => "tokens_and_url",
            AuthData::TokenSecret { .. } => "token_secret",
        }
    }

    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

impl core::fmt::Debug for AuthData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "AuthData::{}(<redacted>)", self.kind())
    }
}
