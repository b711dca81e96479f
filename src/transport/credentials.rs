//! Credential handling for the agent endpoint

use serde::Deserialize;

use crate::{Error, Result};

/// How the client authenticates against the agent
#[derive(Clone, Default)]
pub enum Credentials {
    /// No credentials (local or proxied endpoints)
    #[default]
    None,
    /// API key sent as the `api_key` query parameter
    ApiKey(String),
    /// API key + secret exchanged for a short-lived access token
    ClientCredentials { api_key: String, secret_key: String },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::ApiKey(_) => write!(f, "ApiKey([redacted])"),
            Self::ClientCredentials { .. } => write!(f, "ClientCredentials([redacted])"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Exchange an API key and secret for an access token
///
/// # Errors
///
/// Returns error if the token endpoint rejects the credentials or returns
/// an unexpected body
pub async fn exchange_token(
    client: &reqwest::Client,
    token_url: &str,
    api_key: &str,
    secret_key: &str,
) -> Result<String> {
    let resp = client
        .post(token_url)
        .basic_auth(api_key, Some(secret_key))
        .form(&[("grant_type", "client_credentials")])
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Credentials(format!(
            "token exchange failed: {status} - {body}"
        )));
    }

    let token: TokenResponse = resp.json().await?;
    tracing::debug!("obtained access token");
    Ok(token.access_token)
}
