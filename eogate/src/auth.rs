//! Credential supply.
//!
//! The gateway never performs an authentication handshake itself. It asks an
//! [`Authenticator`] for [`Credentials`] and attaches them to outgoing
//! requests. [`StaticAuthenticator`] covers the common case of API keys,
//! tokens and user/password pairs taken from configuration; callers with
//! an OAuth or OpenID flow plug in their own implementation.

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};
use crate::http::HttpRequest;
use crate::plugins::template::{placeholders, render_with};

/// Prefix of environment variables overriding configured credentials:
/// `EOGATE__<PROVIDER>__AUTH__<KEY>`.
pub const ENV_PREFIX: &str = "EOGATE";

/// Material attached to outgoing requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    #[default]
    None,
    Headers(Vec<(String, String)>),
    Bearer(String),
    Basic {
        username: String,
        password: String,
    },
    QueryParams(Vec<(String, String)>),
}

impl Credentials {
    /// Returns `request` with the credentials attached.
    pub fn apply(&self, mut request: HttpRequest) -> HttpRequest {
        match self {
            Self::None => {}
            Self::Headers(headers) => request.headers.extend(headers.iter().cloned()),
            Self::Bearer(token) => request
                .headers
                .push(("Authorization".to_string(), format!("Bearer {}", token))),
            Self::Basic { username, password } => {
                request.basic_auth = Some((username.clone(), password.clone()))
            }
            Self::QueryParams(params) => request.query.extend(params.iter().cloned()),
        }
        request
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Source of credentials for one provider.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self) -> BoxFuture<'_, GatewayResult<Credentials>>;

    /// Whether the material needed to authenticate is present at all.
    ///
    /// Checked once at registration; providers answering `false` for a
    /// capability that needs authentication are pruned.
    fn has_credentials(&self) -> bool;
}

/// How configured credentials are turned into request material.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Header templates, e.g. `{"X-Api-Key": "{apikey}"}`.
    #[default]
    Header,
    /// `Authorization: Bearer {token}`.
    Bearer,
    /// HTTP basic with `username` / `password`.
    Basic,
    /// Query parameter templates, e.g. `{"apikey": "{apikey}"}`.
    Query,
}

/// Authentication section of a provider configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub method: AuthMethod,
    /// Secret values, referenced by name from the templates.
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl AuthConfig {
    /// Credential keys the configured method needs.
    pub fn required_keys(&self) -> Vec<String> {
        let from_templates = |templates: &BTreeMap<String, String>| -> Vec<String> {
            let mut keys: Vec<String> = templates.values().flat_map(|t| placeholders(t)).collect();
            keys.sort();
            keys.dedup();
            keys
        };
        match self.method {
            AuthMethod::Header => from_templates(&self.headers),
            AuthMethod::Query => from_templates(&self.params),
            AuthMethod::Bearer => vec!["token".to_string()],
            AuthMethod::Basic => vec!["username".to_string(), "password".to_string()],
        }
    }

    pub fn has_credentials(&self) -> bool {
        let required = self.required_keys();
        if required.is_empty() {
            return !self.credentials.is_empty();
        }
        required
            .iter()
            .all(|k| self.credentials.get(k).is_some_and(|v| !v.is_empty()))
    }

    /// Applies `EOGATE__<PROVIDER>__AUTH__<KEY>` overrides from `vars`.
    ///
    /// Provider and key matching is case-insensitive; keys are stored
    /// lowercase.
    pub fn with_env_overrides<I>(mut self, provider: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let prefix = format!("{}__{}__AUTH__", ENV_PREFIX, provider.to_ascii_uppercase());
        for (name, value) in vars {
            if let Some(key) = name.to_ascii_uppercase().strip_prefix(&prefix) {
                if !key.is_empty() {
                    debug!(provider, key = %key.to_ascii_lowercase(), "credential overridden from environment");
                    self.credentials.insert(key.to_ascii_lowercase(), value);
                }
            }
        }
        self
    }

    fn build(&self, provider: &str) -> GatewayResult<Credentials> {
        let missing = || GatewayError::Authentication {
            provider: provider.to_string(),
            reason: format!(
                "missing credentials (need {})",
                self.required_keys().join(", ")
            ),
        };
        if !self.has_credentials() {
            return Err(missing());
        }
        let lookup = |name: &str| self.credentials.get(name).cloned();
        let render_all = |templates: &BTreeMap<String, String>| {
            templates
                .iter()
                .map(|(k, t)| render_with(t, lookup).map(|v| (k.clone(), v)))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(missing)
        };
        Ok(match self.method {
            AuthMethod::Header if self.headers.is_empty() => Credentials::Headers(
                self.credentials
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            AuthMethod::Header => Credentials::Headers(render_all(&self.headers)?),
            AuthMethod::Query if self.params.is_empty() => Credentials::QueryParams(
                self.credentials
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            AuthMethod::Query => Credentials::QueryParams(render_all(&self.params)?),
            AuthMethod::Bearer => Credentials::Bearer(lookup("token").ok_or_else(missing)?),
            AuthMethod::Basic => Credentials::Basic {
                username: lookup("username").ok_or_else(missing)?,
                password: lookup("password").ok_or_else(missing)?,
            },
        })
    }
}

/// Authenticator serving credentials straight from configuration.
#[derive(Debug, Clone)]
pub struct StaticAuthenticator {
    provider: String,
    config: AuthConfig,
}

impl StaticAuthenticator {
    pub fn new(provider: impl Into<String>, config: AuthConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
        }
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self) -> BoxFuture<'_, GatewayResult<Credentials>> {
        let result = self.config.build(&self.provider);
        Box::pin(async move { result })
    }

    fn has_credentials(&self) -> bool {
        self.config.has_credentials()
    }
}
