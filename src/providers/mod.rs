//! AI provider registry.
//!
//! A provider maps a logical id ("anthropic", "codex", ...) to the
//! credential shape it needs and a factory that turns that credential into
//! a ready [`LanguageModel`]. The worker only ever sees provider ids;
//! adding a backend means registering another [`Provider`].

mod credentials;

pub use credentials::{CredentialResolver, ResolvedModel};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use prforge_common::{AuthType, OAuthTokens};
use secrecy::SecretString;

use crate::config::{ProviderSettings, WorkerConfig};
use crate::errors::ProviderError;
use crate::llm::{AnthropicModel, LanguageModel, OpenAiChatModel};

pub const DEFAULT_MAX_TOKENS: u32 = 8192;

/// A decrypted credential, shaped by the provider's [`AuthType`].
pub enum Credential {
    ApiKey(SecretString),
    OAuth(OAuthTokens),
}

impl Credential {
    pub fn auth_type(&self) -> AuthType {
        match self {
            Self::ApiKey(_) => AuthType::ApiKey,
            Self::OAuth(_) => AuthType::OAuth,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("Credential::ApiKey([REDACTED])"),
            Self::OAuth(tokens) => f.debug_tuple("Credential::OAuth").field(tokens).finish(),
        }
    }
}

pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    fn auth_type(&self) -> AuthType;

    fn max_tokens(&self) -> u32 {
        DEFAULT_MAX_TOKENS
    }

    fn create_model(&self, credential: Credential) -> Result<Arc<dyn LanguageModel>, ProviderError>;
}

fn mismatch(id: &str, expected: AuthType) -> ProviderError {
    ProviderError::CredentialMismatch {
        id: id.to_string(),
        expected,
    }
}

/// Anthropic Messages API with an organization API key.
pub struct AnthropicProvider {
    settings: ProviderSettings,
}

impl AnthropicProvider {
    pub const ID: &'static str = "anthropic";
    const DEFAULT_MODEL: &'static str = "claude-sonnet-4-5";

    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }
}

impl Provider for AnthropicProvider {
    fn id(&self) -> &str {
        Self::ID
    }

    fn auth_type(&self) -> AuthType {
        AuthType::ApiKey
    }

    fn max_tokens(&self) -> u32 {
        self.settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    fn create_model(&self, credential: Credential) -> Result<Arc<dyn LanguageModel>, ProviderError> {
        let Credential::ApiKey(key) = credential else {
            return Err(mismatch(Self::ID, AuthType::ApiKey));
        };
        let model = AnthropicModel::new(
            key,
            self.settings
                .model
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
            self.settings.base_url.clone(),
        )?;
        Ok(Arc::new(model))
    }
}

/// OpenAI Chat Completions with an organization API key.
pub struct OpenAiProvider {
    settings: ProviderSettings,
}

impl OpenAiProvider {
    pub const ID: &'static str = "openai";
    const DEFAULT_MODEL: &'static str = "gpt-5";

    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }
}

impl Provider for OpenAiProvider {
    fn id(&self) -> &str {
        Self::ID
    }

    fn auth_type(&self) -> AuthType {
        AuthType::ApiKey
    }

    fn max_tokens(&self) -> u32 {
        self.settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    fn create_model(&self, credential: Credential) -> Result<Arc<dyn LanguageModel>, ProviderError> {
        let Credential::ApiKey(key) = credential else {
            return Err(mismatch(Self::ID, AuthType::ApiKey));
        };
        let model = OpenAiChatModel::new(
            Self::ID,
            key,
            self.settings
                .model
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
            self.settings.base_url.clone(),
        )?;
        Ok(Arc::new(model))
    }
}

/// Codex models reached with a connected ChatGPT account's OAuth token.
///
/// Account tokens are not accepted by the public OpenAI API, so there is
/// no default endpoint: `[providers.codex].base_url` must name an
/// OpenAI-compatible Chat Completions gateway that takes them.
pub struct CodexProvider {
    settings: ProviderSettings,
}

impl CodexProvider {
    pub const ID: &'static str = "codex";
    const DEFAULT_MODEL: &'static str = "gpt-5-codex";

    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }
}

impl Provider for CodexProvider {
    fn id(&self) -> &str {
        Self::ID
    }

    fn auth_type(&self) -> AuthType {
        AuthType::OAuth
    }

    fn max_tokens(&self) -> u32 {
        self.settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    fn create_model(&self, credential: Credential) -> Result<Arc<dyn LanguageModel>, ProviderError> {
        let Credential::OAuth(tokens) = credential else {
            return Err(mismatch(Self::ID, AuthType::OAuth));
        };
        let base_url = self
            .settings
            .base_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ProviderError::MissingEndpoint {
                id: Self::ID.to_string(),
            })?;
        let model = OpenAiChatModel::new(
            Self::ID,
            SecretString::from(tokens.access_token),
            self.settings
                .model
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
            Some(base_url),
        )?
        .with_account_id(tokens.account_id);
        Ok(Arc::new(model))
    }
}

/// Explicitly populated map of provider id to strategy.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in providers, configured from `[providers.<id>]`.
    pub fn with_defaults(config: &WorkerConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AnthropicProvider::new(
            config.provider(AnthropicProvider::ID),
        )));
        registry.register(Arc::new(OpenAiProvider::new(
            config.provider(OpenAiProvider::ID),
        )));
        registry.register(Arc::new(CodexProvider::new(
            config.provider(CodexProvider::ID),
        )));
        registry
    }

    /// Add or replace the provider registered under its id.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider { id: id.to_string() })
    }

    pub fn ids(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.values()
    }
}
