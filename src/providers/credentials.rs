use std::sync::Arc;

use chrono::Utc;
use prforge_common::{AuthType, CredentialStore};
use secrecy::SecretString;

use super::{Credential, ProviderRegistry};
use crate::errors::ProviderError;
use crate::llm::LanguageModel;

/// A model handle ready for one job.
pub struct ResolvedModel {
    pub provider_id: String,
    pub model: Arc<dyn LanguageModel>,
    pub max_tokens: u32,
}

/// Turns `(organization, provider id)` into a model handle by fetching and
/// decrypting the credential shape the provider declares.
pub struct CredentialResolver {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn CredentialStore>,
}

impl CredentialResolver {
    pub fn new(registry: Arc<ProviderRegistry>, store: Arc<dyn CredentialStore>) -> Self {
        Self { registry, store }
    }

    pub async fn resolve(&self, org_id: &str, provider_id: &str) -> Result<ResolvedModel, ProviderError> {
        let provider = self.registry.get(provider_id)?;

        let credential = match provider.auth_type() {
            AuthType::ApiKey => {
                let key = self
                    .store
                    .get_decrypted_api_key(org_id, provider_id)
                    .await?
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| ProviderError::MissingApiKey {
                        id: provider_id.to_string(),
                    })?;
                Credential::ApiKey(SecretString::from(key))
            }
            AuthType::OAuth => {
                let tokens = self
                    .store
                    .get_decrypted_oauth_tokens(org_id, provider_id)
                    .await?
                    .filter(|t| !t.access_token.is_empty())
                    .ok_or_else(|| ProviderError::MissingOAuth {
                        id: provider_id.to_string(),
                    })?;
                if tokens.is_expired(Utc::now()) {
                    return Err(ProviderError::OAuthExpired {
                        id: provider_id.to_string(),
                    });
                }
                Credential::OAuth(tokens)
            }
        };

        let model = provider.create_model(credential)?;
        tracing::debug!(provider = provider_id, model = model.model_name(), "resolved model");
        Ok(ResolvedModel {
            provider_id: provider_id.to_string(),
            model,
            max_tokens: provider.max_tokens(),
        })
    }
}
