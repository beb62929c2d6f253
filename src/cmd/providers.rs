//! `prforge providers`

use anyhow::Result;

use prforge::config::WorkerConfig;
use prforge::providers::ProviderRegistry;

pub fn cmd_providers(config: &WorkerConfig) -> Result<()> {
    let registry = ProviderRegistry::with_defaults(config);
    for provider in registry.iter() {
        println!("{:<12} {}", provider.id(), provider.auth_type());
    }
    Ok(())
}
