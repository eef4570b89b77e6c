// [libs/gateway/registry/src/lib.rs]
/*!
 * =================================================================
 * APARATO: PROVIDER REGISTRY (V1.0)
 * CLASIFICACIÓN: DOMAIN LOGIC (ESTRATO L2)
 * RESPONSABILIDAD: ALIAS→(PROVIDER,MODEL), PRICING Y BINDINGS DE AGENTE
 *
 * Built once from config at startup and read-only thereafter — there is
 * no mutation path once `Registry::build` returns, only an explicit
 * reload that constructs a fresh instance and swaps it in.
 * =================================================================
 */

use hounfour_gateway_models::{PricingEntry, ProviderBinding, ProviderModel};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("BINDING_INVALID: agent '{agent}' {reason}")]
    BindingInvalid { agent: String, reason: String },
    #[error("unknown alias '{0}'")]
    UnknownAlias(String),
    #[error("no pricing entry for {provider}:{model}")]
    UnknownPricing { provider: String, model: String },
}

/// Result row of `validate_bindings` (§4.D): one entry per configured
/// agent, `valid=false` carrying the dangling reference's reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingValidation {
    pub agent: String,
    pub valid: bool,
    pub reason: Option<String>,
}

/// Raw, pre-validation configuration shape the registry is built from.
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// alias -> concrete (provider, model)
    pub aliases: Vec<(String, ProviderModel)>,
    /// agent -> alias
    pub agent_aliases: Vec<(String, String)>,
    pub pricing: Vec<PricingEntry>,
}

pub struct Registry {
    aliases: HashMap<String, ProviderModel>,
    bindings: HashMap<String, ProviderBinding>,
    pricing: HashMap<ProviderModel, PricingEntry>,
}

impl Registry {
    /// Builds the registry from raw config. Does not itself reject
    /// dangling references — call `validate_bindings` after construction
    /// if startup should fail fast on `BINDING_INVALID`.
    pub fn build(config: RegistryConfig) -> Self {
        let aliases: HashMap<String, ProviderModel> = config.aliases.into_iter().collect();

        let pricing: HashMap<ProviderModel, PricingEntry> = config
            .pricing
            .into_iter()
            .map(|entry| (ProviderModel::new(entry.provider.clone(), entry.model.clone()), entry))
            .collect();

        let bindings: HashMap<String, ProviderBinding> = config
            .agent_aliases
            .into_iter()
            .filter_map(|(agent, alias)| {
                aliases.get(&alias).map(|target| {
                    (
                        agent.clone(),
                        ProviderBinding {
                            agent,
                            alias,
                            target: target.clone(),
                        },
                    )
                })
            })
            .collect();

        Self {
            aliases,
            bindings,
            pricing,
        }
    }

    pub fn resolve_alias(&self, alias: &str) -> Result<ProviderModel, RegistryError> {
        self.aliases
            .get(alias)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownAlias(alias.to_string()))
    }

    pub fn get_pricing(&self, provider: &str, model: &str) -> Result<PricingEntry, RegistryError> {
        let key = ProviderModel::new(provider, model);
        self.pricing.get(&key).cloned().ok_or_else(|| RegistryError::UnknownPricing {
            provider: provider.to_string(),
            model: model.to_string(),
        })
    }

    pub fn get_agent_binding(&self, agent: &str) -> Result<ProviderBinding, RegistryError> {
        self.bindings.get(agent).cloned().ok_or_else(|| RegistryError::BindingInvalid {
            agent: agent.to_string(),
            reason: "has no resolvable alias binding".to_string(),
        })
    }

    /// Walks every configured agent→alias→(provider,model)→pricing chain
    /// and reports which ones dangle, without panicking (§4.D).
    pub fn validate_bindings(&self, configured_agents: &[String]) -> Vec<BindingValidation> {
        configured_agents
            .iter()
            .map(|agent| match self.bindings.get(agent) {
                None => {
                    tracing::warn!(agent, "agent binding dangles: alias not found in registry");
                    BindingValidation {
                        agent: agent.clone(),
                        valid: false,
                        reason: Some("alias does not resolve to a known provider/model".to_string()),
                    }
                }
                Some(binding) => match self.pricing.get(&binding.target) {
                    Some(_) => BindingValidation {
                        agent: agent.clone(),
                        valid: true,
                        reason: None,
                    },
                    None => {
                        tracing::warn!(agent, target = %binding.target, "agent binding dangles: no pricing row");
                        BindingValidation {
                            agent: agent.clone(),
                            valid: false,
                            reason: Some(format!("no pricing entry for {}", binding.target)),
                        }
                    }
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> RegistryConfig {
        RegistryConfig {
            aliases: vec![("fast".into(), ProviderModel::new("openai", "gpt-4o-mini"))],
            agent_aliases: vec![
                ("translator".into(), "fast".into()),
                ("ghost-agent".into(), "missing-alias".into()),
            ],
            pricing: vec![PricingEntry {
                provider: "openai".into(),
                model: "gpt-4o-mini".into(),
                input_micro_per_million: 2_500_000,
                output_micro_per_million: 10_000_000,
                reasoning_micro_per_million: None,
                price_table_version: 1,
            }],
        }
    }

    #[test]
    fn resolves_alias_and_pricing_for_a_valid_chain() {
        let registry = Registry::build(sample_config());
        let target = registry.resolve_alias("fast").unwrap();
        assert_eq!(target, ProviderModel::new("openai", "gpt-4o-mini"));

        let binding = registry.get_agent_binding("translator").unwrap();
        assert_eq!(binding.target, target);

        let pricing = registry.get_pricing("openai", "gpt-4o-mini").unwrap();
        assert_eq!(pricing.input_micro_per_million, 2_500_000);
    }

    #[test]
    fn validate_bindings_flags_dangling_alias() {
        let registry = Registry::build(sample_config());
        let report = registry.validate_bindings(&["translator".into(), "ghost-agent".into()]);

        assert!(report[0].valid);
        assert!(!report[1].valid);
        assert!(report[1].reason.as_ref().unwrap().contains("does not resolve"));
    }

    #[test]
    fn validate_bindings_flags_missing_pricing_row() {
        let mut config = sample_config();
        config.pricing.clear();
        let registry = Registry::build(config);

        let report = registry.validate_bindings(&["translator".into()]);
        assert!(!report[0].valid);
        assert!(report[0].reason.as_ref().unwrap().contains("no pricing entry"));
    }

    #[test]
    fn unknown_alias_and_pricing_surface_typed_errors() {
        let registry = Registry::build(sample_config());
        assert!(matches!(registry.resolve_alias("ghost"), Err(RegistryError::UnknownAlias(_))));
        assert!(matches!(
            registry.get_pricing("openai", "gpt-5"),
            Err(RegistryError::UnknownPricing { .. })
        ));
        assert!(matches!(
            registry.get_agent_binding("ghost-agent"),
            Err(RegistryError::BindingInvalid { .. })
        ));
    }
}
