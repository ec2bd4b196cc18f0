//! Static model listing bodies.
//!
//! The proxy serves exactly one model, the configured upstream one, under its
//! own name. Nothing here talks to the upstream.

use chrono::{Duration, Utc};
use serde_json::{json, Map};

use crate::config::ProxyConfig;
use crate::translate::ollama_types::{
    ModelDetails, PsResponse, RunningModel, ShowResponse, TagsModel, TagsResponse, VersionResponse,
};

fn details(config: &ProxyConfig) -> ModelDetails {
    let family = config.model_family();
    ModelDetails {
        parent_model: String::new(),
        format: config.model_card.format.clone(),
        family: family.clone(),
        families: vec![family],
        parameter_size: config.model_card.parameter_size.clone(),
        quantization_level: config.model_card.quantization_level.clone(),
    }
}

pub fn tags(config: &ProxyConfig) -> TagsResponse {
    let name = config.upstream.model.clone();
    TagsResponse {
        models: vec![TagsModel {
            name: name.clone(),
            model: name,
            modified_at: config.model_card.modified_at.clone(),
            size: config.model_card.size,
            digest: config.model_card.digest.clone(),
            details: details(config),
        }],
    }
}

pub fn running(config: &ProxyConfig) -> PsResponse {
    let name = config.upstream.model.clone();
    // the remote model never unloads; report a rolling expiry
    let expires_at = (Utc::now() + Duration::hours(24)).to_rfc3339();
    PsResponse {
        models: vec![RunningModel {
            name: name.clone(),
            model: name,
            size: config.model_card.size,
            digest: config.model_card.digest.clone(),
            details: details(config),
            expires_at,
            size_vram: 0,
        }],
    }
}

/// Metadata for the one model, whatever name was asked for.
pub fn show(config: &ProxyConfig) -> ShowResponse {
    let mut model_info = Map::new();
    model_info.insert("general.architecture".to_string(), json!(config.model_family()));
    model_info.insert("general.basename".to_string(), json!(config.upstream.model));

    let defaults = &config.generation;
    let mut parameters = Vec::new();
    if let Some(t) = defaults.temperature {
        parameters.push(format!("temperature {t}"));
    }
    if let Some(p) = defaults.top_p {
        parameters.push(format!("top_p {p}"));
    }
    if let Some(n) = defaults.max_completion_tokens {
        parameters.push(format!("num_predict {n}"));
    }

    ShowResponse {
        license: config.model_card.license.clone(),
        modelfile: format!("FROM {}", config.upstream.model),
        parameters: parameters.join("\n"),
        template: "{{ .System }}{{ .Prompt }}".to_string(),
        details: details(config),
        model_info,
    }
}

pub fn version(config: &ProxyConfig) -> VersionResponse {
    VersionResponse {
        version: config.model_card.version.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_lists_configured_model_only() {
        let mut config = ProxyConfig::default();
        config.upstream.model = "llama-3.3-70b".to_string();

        let tags = tags(&config);
        assert_eq!(tags.models.len(), 1);
        assert_eq!(tags.models[0].name, "llama-3.3-70b");
        assert_eq!(tags.models[0].model, "llama-3.3-70b");
        assert_eq!(tags.models[0].details.family, "llama");
        assert_eq!(tags.models[0].details.families, vec!["llama".to_string()]);
    }

    #[test]
    fn test_distinct_models_keep_distinct_names() {
        let mut config = ProxyConfig::default();
        config.upstream.model = "llama-4-scout-17b-16e-instruct".to_string();
        let scout = tags(&config).models[0].name.clone();
        config.upstream.model = "llama-3.3-70b".to_string();
        let llama3 = tags(&config).models[0].name.clone();
        assert_ne!(scout, llama3);
    }

    #[test]
    fn test_show_reports_defaults() {
        let shown = show(&ProxyConfig::default());
        assert_eq!(shown.modelfile, "FROM qwen-3-235b-a22b-instruct-2507");
        assert!(shown.parameters.contains("temperature 0.7"));
        assert!(shown.parameters.contains("top_p 0.8"));
        assert_eq!(
            shown.model_info["general.basename"],
            "qwen-3-235b-a22b-instruct-2507"
        );
    }

    #[test]
    fn test_running_and_version() {
        let config = ProxyConfig::default();
        let ps = running(&config);
        assert_eq!(ps.models.len(), 1);
        assert_eq!(ps.models[0].model, "qwen-3-235b-a22b-instruct-2507");
        assert_eq!(version(&config).version, "0.1.17");
    }
}
