//! Model identifier resolution.
//!
//! The API-facing identifier a server reports is not always the key its
//! control CLI loads by. Resolution builds a static, ordered candidate list
//! and returns the first one present in the installed-model catalog; when
//! nothing matches it falls back to the raw identifier and lets the load
//! step surface the error. Pure and side-effect-free, no retries.

use serde::Deserialize;

/// One entry of the installed-model catalog, as reported by the control
/// CLI's JSON listing subcommand.
#[derive(Debug, Clone, Deserialize)]
pub struct InstalledModel {
    /// The key the CLI loads this model by.
    #[serde(alias = "modelKey", alias = "id", alias = "name")]
    pub key: String,
    /// On-disk size, when reported.
    #[serde(default, alias = "sizeBytes", alias = "size")]
    pub size_bytes: Option<u64>,
    /// Quantization label, when reported.
    #[serde(default)]
    pub quantization: Option<String>,
}

/// Vendor prefix tried as a last candidate; community mirrors publish most
/// local models under it.
const VENDOR_PREFIX: &str = "lmstudio-community";

/// Resolve an API-facing model identifier to the best-guess load key.
///
/// Candidates, in order: a catalog key equal to the identifier, the
/// identifier itself, the identifier with path-separator-like characters
/// normalized to hyphens, the upper-cased final path segment, and a
/// vendor-prefixed variant. The first candidate found in the catalog wins;
/// otherwise the raw identifier is returned unchanged.
pub fn resolve_load_key(model_id: &str, catalog: &[InstalledModel]) -> String {
    let hyphenized: String = model_id
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '-' } else { c })
        .collect();
    let base = model_id.rsplit('/').next().unwrap_or(model_id);

    let candidates = [
        model_id.to_string(),
        hyphenized,
        base.to_uppercase(),
        format!("{VENDOR_PREFIX}/{base}"),
    ];

    for candidate in &candidates {
        if catalog.iter().any(|m| m.key == *candidate) {
            return candidate.clone();
        }
    }
    model_id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(keys: &[&str]) -> Vec<InstalledModel> {
        keys.iter()
            .map(|k| InstalledModel {
                key: (*k).to_string(),
                size_bytes: None,
                quantization: None,
            })
            .collect()
    }

    #[test]
    fn exact_key_wins() {
        let catalog = catalog(&["demo/8b", "demo-8b"]);
        assert_eq!(resolve_load_key("demo/8b", &catalog), "demo/8b");
    }

    #[test]
    fn hyphen_normalization_applies_when_exact_key_absent() {
        let catalog = catalog(&["demo-8b", "other-model"]);
        assert_eq!(resolve_load_key("demo/8b", &catalog), "demo-8b");
    }

    #[test]
    fn uppercased_base_form_is_tried() {
        let catalog = catalog(&["8B"]);
        assert_eq!(resolve_load_key("demo/8b", &catalog), "8B");
    }

    #[test]
    fn vendor_prefixed_variant_is_tried() {
        let catalog = catalog(&["lmstudio-community/8b"]);
        assert_eq!(resolve_load_key("demo/8b", &catalog), "lmstudio-community/8b");
    }

    #[test]
    fn falls_back_to_raw_identifier() {
        let catalog = catalog(&["unrelated"]);
        assert_eq!(resolve_load_key("demo/8b", &catalog), "demo/8b");
        assert_eq!(resolve_load_key("demo/8b", &[]), "demo/8b");
    }

    #[test]
    fn catalog_entry_deserializes_cli_shapes() {
        let entry: InstalledModel =
            serde_json::from_str(r#"{"modelKey":"demo-8b","sizeBytes":123,"quantization":"Q4_K_M"}"#)
                .expect("deserialize");
        assert_eq!(entry.key, "demo-8b");
        assert_eq!(entry.size_bytes, Some(123));
        assert_eq!(entry.quantization.as_deref(), Some("Q4_K_M"));
    }
}
