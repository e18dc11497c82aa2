//! Registry item shape.
//!
//! Required fields are typed; anything else the registry sends is kept in an
//! `extra` bag instead of being looked up ad hoc. A payload missing a required
//! field fails deserialization, which fails only the stage that fetched it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One search page from the registry.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchPage {
    pub items: Vec<RegistryItem>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A registry model entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryItem {
    pub id: u64,
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub nsfw: bool,
    /// "Person of interest" flag.
    #[serde(default)]
    pub poi: bool,
    #[serde(default)]
    pub creator: Option<Creator>,
    #[serde(default)]
    pub stats: Option<ItemStats>,
    #[serde(default)]
    pub model_versions: Vec<ModelVersion>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creator {
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemStats {
    #[serde(default)]
    pub download_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelVersion {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub base_model: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub files: Vec<RegistryFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryFile {
    pub name: String,
    #[serde(default, rename = "sizeKB")]
    pub size_kb: f64,
    #[serde(default)]
    pub primary: Option<bool>,
    #[serde(default)]
    pub hashes: HashMap<String, String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub metadata: Option<FileMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub fp: Option<String>,
}

impl RegistryItem {
    pub fn creator_name(&self) -> Option<&str> {
        self.creator.as_ref().map(|c| c.username.as_str())
    }

    pub fn download_count(&self) -> u64 {
        self.stats.as_ref().map(|s| s.download_count).unwrap_or(0)
    }

    /// Most recent `publishedAt` among the item's versions.
    pub fn latest_published(&self) -> Option<&str> {
        self.model_versions
            .iter()
            .filter_map(|v| v.published_at.as_deref())
            .max()
    }

    pub fn version(&self, version_id: u64) -> Option<&ModelVersion> {
        self.model_versions.iter().find(|v| v.id == version_id)
    }

    /// Whether any file in any version is a safely-loadable serialization.
    pub fn has_safe_format(&self) -> bool {
        self.model_versions
            .iter()
            .flat_map(|v| v.files.iter())
            .any(RegistryFile::is_safetensors)
    }
}

impl RegistryFile {
    pub fn is_primary(&self) -> bool {
        self.primary.unwrap_or(false)
    }

    pub fn size_bytes(&self) -> u64 {
        (self.size_kb * 1024.0).round().max(0.0) as u64
    }

    pub fn is_safetensors(&self) -> bool {
        let by_format = self
            .metadata
            .as_ref()
            .and_then(|m| m.format.as_deref())
            .map(|f| f.eq_ignore_ascii_case("safetensor") || f.eq_ignore_ascii_case("safetensors"))
            .unwrap_or(false);
        by_format || self.name.to_lowercase().ends_with(".safetensors")
    }

    /// Case-insensitive lookup of a published hash by algorithm name.
    pub fn hash(&self, algorithm: &str) -> Option<&str> {
        self.hashes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(algorithm))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEM_JSON: &str = r#"{
        "id": 1091495,
        "name": "Better Detailed Anatomy",
        "type": "LORA",
        "nsfw": false,
        "creator": {"username": "anatomist"},
        "stats": {"downloadCount": 5120, "rating": 4.9},
        "tags": ["anatomy", "detail"],
        "modelVersions": [{
            "id": 1226600,
            "name": "v3",
            "publishedAt": "2024-12-01T10:00:00.000Z",
            "baseModel": "SDXL 1.0",
            "files": [{
                "name": "Better_Detailed_Anatomy_v3.safetensors",
                "sizeKB": 223105.5,
                "primary": true,
                "hashes": {"SHA256": "ABCDEF", "AutoV2": "ABC"},
                "downloadUrl": "https://civitai.com/api/download/models/1226600",
                "metadata": {"format": "SafeTensor", "fp": "fp16"}
            }]
        }]
    }"#;

    #[test]
    fn test_parse_item_keeps_unknown_keys_in_extra() {
        let item: RegistryItem = serde_json::from_str(ITEM_JSON).unwrap();
        assert_eq!(item.id, 1091495);
        assert_eq!(item.kind.as_deref(), Some("LORA"));
        assert_eq!(item.creator_name(), Some("anatomist"));
        assert_eq!(item.download_count(), 5120);
        assert!(item.extra.contains_key("tags"));
        assert!(item.has_safe_format());

        let file = &item.model_versions[0].files[0];
        assert!(file.is_primary());
        assert_eq!(file.hash("sha256"), Some("ABCDEF"));
        assert_eq!(file.size_bytes(), 228460032);
    }

    #[test]
    fn test_missing_required_field_fails() {
        let result: Result<RegistryItem, _> = serde_json::from_str(r#"{"name": "no id"}"#);
        assert!(result.is_err());
    }
}
