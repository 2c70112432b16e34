//! Model descriptors and the remote feed format they are built from.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::CatalogError;

static MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Metadata for one model asset, as persisted and as sent to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub filename: String,
    /// Expected content hash in lowercase hex (MD5 or SHA-256).
    pub hash: String,
    /// Memory requirement in GB, as advertised by the feed.
    #[serde(default)]
    pub ram_required: String,
    #[serde(rename = "type", default)]
    pub model_type: String,
    /// Absolute download URL.
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl ModelDescriptor {
    /// Whether `name` refers to this descriptor by display name or file name.
    pub fn matches(&self, name: &str) -> bool {
        self.name == name || self.filename == name
    }

    /// Reject file names that would escape the storage directory.
    pub fn check_filename(&self) -> Result<(), CatalogError> {
        let f = &self.filename;
        if f.is_empty() || f.contains(['/', '\\']) || f == "." || f == ".." {
            return Err(CatalogError::InvalidFilename(f.clone()));
        }
        Ok(())
    }
}

/// One entry of the remote feed (GPT4All `models*.json` layout).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteModelEntry {
    pub name: String,
    pub filename: String,
    #[serde(default)]
    pub md5sum: Option<String>,
    #[serde(default)]
    pub sha256sum: Option<String>,
    #[serde(default, rename = "ramrequired")]
    pub ram_required: Option<Value>,
    #[serde(default, rename = "type")]
    pub model_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl RemoteModelEntry {
    /// Convert into a [`ModelDescriptor`], stripping markup from the
    /// description and resolving the download URL against `feed_url`.
    ///
    /// Entries without a URL are fetched from `<feed dir>/<filename>`.
    pub fn into_descriptor(self, feed_url: &Url) -> Result<ModelDescriptor, CatalogError> {
        let relative = self.url.as_deref().unwrap_or(&self.filename);
        let url = feed_url
            .join(relative)
            .map_err(|e| CatalogError::InvalidUrl {
                url: relative.to_owned(),
                reason: e.to_string(),
            })?;
        let hash = self
            .sha256sum
            .or(self.md5sum)
            .unwrap_or_default()
            .to_ascii_lowercase();
        let ram_required = match self.ram_required {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };

        Ok(ModelDescriptor {
            name: self.name,
            filename: self.filename,
            hash,
            ram_required,
            model_type: self.model_type.unwrap_or_default(),
            url: url.to_string(),
            description: strip_markup(self.description.as_deref().unwrap_or_default()),
            prompt_template: self.prompt_template.filter(|s| !s.is_empty()),
            system_prompt: self.system_prompt.filter(|s| !s.is_empty()),
        })
    }
}

/// Remove HTML tags and collapse whitespace runs.
pub fn strip_markup(text: &str) -> String {
    let plain = MARKUP.replace_all(text, " ");
    WHITESPACE.replace_all(plain.trim(), " ").into_owned()
}
