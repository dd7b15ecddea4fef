//! Canonical record types shared by the normalization pipeline.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Placeholder used when no customer-like column matched. Rows that keep it are dropped.
pub const CUSTOMER_PLACEHOLDER: &str = "Customer";
pub const PRODUCT_PLACEHOLDER: &str = "General Inquiry";
pub const DEFAULT_STATUS: &str = "Pending";
pub const DEFAULT_TIME: &str = "Just now";

/// Communication channel derived from the signal columns of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Channel {
    #[default]
    Voice,
    Email,
    WhatsApp,
    Guide,
}

/// Normalized row produced by the tabular pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub id: String,
    pub customer: String,
    pub product: String,
    pub channel: Channel,
    pub status: String,
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Every non-empty source cell, keyed by its lowercased header.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl CanonicalRecord {
    /// Fresh record for the row at `row_index` (zero-based) with every default applied.
    pub fn with_defaults(row_index: usize) -> Self {
        Self {
            id: format!("T{}", row_index + 1),
            customer: CUSTOMER_PLACEHOLDER.to_string(),
            product: PRODUCT_PLACEHOLDER.to_string(),
            channel: Channel::Voice,
            status: DEFAULT_STATUS.to_string(),
            time: DEFAULT_TIME.to_string(),
            mobile: None,
            email: None,
            contact: None,
            response: None,
            extra: BTreeMap::new(),
        }
    }

    /// Shown before the first sync of a source completes.
    pub fn loading_placeholder() -> Self {
        Self {
            customer: "Loading...".to_string(),
            product: "Please sync sheet".to_string(),
            ..Self::with_defaults(0)
        }
    }

    /// Guidance row surfaced when the sheet cannot be retrieved.
    pub fn access_guidance() -> Self {
        Self {
            id: "TIP".to_string(),
            customer: "Access Denied!".to_string(),
            product: "Go to File > Share > Publish to web".to_string(),
            channel: Channel::Guide,
            status: "Failed".to_string(),
            time: "Select CSV & Publish".to_string(),
            ..Self::with_defaults(0)
        }
    }

    pub fn has_customer(&self) -> bool {
        !self.customer.is_empty() && self.customer != CUSTOMER_PLACEHOLDER
    }
}

/// Canonical campaign idea extracted from a webhook response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeaRecord {
    pub name: String,
    pub one_liner: String,
    pub channels: Vec<String>,
    /// Set when the record wraps unparseable response text rather than structured data.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_raw: bool,
}

/// Ordered, duplicate-free set of asset URLs in first-discovery order.
#[derive(Debug, Clone, Default)]
pub struct AssetUrls {
    urls: Vec<String>,
    seen: HashSet<String>,
}

impl AssetUrls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the URL was already present.
    pub fn insert(&mut self, url: &str) -> bool {
        if self.seen.contains(url) {
            return false;
        }
        self.seen.insert(url.to_string());
        self.urls.push(url.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_positional_id_and_placeholders() {
        let record = CanonicalRecord::with_defaults(4);
        assert_eq!(record.id, "T5");
        assert_eq!(record.customer, CUSTOMER_PLACEHOLDER);
        assert_eq!(record.product, PRODUCT_PLACEHOLDER);
        assert_eq!(record.status, "Pending");
        assert_eq!(record.time, "Just now");
        assert_eq!(record.channel, Channel::Voice);
        assert!(!record.has_customer());
    }

    #[test]
    fn guidance_record_is_a_guide_row() {
        let record = CanonicalRecord::access_guidance();
        assert_eq!(record.id, "TIP");
        assert_eq!(record.channel, Channel::Guide);
        assert_eq!(record.status, "Failed");
        assert!(record.has_customer());
    }

    #[test]
    fn asset_urls_keep_first_discovery_order() {
        let mut urls = AssetUrls::new();
        assert!(urls.insert("https://a.example/1.png"));
        assert!(urls.insert("https://a.example/2.png"));
        assert!(!urls.insert("https://a.example/1.png"));
        assert_eq!(
            urls.into_vec(),
            vec!["https://a.example/1.png".to_string(), "https://a.example/2.png".to_string()]
        );
    }

    #[test]
    fn idea_record_serializes_camel_case_and_hides_false_raw_flag() {
        let idea = IdeaRecord {
            name: "Launch Week".into(),
            one_liner: "Drive early signups".into(),
            channels: vec!["Multi-Channel".into()],
            is_raw: false,
        };
        let value = serde_json::to_value(&idea).unwrap();
        assert_eq!(value["oneLiner"], "Drive early signups");
        assert!(value.get("isRaw").is_none());
    }
}
