//! Evidence items and their aggregation for one Discovery

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// One fact-bearing observation extracted from source media
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceItem {
    pub id: Uuid,
    pub media_id: Option<String>,
    /// Offset into the originating media, in seconds
    pub timestamp_seconds: Option<i64>,
    pub extracted_name: Option<String>,
    pub fact: String,
    pub site_id: Option<Uuid>,
    pub discovery_id: Option<Uuid>,
}

impl EvidenceItem {
    pub fn new(extracted_name: &str, fact: &str, media_id: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            media_id: media_id.map(str::to_string),
            timestamp_seconds: None,
            extracted_name: Some(extracted_name.to_string()),
            fact: fact.to_string(),
            site_id: None,
            discovery_id: None,
        }
    }
}

/// Title, description and tags of the media an evidence item came from
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MediaContext {
    pub media_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Every fact and media context known for one Discovery
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidenceBundle {
    /// Sorted, de-duplicated
    pub facts: Vec<String>,
    /// Sorted by media id, one entry per media
    pub media: Vec<MediaContext>,
    pub item_count: usize,
}

impl EvidenceBundle {
    /// Aggregate evidence rows with their (optional) media contexts
    pub fn collect(items: &[EvidenceItem], media: Vec<MediaContext>) -> Self {
        let facts: BTreeSet<String> = items
            .iter()
            .map(|item| item.fact.trim())
            .filter(|fact| !fact.is_empty())
            .map(str::to_string)
            .collect();

        let media: BTreeMap<String, MediaContext> = media
            .into_iter()
            .map(|context| (context.media_id.clone(), context))
            .collect();

        Self {
            facts: facts.into_iter().collect(),
            media: media.into_values().collect(),
            item_count: items.len(),
        }
    }

    /// Deterministic SHA-256 over the sorted facts and media contexts
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for fact in &self.facts {
            hasher.update(b"fact\x1f");
            hasher.update(fact.as_bytes());
            hasher.update(b"\x1e");
        }
        for context in &self.media {
            hasher.update(b"media\x1f");
            hasher.update(context.media_id.as_bytes());
            hasher.update(b"\x1f");
            hasher.update(context.title.as_deref().unwrap_or("").as_bytes());
            hasher.update(b"\x1f");
            hasher.update(context.description.as_deref().unwrap_or("").as_bytes());
            hasher.update(b"\x1f");
            let mut tags = context.tags.clone();
            tags.sort();
            hasher.update(tags.join("\x1d").as_bytes());
            hasher.update(b"\x1e");
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.media.is_empty()
    }
}
