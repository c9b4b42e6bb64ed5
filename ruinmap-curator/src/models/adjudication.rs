//! Adjudication request and verdict contracts
//!
//! The request is serialized into the model prompt; the verdict is what the
//! strict parser accepts back.

use crate::models::MediaContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What the evidence refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// An existing canonical record
    DbMatch,
    /// A knowledge-base entity not yet in the canonical dataset
    WikidataMatch,
    /// A real site unknown to both
    NewSite,
    /// Not an archaeological site at all
    NotASite,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DbMatch => "db_match",
            Self::WikidataMatch => "wikidata_match",
            Self::NewSite => "new_site",
            Self::NotASite => "not_a_site",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model-reported confidence, ordered low < medium < high
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Low and medium verdicts go to the review model
    pub fn needs_review(&self) -> bool {
        *self < Self::High
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated adjudication verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub match_type: MatchType,
    pub confidence: Confidence,
    /// Corrected spelling of the site name, if the model proposes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_name: Option<String>,
    /// Canonical record id; always present for `db_match`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wikidata_id: Option<String>,
    /// Country the evidence places the site in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Model that produced the verdict (filled in by the client)
    #[serde(skip)]
    pub model: Option<String>,
}

impl Verdict {
    pub fn new(match_type: MatchType, confidence: Confidence) -> Self {
        Self {
            match_type,
            confidence,
            corrected_name: None,
            site_id: None,
            wikidata_id: None,
            country: None,
            reason: None,
            model: None,
        }
    }

    /// Id the verdict points at, for the decision log
    pub fn target(&self) -> Option<String> {
        match self.match_type {
            MatchType::DbMatch => self.site_id.map(|id| id.to_string()),
            MatchType::WikidataMatch | MatchType::NewSite => self.wikidata_id.clone(),
            MatchType::NotASite => None,
        }
    }
}

/// Canonical-record candidate from the similarity index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbCandidate {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_type: Option<String>,
    pub similarity: f64,
}

/// Knowledge-base search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbCandidate {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub has_encyclopedia_page: bool,
}

/// Metadata already known for the Discovery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnownMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
}

/// Structured input to the adjudication model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjudicationRequest {
    pub name: String,
    pub mention_count: i64,
    pub known: KnownMetadata,
    pub facts: Vec<String>,
    pub media: Vec<MediaContext>,
    pub db_candidates: Vec<DbCandidate>,
    pub kb_candidates: Vec<KbCandidate>,
    /// Matches refused earlier; must not be proposed again
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected_matches: Vec<String>,
}
