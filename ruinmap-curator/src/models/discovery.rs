//! Discovery state machine
//!
//! pending → enriching → {matched | enriched | rejected | failed} → promoted
//!
//! `promoted` is final. `matched`, `enriched`, `rejected` and `failed` are
//! settled: they are only revisited when the evidence fingerprint changes.

use crate::models::{CanonicalSite, Confidence, MatchType};
use chrono::{DateTime, Utc};
use ruinmap_common::names::normalize_name;
use ruinmap_common::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Curation status of a Discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStatus {
    /// Filed by the Matcher, never processed
    Pending,
    /// Sent back by a curator for another pass
    NeedsReview,
    /// Being processed (fingerprint already stored)
    Enriching,
    /// Linked to an existing canonical record, or judged not a site
    Matched,
    /// Resolved against the knowledge base or as a new site
    Enriched,
    /// Candidate match refused (reason kept in the decision log)
    Rejected,
    /// Processing error (reason in `last_error`)
    Failed,
    /// Part of the canonical dataset
    Promoted,
}

impl DiscoveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::NeedsReview => "needs_review",
            Self::Enriching => "enriching",
            Self::Matched => "matched",
            Self::Enriched => "enriched",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
            Self::Promoted => "promoted",
        }
    }

    /// Settled statuses are skipped while the evidence fingerprint is unchanged
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::Matched | Self::Enriched | Self::Rejected | Self::Failed
        )
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Promoted)
    }
}

impl fmt::Display for DiscoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscoveryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "needs_review" => Ok(Self::NeedsReview),
            "enriching" => Ok(Self::Enriching),
            "matched" => Ok(Self::Matched),
            "enriched" => Ok(Self::Enriched),
            "rejected" => Ok(Self::Rejected),
            "failed" => Ok(Self::Failed),
            "promoted" => Ok(Self::Promoted),
            other => Err(Error::CorruptValue(format!("Unknown discovery status: {}", other))),
        }
    }
}

/// Status change record returned by [`Discovery::transition_to`]
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub discovery_id: Uuid,
    pub old_status: DiscoveryStatus,
    pub new_status: DiscoveryStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// One adjudication outcome kept for audit and to avoid repeating a refused match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub match_type: Option<MatchType>,
    #[serde(default)]
    pub confidence: Option<Confidence>,
    /// Site id or knowledge-base id the verdict pointed at
    #[serde(default)]
    pub target: Option<String>,
    pub outcome: DiscoveryStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

impl DecisionRecord {
    pub fn new(outcome: DiscoveryStatus) -> Self {
        Self {
            at: Utc::now(),
            model: None,
            match_type: None,
            confidence: None,
            target: None,
            outcome,
            reason: None,
        }
    }
}

/// Bounded append-only decision history; oldest entries are dropped first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionLog(Vec<DecisionRecord>);

impl DecisionLog {
    pub fn push(&mut self, record: DecisionRecord, limit: usize) {
        self.0.push(record);
        let limit = limit.max(1);
        if self.0.len() > limit {
            let excess = self.0.len() - limit;
            self.0.drain(..excess);
        }
    }

    pub fn entries(&self) -> &[DecisionRecord] {
        &self.0
    }

    pub fn last(&self) -> Option<&DecisionRecord> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reasons of every rejection still in the log, oldest first
    pub fn rejection_reasons(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|r| r.outcome == DiscoveryStatus::Rejected)
            .filter_map(|r| r.reason.clone())
            .collect()
    }

    /// Targets of rejected verdicts; never proposed again
    pub fn rejected_targets(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|r| r.outcome == DiscoveryStatus::Rejected)
            .filter_map(|r| r.target.clone())
            .collect()
    }
}

/// A candidate site under curation
#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    pub id: Uuid,
    /// Name as first observed
    pub name: String,
    pub name_normalized: String,
    pub mention_count: i64,
    /// Mention count seen by the last identification run
    pub processed_mentions: i64,
    pub status: DiscoveryStatus,
    /// Completeness score, 0-100
    pub score: i64,
    /// Name confirmed (or corrected) by adjudication
    pub confirmed_name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub country: Option<String>,
    pub site_type: Option<String>,
    pub period_name: Option<String>,
    pub period_start: Option<i32>,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub wikidata_id: Option<String>,
    pub wikipedia_url: Option<String>,
    pub site_id: Option<Uuid>,
    pub evidence_hash: Option<String>,
    pub decisions: DecisionLog,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Discovery {
    /// New pending Discovery for a name seen once
    pub fn new(name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            name_normalized: normalize_name(name),
            mention_count: 1,
            processed_mentions: 0,
            status: DiscoveryStatus::Pending,
            score: 0,
            confirmed_name: None,
            lat: None,
            lon: None,
            country: None,
            site_type: None,
            period_name: None,
            period_start: None,
            description: None,
            thumbnail_url: None,
            wikidata_id: None,
            wikipedia_url: None,
            site_id: None,
            evidence_hash: None,
            decisions: DecisionLog::default(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to a new status; leaving `promoted` is refused
    pub fn transition_to(&mut self, new_status: DiscoveryStatus) -> Result<StatusTransition, Error> {
        if self.status.is_final() && new_status != DiscoveryStatus::Promoted {
            return Err(Error::RefusedTransition(format!(
                "Discovery {} is promoted and cannot move to {}",
                self.id, new_status
            )));
        }

        let transition = StatusTransition {
            discovery_id: self.id,
            old_status: self.status,
            new_status,
            transitioned_at: Utc::now(),
        };
        self.status = new_status;
        self.updated_at = transition.transitioned_at;
        Ok(transition)
    }

    /// Set the canonical link; an existing link to a different site is refused
    pub fn link_site(&mut self, site_id: Uuid) -> Result<(), Error> {
        match self.site_id {
            Some(existing) if existing != site_id => Err(Error::RefusedTransition(format!(
                "Discovery {} already linked to site {}, refusing {}",
                self.id, existing, site_id
            ))),
            _ => {
                self.site_id = Some(site_id);
                Ok(())
            }
        }
    }

    pub fn has_coordinates(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }

    /// Name to publish: the confirmed name when known, otherwise the raw one
    pub fn display_name(&self) -> &str {
        self.confirmed_name.as_deref().unwrap_or(&self.name)
    }

    /// Copy fields this Discovery lacks from a canonical record
    pub fn fill_missing_from_site(&mut self, site: &CanonicalSite) {
        if self.confirmed_name.is_none() {
            self.confirmed_name = Some(site.name.clone());
        }
        if !self.has_coordinates() {
            if let (Some(lat), Some(lon)) = (site.lat, site.lon) {
                self.lat = Some(lat);
                self.lon = Some(lon);
            }
        }
        fill(&mut self.country, &site.country);
        fill(&mut self.site_type, &site.site_type);
        fill(&mut self.period_name, &site.period_name);
        if self.period_start.is_none() {
            self.period_start = site.period_start;
        }
        fill(&mut self.description, &site.description);
        fill(&mut self.thumbnail_url, &site.thumbnail_url);
        fill(&mut self.wikidata_id, &site.wikidata_id);
        fill(&mut self.wikipedia_url, &site.wikipedia_url);
    }
}

fn fill(target: &mut Option<String>, source: &Option<String>) {
    if target.is_none() {
        if let Some(value) = source.as_ref().filter(|v| !v.trim().is_empty()) {
            *target = Some(value.clone());
        }
    }
}
