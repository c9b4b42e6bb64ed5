//! Canonical records and the sources that own them

use chrono::{DateTime, Utc};
use ruinmap_common::names::normalize_name;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Origin of canonical records. Lower priority is more trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub priority: i64,
    pub trusted: bool,
    /// Records created by the promotion gate belong to the curation source
    pub is_curation: bool,
}

/// An accepted site in the served dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSite {
    pub id: Uuid,
    pub source_id: String,
    pub name: String,
    pub name_normalized: String,
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
    /// Free-form provenance payload
    pub provenance: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl CanonicalSite {
    pub fn new(source_id: &str, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: source_id.to_string(),
            name: name.trim().to_string(),
            name_normalized: normalize_name(name),
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
            provenance: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    pub fn with_coordinates(mut self, lat: f64, lon: f64) -> Self {
        self.lat = Some(lat);
        self.lon = Some(lon);
        self
    }

    pub fn with_country(mut self, country: &str) -> Self {
        self.country = Some(country.to_string());
        self
    }
}
