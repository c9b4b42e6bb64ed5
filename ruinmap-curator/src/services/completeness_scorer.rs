//! Completeness score of a Discovery
//!
//! Each present field earns fixed points; the points sum to 100. The score
//! depends only on the Discovery's current fields.

use crate::models::Discovery;

/// Minimum description length that earns the description points
const MIN_DESCRIPTION_CHARS: usize = 50;

/// Points per field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPoints {
    pub confirmed_name: i64,
    pub coordinates: i64,
    pub country: i64,
    pub site_type: i64,
    pub period: i64,
    pub description: i64,
    pub wikipedia_url: i64,
    pub thumbnail: i64,
    pub wikidata_id: i64,
}

impl Default for FieldPoints {
    fn default() -> Self {
        Self {
            confirmed_name: 25,
            coordinates: 20,
            country: 10,
            site_type: 10,
            period: 10,
            description: 10,
            wikipedia_url: 5,
            thumbnail: 5,
            wikidata_id: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompletenessScorer {
    points: FieldPoints,
}

impl CompletenessScorer {
    /// Score in [0, 100]
    pub fn score(&self, discovery: &Discovery) -> i64 {
        let p = &self.points;
        let mut score = 0;

        if present(&discovery.confirmed_name) {
            score += p.confirmed_name;
        }
        if discovery.has_coordinates() {
            score += p.coordinates;
        }
        if present(&discovery.country) {
            score += p.country;
        }
        if present(&discovery.site_type) {
            score += p.site_type;
        }
        if present(&discovery.period_name) || discovery.period_start.is_some() {
            score += p.period;
        }
        if discovery
            .description
            .as_deref()
            .is_some_and(|d| d.trim().chars().count() >= MIN_DESCRIPTION_CHARS)
        {
            score += p.description;
        }
        if present(&discovery.wikipedia_url) {
            score += p.wikipedia_url;
        }
        if present(&discovery.thumbnail_url) {
            score += p.thumbnail;
        }
        if present(&discovery.wikidata_id) {
            score += p.wikidata_id;
        }

        score.clamp(0, 100)
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}
