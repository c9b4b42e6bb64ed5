//! Knowledge base client (Wikidata)
//!
//! Name search, entity detail and the batched "has an English Wikipedia
//! page" check go to the Wikidata action API. Country reverse lookup uses
//! Nominatim; encyclopedia summaries come from the Wikipedia REST API.

use crate::models::KbCandidate;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

const WIKIDATA_API_URL: &str = "https://www.wikidata.org/w/api.php";
const NOMINATIM_REVERSE_URL: &str = "https://nominatim.openstreetmap.org/reverse";
const WIKIPEDIA_SUMMARY_URL: &str = "https://en.wikipedia.org/api/rest_v1/page/summary/";
const WIKIPEDIA_PAGE_URL: &str = "https://en.wikipedia.org/wiki/";
const COMMONS_FILE_PATH_URL: &str = "https://commons.wikimedia.org/wiki/Special:FilePath/";
const USER_AGENT: &str = concat!(
    "ruinmap-curator/",
    env!("CARGO_PKG_VERSION"),
    " (archaeological site curation)"
);
/// Nominatim usage policy: at most one request per second
const GEOCODER_RATE_LIMIT_MS: u64 = 1000;
/// wbgetentities accepts at most 50 ids per request
const MAX_IDS_PER_REQUEST: usize = 50;

/// Knowledge base client errors
#[derive(Debug, Error)]
pub enum KbError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Entity detail, with referenced labels and the encyclopedia summary resolved
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KbEntity {
    pub id: String,
    pub label: Option<String>,
    pub description: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub country: Option<String>,
    /// Labels of the "instance of" classes
    pub classification: Vec<String>,
    /// Founding / inception year, negative for BCE
    pub inception_year: Option<i32>,
    pub wikipedia_url: Option<String>,
    /// Encyclopedia summary text
    pub summary: Option<String>,
    pub thumbnail_url: Option<String>,
}

impl KbEntity {
    pub fn period_name(&self) -> Option<&'static str> {
        self.inception_year.map(estimate_period)
    }

    /// Longest of the encyclopedia summary and the short entity description
    pub fn best_description(&self) -> Option<&str> {
        match (self.summary.as_deref(), self.description.as_deref()) {
            (Some(summary), Some(short)) if short.len() > summary.len() => Some(short),
            (Some(summary), _) => Some(summary),
            (None, short) => short,
        }
    }
}

/// Coarse era label for a start year (negative = BCE)
pub fn estimate_period(year: i32) -> &'static str {
    match year {
        y if y < -10_000 => "Paleolithic",
        y if y < -3_300 => "Neolithic",
        y if y < -1_200 => "Bronze Age",
        y if y < -500 => "Iron Age",
        y if y < 500 => "Classical Antiquity",
        y if y < 1_500 => "Medieval",
        _ => "Early Modern",
    }
}

/// Structured knowledge base consumed by the identification engine
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Ranked candidates for a free-text name, with the encyclopedia-page flag set
    async fn search(&self, name: &str, limit: usize) -> Result<Vec<KbCandidate>, KbError>;

    /// Full detail for one entity id
    async fn entity(&self, id: &str) -> Result<KbEntity, KbError>;

    /// Country name at the given coordinates
    async fn country_at(&self, lat: f64, lon: f64) -> Result<Option<String>, KbError>;
}

/// Minimum-interval rate limiter
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Wikidata / Wikipedia / Nominatim client
pub struct WikidataClient {
    http_client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    geocoder_limiter: Arc<RateLimiter>,
}

impl WikidataClient {
    pub fn new(timeout: Duration, min_interval_ms: u64) -> Result<Self, KbError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| KbError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            rate_limiter: Arc::new(RateLimiter::new(min_interval_ms)),
            geocoder_limiter: Arc::new(RateLimiter::new(GEOCODER_RATE_LIMIT_MS)),
        })
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, KbError> {
        tracing::debug!(url = %url, "Querying knowledge base");

        let response = self
            .http_client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| KbError::Network(e.to_string()))?;

        let status = response.status();
        if status == 404 {
            return Err(KbError::NotFound(url.to_string()));
        }
        if status == 429 {
            return Err(KbError::RateLimited);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(KbError::Api(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| KbError::Parse(e.to_string()))
    }

    /// `wbgetentities` in batches; returns the raw entity objects by id
    async fn fetch_entities(
        &self,
        ids: &[String],
        props: &str,
    ) -> Result<serde_json::Map<String, Value>, KbError> {
        let mut entities = serde_json::Map::new();
        for chunk in ids.chunks(MAX_IDS_PER_REQUEST) {
            self.rate_limiter.wait().await;
            let joined = chunk.join("|");
            let body = self
                .get_json(
                    WIKIDATA_API_URL,
                    &[
                        ("action", "wbgetentities"),
                        ("format", "json"),
                        ("ids", &joined),
                        ("props", props),
                        ("languages", "en"),
                        ("sitefilter", "enwiki"),
                    ],
                )
                .await?;
            check_api_error(&body)?;
            if let Some(Value::Object(map)) = body.get("entities") {
                entities.extend(map.clone());
            }
        }
        Ok(entities)
    }

    /// Which of `ids` have an English Wikipedia page (one request per 50 ids)
    async fn encyclopedia_pages(&self, ids: &[String]) -> Result<HashSet<String>, KbError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let entities = self.fetch_entities(ids, "sitelinks").await?;
        Ok(entities
            .iter()
            .filter(|(_, entity)| enwiki_title(entity).is_some())
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn labels(&self, ids: &[String]) -> Result<HashMap<String, String>, KbError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let entities = self.fetch_entities(ids, "labels").await?;
        Ok(entities
            .iter()
            .filter_map(|(id, entity)| english_text(entity, "labels").map(|label| (id.clone(), label)))
            .collect())
    }

    async fn summary(&self, title: &str) -> Result<EncyclopediaSummary, KbError> {
        self.rate_limiter.wait().await;
        let mut url = reqwest::Url::parse(WIKIPEDIA_SUMMARY_URL)
            .map_err(|e| KbError::Parse(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| KbError::Parse("Summary URL cannot take a path".to_string()))?
            .pop_if_empty()
            .push(title);
        let body = self.get_json(url.as_str(), &[]).await?;
        Ok(parse_summary(&body))
    }
}

#[async_trait]
impl KnowledgeBase for WikidataClient {
    async fn search(&self, name: &str, limit: usize) -> Result<Vec<KbCandidate>, KbError> {
        if name.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        self.rate_limiter.wait().await;
        let limit_str = limit.to_string();
        let body = self
            .get_json(
                WIKIDATA_API_URL,
                &[
                    ("action", "wbsearchentities"),
                    ("format", "json"),
                    ("language", "en"),
                    ("type", "item"),
                    ("search", name.trim()),
                    ("limit", &limit_str),
                ],
            )
            .await?;
        check_api_error(&body)?;

        let mut candidates = parse_search(&body)?;
        candidates.truncate(limit);

        let ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
        let with_pages = self.encyclopedia_pages(&ids).await?;
        for candidate in &mut candidates {
            candidate.has_encyclopedia_page = with_pages.contains(&candidate.id);
        }

        tracing::debug!(name = %name, found = candidates.len(), "Knowledge base search");
        Ok(candidates)
    }

    async fn entity(&self, id: &str) -> Result<KbEntity, KbError> {
        let entities = self
            .fetch_entities(&[id.to_string()], "labels|descriptions|claims|sitelinks")
            .await?;
        let raw = entities
            .get(id)
            .ok_or_else(|| KbError::NotFound(id.to_string()))?;
        let parsed = parse_entity(id, raw)?;

        let mut referenced: Vec<String> = parsed.class_refs.clone();
        if let Some(country) = &parsed.country_ref {
            referenced.push(country.clone());
        }
        // Missing labels only cost metadata
        let labels = match self.labels(&referenced).await {
            Ok(labels) => labels,
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Label lookup failed");
                HashMap::new()
            }
        };

        let mut entity = parsed.entity;
        entity.country = parsed.country_ref.as_ref().and_then(|c| labels.get(c).cloned());
        entity.classification = parsed
            .class_refs
            .iter()
            .filter_map(|c| labels.get(c).cloned())
            .collect();

        if let Some(title) = &parsed.wikipedia_title {
            match self.summary(title).await {
                Ok(summary) => {
                    entity.summary = summary.extract;
                    if summary.thumbnail_url.is_some() {
                        entity.thumbnail_url = summary.thumbnail_url;
                    }
                    if summary.page_url.is_some() {
                        entity.wikipedia_url = summary.page_url;
                    }
                }
                Err(e) => tracing::warn!(id = %id, title = %title, error = %e, "Encyclopedia summary failed"),
            }
        }

        Ok(entity)
    }

    async fn country_at(&self, lat: f64, lon: f64) -> Result<Option<String>, KbError> {
        self.geocoder_limiter.wait().await;
        let lat_str = lat.to_string();
        let lon_str = lon.to_string();
        let body = self
            .get_json(
                NOMINATIM_REVERSE_URL,
                &[
                    ("format", "jsonv2"),
                    ("lat", &lat_str),
                    ("lon", &lon_str),
                    ("zoom", "3"),
                    ("accept-language", "en"),
                ],
            )
            .await?;
        Ok(parse_reverse(&body))
    }
}

/// Entity fields before referenced ids are turned into labels
#[derive(Debug, Clone, PartialEq)]
struct ParsedEntity {
    entity: KbEntity,
    country_ref: Option<String>,
    class_refs: Vec<String>,
    wikipedia_title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct EncyclopediaSummary {
    extract: Option<String>,
    thumbnail_url: Option<String>,
    page_url: Option<String>,
}

fn check_api_error(body: &Value) -> Result<(), KbError> {
    match body.get("error") {
        Some(error) => Err(KbError::Api(
            200,
            error
                .get("info")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        )),
        None => Ok(()),
    }
}

fn parse_search(body: &Value) -> Result<Vec<KbCandidate>, KbError> {
    let hits = body
        .get("search")
        .and_then(Value::as_array)
        .ok_or_else(|| KbError::Parse("search response has no 'search' array".to_string()))?;

    Ok(hits
        .iter()
        .filter_map(|hit| {
            let id = hit.get("id")?.as_str()?.to_string();
            let label = hit
                .get("label")
                .and_then(Value::as_str)
                .unwrap_or(&id)
                .to_string();
            Some(KbCandidate {
                id,
                label,
                description: hit.get("description").and_then(Value::as_str).map(str::to_string),
                has_encyclopedia_page: false,
            })
        })
        .collect())
}

fn parse_entity(id: &str, raw: &Value) -> Result<ParsedEntity, KbError> {
    if raw.get("missing").is_some() {
        return Err(KbError::NotFound(id.to_string()));
    }
    if !raw.is_object() {
        return Err(KbError::Parse(format!("entity {} is not an object", id)));
    }

    let coordinates = first_claim_value(raw, "P625");
    let lat = coordinates.and_then(|v| v.get("latitude")).and_then(Value::as_f64);
    let lon = coordinates.and_then(|v| v.get("longitude")).and_then(Value::as_f64);

    let inception_year = first_claim_value(raw, "P571")
        .and_then(|v| v.get("time"))
        .and_then(Value::as_str)
        .and_then(parse_inception_year);

    let image = first_claim_value(raw, "P18").and_then(Value::as_str).map(commons_thumbnail);

    let wikipedia_title = enwiki_title(raw);
    let wikipedia_url = wikipedia_title
        .as_deref()
        .map(|title| format!("{}{}", WIKIPEDIA_PAGE_URL, title.replace(' ', "_")));

    Ok(ParsedEntity {
        entity: KbEntity {
            id: id.to_string(),
            label: english_text(raw, "labels"),
            description: english_text(raw, "descriptions"),
            lat: lat.filter(|_| lon.is_some()),
            lon: lon.filter(|_| lat.is_some()),
            inception_year,
            wikipedia_url,
            thumbnail_url: image,
            ..KbEntity::default()
        },
        country_ref: first_claim_value(raw, "P17").and_then(entity_ref),
        class_refs: claim_values(raw, "P31").filter_map(entity_ref).collect(),
        wikipedia_title,
    })
}

fn claim_values<'a>(raw: &'a Value, property: &str) -> impl Iterator<Item = &'a Value> {
    raw.get("claims")
        .and_then(|claims| claims.get(property))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|claim| claim.pointer("/mainsnak/datavalue/value"))
}

fn first_claim_value<'a>(raw: &'a Value, property: &str) -> Option<&'a Value> {
    claim_values(raw, property).next()
}

fn entity_ref(value: &Value) -> Option<String> {
    value.get("id").and_then(Value::as_str).map(str::to_string)
}

fn english_text(raw: &Value, field: &str) -> Option<String> {
    raw.get(field)
        .and_then(|texts| texts.get("en"))
        .and_then(|text| text.get("value"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn enwiki_title(raw: &Value) -> Option<String> {
    raw.pointer("/sitelinks/enwiki/title")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Year from a Wikidata time value such as `+1200-00-00T00:00:00Z` or `-9500-...`
fn parse_inception_year(time: &str) -> Option<i32> {
    let (sign, rest) = match time.as_bytes().first()? {
        b'-' => (-1, &time[1..]),
        b'+' => (1, &time[1..]),
        _ => (1, time),
    };
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse::<i32>().ok().map(|year| sign * year)
}

fn commons_thumbnail(file_name: &str) -> String {
    format!(
        "{}{}?width=400",
        COMMONS_FILE_PATH_URL,
        file_name.trim().replace(' ', "_")
    )
}

fn parse_reverse(body: &Value) -> Option<String> {
    body.pointer("/address/country")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_summary(body: &Value) -> EncyclopediaSummary {
    let text = |pointer: &str| {
        body.pointer(pointer)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    };
    EncyclopediaSummary {
        extract: text("/extract"),
        thumbnail_url: text("/thumbnail/source"),
        page_url: text("/content_urls/desktop/page"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gobekli_tepe() -> Value {
        json!({
            "type": "item",
            "id": "Q1148481",
            "labels": {"en": {"language": "en", "value": "Göbekli Tepe"}},
            "descriptions": {"en": {"language": "en", "value": "Neolithic archaeological site in Turkey"}},
            "claims": {
                "P625": [{"mainsnak": {"datavalue": {"value": {"latitude": 37.2233, "longitude": 38.9224}}}}],
                "P17": [{"mainsnak": {"datavalue": {"value": {"entity-type": "item", "id": "Q43"}}}}],
                "P31": [
                    {"mainsnak": {"datavalue": {"value": {"id": "Q839954"}}}},
                    {"mainsnak": {"snaktype": "somevalue"}},
                    {"mainsnak": {"datavalue": {"value": {"id": "Q9259"}}}}
                ],
                "P571": [{"mainsnak": {"datavalue": {"value": {"time": "-9500-00-00T00:00:00Z"}}}}],
                "P18": [{"mainsnak": {"datavalue": {"value": "Gobekli Tepe, Urfa.jpg"}}}]
            },
            "sitelinks": {"enwiki": {"site": "enwiki", "title": "Göbekli Tepe"}}
        })
    }

    #[test]
    fn test_parse_entity_detail() {
        let parsed = parse_entity("Q1148481", &gobekli_tepe()).unwrap();

        assert_eq!(parsed.entity.label.as_deref(), Some("Göbekli Tepe"));
        assert_eq!(parsed.entity.lat, Some(37.2233));
        assert_eq!(parsed.entity.lon, Some(38.9224));
        assert_eq!(parsed.entity.inception_year, Some(-9500));
        assert_eq!(parsed.entity.period_name(), Some("Neolithic"));
        assert_eq!(parsed.country_ref.as_deref(), Some("Q43"));
        assert_eq!(parsed.class_refs, vec!["Q839954".to_string(), "Q9259".to_string()]);
        assert_eq!(parsed.wikipedia_title.as_deref(), Some("Göbekli Tepe"));
        assert_eq!(
            parsed.entity.wikipedia_url.as_deref(),
            Some("https://en.wikipedia.org/wiki/Göbekli_Tepe")
        );
        assert_eq!(
            parsed.entity.thumbnail_url.as_deref(),
            Some("https://commons.wikimedia.org/wiki/Special:FilePath/Gobekli_Tepe,_Urfa.jpg?width=400")
        );
    }

    #[test]
    fn test_parse_missing_entity() {
        let missing = json!({"id": "Q999999999", "missing": ""});
        assert!(matches!(
            parse_entity("Q999999999", &missing),
            Err(KbError::NotFound(_))
        ));
    }

    #[test]
    fn test_parse_entity_without_claims() {
        let parsed = parse_entity("Q1", &json!({"labels": {}})).unwrap();
        assert_eq!(parsed.entity.lat, None);
        assert!(parsed.class_refs.is_empty());
        assert_eq!(parsed.wikipedia_title, None);
    }

    #[test]
    fn test_parse_search_hits() {
        let body = json!({
            "search": [
                {"id": "Q110967443", "label": "Sayburç", "description": "archaeological site in Turkey"},
                {"id": "Q5", "description": "no label"},
                {"label": "no id"}
            ]
        });
        let hits = parse_search(&body).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].label, "Sayburç");
        assert_eq!(hits[1].label, "Q5");
        assert!(!hits[0].has_encyclopedia_page);

        assert!(parse_search(&json!({"error": "x"})).is_err());
    }

    #[test]
    fn test_api_error_body() {
        let body = json!({"error": {"code": "no-such-entity", "info": "Could not find an entity"}});
        assert!(matches!(check_api_error(&body), Err(KbError::Api(_, msg)) if msg.contains("Could not find")));
    }

    #[test]
    fn test_inception_year_formats() {
        assert_eq!(parse_inception_year("+1200-00-00T00:00:00Z"), Some(1200));
        assert_eq!(parse_inception_year("-0753-04-21T00:00:00Z"), Some(-753));
        assert_eq!(parse_inception_year("garbage"), None);
        assert_eq!(parse_inception_year(""), None);
    }

    #[test]
    fn test_estimate_period_boundaries() {
        assert_eq!(estimate_period(-12_000), "Paleolithic");
        assert_eq!(estimate_period(-9_500), "Neolithic");
        assert_eq!(estimate_period(-2_000), "Bronze Age");
        assert_eq!(estimate_period(-800), "Iron Age");
        assert_eq!(estimate_period(-500), "Classical Antiquity");
        assert_eq!(estimate_period(1_200), "Medieval");
        assert_eq!(estimate_period(1_500), "Early Modern");
    }

    #[test]
    fn test_parse_reverse_and_summary() {
        assert_eq!(
            parse_reverse(&json!({"address": {"country": "Türkiye", "state": "Şanlıurfa"}})).as_deref(),
            Some("Türkiye")
        );
        assert_eq!(parse_reverse(&json!({"error": "Unable to geocode"})), None);

        let summary = parse_summary(&json!({
            "extract": "Sayburç is an archaeological site.",
            "thumbnail": {"source": "https://upload.wikimedia.org/x.jpg"},
            "content_urls": {"desktop": {"page": "https://en.wikipedia.org/wiki/Sayburç"}}
        }));
        assert_eq!(summary.extract.as_deref(), Some("Sayburç is an archaeological site."));
        assert_eq!(summary.thumbnail_url.as_deref(), Some("https://upload.wikimedia.org/x.jpg"));
    }

    #[test]
    fn test_best_description_prefers_longer_text() {
        let entity = KbEntity {
            description: Some("site".to_string()),
            summary: Some("A long encyclopedia summary".to_string()),
            ..KbEntity::default()
        };
        assert_eq!(entity.best_description(), Some("A long encyclopedia summary"));
    }
}
