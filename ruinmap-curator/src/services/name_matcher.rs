//! Matcher: links new evidence to canonical records at ingest time
//!
//! Rules are tried in a fixed order; the first one yielding an acceptable
//! record wins:
//! 1. exact normalized name
//! 2. exact name with all spaces removed
//! 3. alternate name from the name index
//! 4. substring, for names of 6+ characters, against records at most twice
//!    as long
//!
//! Only trusted sources take part. Several hits resolve to the record of the
//! most trusted source (lowest priority); a tie at that priority is ambiguous
//! and the rule yields nothing. Names no rule resolves are filed as
//! Discoveries.

use crate::db::{discoveries, evidence, sites};
use crate::db::sites::SourcedMatch;
use crate::models::EvidenceItem;
use crate::utils::begin_monitored;
use ruinmap_common::names::{normalize_name, spaceless};
use ruinmap_common::{Error, Result};
use sqlx::SqlitePool;
use std::fmt;
use uuid::Uuid;

/// Substring rule only applies to names at least this long
const MIN_SUBSTRING_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchRule {
    Exact,
    Spaceless,
    Alias,
    Substring,
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Exact => "exact",
            Self::Spaceless => "spaceless",
            Self::Alias => "alias",
            Self::Substring => "substring",
        };
        f.write_str(s)
    }
}

/// Outcome of one rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    None,
    Unique(Uuid),
    Ambiguous,
}

/// Resolve a rule's hits by source priority
pub fn pick_by_priority(matches: &[SourcedMatch]) -> Pick {
    let mut best: Vec<&SourcedMatch> = Vec::new();
    for m in matches {
        // The same record can be reached twice (e.g. through two aliases)
        if best.iter().any(|b| b.site_id == m.site_id) {
            continue;
        }
        match best.first().map(|b| b.priority) {
            Some(priority) if m.priority > priority => {}
            Some(priority) if m.priority < priority => best = vec![m],
            _ => best.push(m),
        }
    }

    match best.as_slice() {
        [] => Pick::None,
        [only] => Pick::Unique(only.site_id),
        _ => Pick::Ambiguous,
    }
}

/// Counters for one Matcher pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchStatistics {
    pub examined: usize,
    pub linked_exact: usize,
    pub linked_spaceless: usize,
    pub linked_alias: usize,
    pub linked_substring: usize,
    /// Rules skipped because several equally trusted records matched
    pub ambiguous: usize,
    pub filed: usize,
    /// Names with nothing left after normalization
    pub unusable: usize,
}

impl MatchStatistics {
    pub fn linked(&self) -> usize {
        self.linked_exact + self.linked_spaceless + self.linked_alias + self.linked_substring
    }

    fn count_link(&mut self, rule: MatchRule) {
        match rule {
            MatchRule::Exact => self.linked_exact += 1,
            MatchRule::Spaceless => self.linked_spaceless += 1,
            MatchRule::Alias => self.linked_alias += 1,
            MatchRule::Substring => self.linked_substring += 1,
        }
    }
}

/// Resolved canonical record with the rule that found it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameMatch {
    pub site_id: Uuid,
    pub rule: MatchRule,
}

pub struct Matcher {
    db: SqlitePool,
    batch_size: i64,
}

impl Matcher {
    pub fn new(db: SqlitePool, batch_size: i64) -> Self {
        Self { db, batch_size }
    }

    /// Resolve one free-text name against trusted canonical records
    pub async fn resolve_name(&self, name: &str) -> Result<(Option<NameMatch>, usize)> {
        let normalized = normalize_name(name);
        let mut ambiguous = 0;
        if normalized.is_empty() {
            return Ok((None, ambiguous));
        }

        for rule in [MatchRule::Exact, MatchRule::Spaceless, MatchRule::Alias, MatchRule::Substring] {
            let hits = match rule {
                MatchRule::Exact => sites::exact_matches(&self.db, &normalized).await?,
                MatchRule::Spaceless => sites::spaceless_matches(&self.db, &spaceless(&normalized)).await?,
                MatchRule::Alias => sites::alias_matches(&self.db, &normalized).await?,
                MatchRule::Substring => {
                    let len = normalized.chars().count();
                    if len < MIN_SUBSTRING_LEN {
                        continue;
                    }
                    sites::substring_matches(&self.db, &normalized, (len * 2) as i64).await?
                }
            };

            match pick_by_priority(&hits) {
                Pick::Unique(site_id) => return Ok((Some(NameMatch { site_id, rule }), ambiguous)),
                Pick::Ambiguous => {
                    tracing::debug!(name = %name, rule = %rule, hits = hits.len(), "Ambiguous match, trying next rule");
                    ambiguous += 1;
                }
                Pick::None => {}
            }
        }

        Ok((None, ambiguous))
    }

    /// Process up to one batch of unresolved evidence
    pub async fn run_pass(&self) -> Result<MatchStatistics> {
        let items = evidence::load_unresolved(&self.db, self.batch_size).await?;
        let mut stats = MatchStatistics::default();

        for item in &items {
            stats.examined += 1;
            let Some(name) = item.extracted_name.as_deref() else {
                continue;
            };

            let (found, ambiguous) = self.resolve_name(name).await?;
            stats.ambiguous += ambiguous;

            match found {
                Some(found) => {
                    evidence::link_to_site(&self.db, item.id, found.site_id).await?;
                    stats.count_link(found.rule);
                    tracing::debug!(name = %name, site_id = %found.site_id, rule = %found.rule, "Evidence linked");
                }
                None => match self.file_unmatched(item, name).await {
                    Ok(discovery_id) => {
                        stats.filed += 1;
                        tracing::debug!(name = %name, discovery_id = %discovery_id, "Evidence filed as discovery");
                    }
                    Err(Error::UnusableName(_)) => {
                        evidence::mark_unusable(&self.db, item.id).await?;
                        stats.unusable += 1;
                        tracing::warn!(evidence_id = %item.id, name = %name, "Evidence name unusable, set aside");
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        tracing::info!(
            examined = stats.examined,
            linked = stats.linked(),
            filed = stats.filed,
            ambiguous = stats.ambiguous,
            "Matcher pass complete"
        );
        Ok(stats)
    }

    /// Create or bump the Discovery and mark the item filed, atomically
    async fn file_unmatched(&self, item: &EvidenceItem, name: &str) -> Result<Uuid> {
        let mut tx = begin_monitored(&self.db, "matcher::file_unmatched").await?;
        let discovery_id = discoveries::record_mention(tx.conn()?, name).await?;
        evidence::mark_filed(tx.conn()?, item.id, discovery_id).await?;
        tx.commit().await?;
        Ok(discovery_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(site_id: Uuid, priority: i64) -> SourcedMatch {
        SourcedMatch { site_id, priority }
    }

    #[test]
    fn test_pick_single_and_empty() {
        let a = Uuid::new_v4();
        assert_eq!(pick_by_priority(&[]), Pick::None);
        assert_eq!(pick_by_priority(&[hit(a, 10)]), Pick::Unique(a));
        assert_eq!(pick_by_priority(&[hit(a, 10), hit(a, 10)]), Pick::Unique(a));
    }

    #[test]
    fn test_pick_most_trusted_source() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(
            pick_by_priority(&[hit(a, 30), hit(b, 10), hit(c, 20)]),
            Pick::Unique(b)
        );
    }

    #[test]
    fn test_tie_at_best_priority_is_ambiguous() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(
            pick_by_priority(&[hit(a, 10), hit(b, 10), hit(c, 5)]),
            Pick::Unique(c)
        );
        assert_eq!(
            pick_by_priority(&[hit(c, 50), hit(a, 10), hit(b, 10)]),
            Pick::Ambiguous
        );
    }
}
