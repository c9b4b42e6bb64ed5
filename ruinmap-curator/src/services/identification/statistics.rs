//! Identification cycle statistics

use serde::{Deserialize, Serialize};

/// Where one Discovery ended up after a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// Fingerprint unchanged on a settled Discovery; nothing was called
    Skipped,
    /// Judged not to be a site (status `matched`, no canonical link)
    NotASite,
    /// Linked to an existing canonical record, below the promotion gate
    Matched,
    /// Resolved from the knowledge base or as a new site, below the gate
    Enriched,
    Promoted { created: bool },
    /// Candidate refused; the reason is in the decision log
    Rejected,
    Failed(String),
}

/// Counts per outcome for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStatistics {
    pub selected: usize,
    pub skipped: usize,
    pub not_a_site: usize,
    pub matched: usize,
    pub enriched: usize,
    pub promoted: usize,
    /// Promotions that inserted a new canonical record
    pub created_records: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl CycleStatistics {
    pub fn record(&mut self, outcome: &DiscoveryOutcome) {
        match outcome {
            DiscoveryOutcome::Skipped => self.skipped += 1,
            DiscoveryOutcome::NotASite => self.not_a_site += 1,
            DiscoveryOutcome::Matched => self.matched += 1,
            DiscoveryOutcome::Enriched => self.enriched += 1,
            DiscoveryOutcome::Promoted { created } => {
                self.promoted += 1;
                if *created {
                    self.created_records += 1;
                }
            }
            DiscoveryOutcome::Rejected => self.rejected += 1,
            DiscoveryOutcome::Failed(_) => self.failed += 1,
        }
    }

    /// Discoveries that went through adjudication
    pub fn processed(&self) -> usize {
        self.selected.saturating_sub(self.skipped)
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} selected, {} skipped, {} promoted ({} new), {} matched, {} enriched, {} rejected, {} not a site, {} failed",
            self.selected,
            self.skipped,
            self.promoted,
            self.created_records,
            self.matched,
            self.enriched,
            self.rejected,
            self.not_a_site,
            self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_outcomes() {
        let mut stats = CycleStatistics {
            selected: 5,
            ..Default::default()
        };
        stats.record(&DiscoveryOutcome::Skipped);
        stats.record(&DiscoveryOutcome::Promoted { created: true });
        stats.record(&DiscoveryOutcome::Promoted { created: false });
        stats.record(&DiscoveryOutcome::Failed("timeout".to_string()));
        stats.record(&DiscoveryOutcome::NotASite);

        assert_eq!(stats.promoted, 2);
        assert_eq!(stats.created_records, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processed(), 4);
        assert!(stats.display_string().starts_with("5 selected, 1 skipped, 2 promoted (1 new)"));
    }
}
