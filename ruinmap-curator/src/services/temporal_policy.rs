//! Temporal eligibility for promotion
//!
//! The canonical dataset covers ancient and pre-modern sites. The cutoff is
//! later in the Americas, where pre-contact sites run into the 1500s.

/// Decides whether a site's estimated period admits it to the canonical dataset
pub trait TemporalPolicy: Send + Sync {
    fn is_eligible(&self, period_start: Option<i32>, lon: Option<f64>) -> bool;
}

/// Start-year cutoff, with a separate cutoff west of `americas_max_lon`
#[derive(Debug, Clone, PartialEq)]
pub struct EraCutoffPolicy {
    pub old_world_cutoff_year: i32,
    pub americas_cutoff_year: i32,
    pub americas_max_lon: f64,
}

impl EraCutoffPolicy {
    pub fn new(old_world_cutoff_year: i32, americas_cutoff_year: i32) -> Self {
        Self {
            old_world_cutoff_year,
            americas_cutoff_year,
            americas_max_lon: -30.0,
        }
    }
}

impl Default for EraCutoffPolicy {
    fn default() -> Self {
        Self::new(1500, 1600)
    }
}

impl TemporalPolicy for EraCutoffPolicy {
    fn is_eligible(&self, period_start: Option<i32>, lon: Option<f64>) -> bool {
        // Unknown period is admitted
        let Some(start) = period_start else {
            return true;
        };
        let cutoff = match lon {
            Some(lon) if lon < self.americas_max_lon => self.americas_cutoff_year,
            _ => self.old_world_cutoff_year,
        };
        start < cutoff
    }
}
