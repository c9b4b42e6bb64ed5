//! Data models for curation

pub mod adjudication;
pub mod discovery;
pub mod evidence;
pub mod site;

pub use adjudication::{
    AdjudicationRequest, Confidence, DbCandidate, KbCandidate, KnownMetadata, MatchType, Verdict,
};
pub use discovery::{DecisionLog, DecisionRecord, Discovery, DiscoveryStatus, StatusTransition};
pub use evidence::{EvidenceBundle, EvidenceItem, MediaContext};
pub use site::{CanonicalSite, Source};
