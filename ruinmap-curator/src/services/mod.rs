//! Curation services
//!
//! Matcher, knowledge base and language-model clients, adjudication,
//! identification and promotion.

pub mod adjudicator;
pub mod completeness_scorer;
pub mod identification;
pub mod knowledge_base;
pub mod llm_client;
pub mod name_matcher;
pub mod promotion_gate;
pub mod similarity_index;
pub mod temporal_policy;
pub mod verdict_parser;

pub use adjudicator::Adjudicator;
pub use completeness_scorer::{CompletenessScorer, FieldPoints};
pub use identification::{CycleStatistics, DiscoveryOutcome, IdentificationEngine};
pub use knowledge_base::{KbEntity, KbError, KnowledgeBase, WikidataClient};
pub use llm_client::{AnthropicClient, LlmClient, LlmError};
pub use name_matcher::{MatchRule, MatchStatistics, Matcher};
pub use promotion_gate::{GateDecision, Promotion, PromotionGate};
pub use similarity_index::{SimilarityIndex, SqliteSimilarityIndex};
pub use temporal_policy::{EraCutoffPolicy, TemporalPolicy};
pub use verdict_parser::{parse_verdict, VerdictParseError};
