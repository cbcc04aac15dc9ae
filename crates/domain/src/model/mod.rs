pub mod alert;
pub mod extraction;
pub mod fetch;
pub mod ledger;
pub mod normalization;
pub mod rule;
pub mod run;
pub mod source;
pub mod tier;
pub mod workspace;

pub use alert::{Alert, AlertConditionKind, AlertConditionSpec, AlertPolicy, Severity};
pub use extraction::{
    ExtractionConfig, HealEvent, PostProcessStep, SchemaExtractMeta, SchemaExtraction,
    SchemaFingerprint, SchemaSource, SelectorExtraction, SelectorFingerprint,
};
pub use fetch::{BlockKind, FetchOutcome, FetchRequest, FetchResult, ProviderKind};
pub use ledger::FetchAttempt;
pub use normalization::{
    AvailabilityNormalization, AvailabilityStatus, Locale, NormalizationConfig, NormalizedValue,
    NumberNormalization, PriceNormalization, TextNormalization,
};
pub use rule::{Rule, RuleState, RuleType, Schedule};
pub use run::{classify_change_kind, ChangeKind, Observation, Run, RunStatus};
pub use source::{FetchMode, FetchProfile, Source};
pub use tier::{DomainTier, TierPolicy, TierPolicyOverrides};
pub use workspace::{Channel, ChannelKind, Workspace};
