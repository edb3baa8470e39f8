//! Routing Policy
//!
//! Declarative mapping from request context to an ordered list of candidate
//! backends.
//!
//! # Resolution
//!
//! ```text
//! 1. Walk entries in declaration order
//! 2. The first entry whose predicate matches the context wins
//! 3. No match is a configuration error (never defaulted)
//! ```
//!
//! A predicate is a conjunction over the three context axes; an axis left
//! unspecified matches any value. Because resolution is first-match, more
//! specific entries must be declared before broader ones. Two entries with
//! identical predicates can never both be meaningful and are rejected at
//! load time. Entries that are shadowed by an earlier one, or that overlap
//! an equally specific earlier one (`{tier=early}` and `{domain=math}`),
//! load with a warning.

use std::collections::HashSet;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::registry::BackendRegistry;
use crate::backend::ExpectedSchema;
use crate::config::ConfigError;
use crate::context::{AudienceTier, ContentDomain, RequestContext, WorkflowStage};

// ============================================================================
// Context Predicate
// ============================================================================

/// Conjunctive match over the context axes (`None` = wildcard)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextMatch {
    /// Required audience tier
    pub audience_tier: Option<AudienceTier>,
    /// Required content domain
    pub content_domain: Option<ContentDomain>,
    /// Required workflow stage
    pub workflow_stage: Option<WorkflowStage>,
}

impl ContextMatch {
    /// Predicate matching every context
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Require an audience tier
    #[must_use]
    pub fn tier(mut self, tier: AudienceTier) -> Self {
        self.audience_tier = Some(tier);
        self
    }

    /// Require a content domain
    #[must_use]
    pub fn domain(mut self, domain: ContentDomain) -> Self {
        self.content_domain = Some(domain);
        self
    }

    /// Require a workflow stage
    #[must_use]
    pub fn stage(mut self, stage: WorkflowStage) -> Self {
        self.workflow_stage = Some(stage);
        self
    }

    /// Whether `context` satisfies every specified axis
    #[must_use]
    pub fn matches(&self, context: &RequestContext) -> bool {
        self.audience_tier.map_or(true, |t| t == context.audience_tier)
            && self.content_domain.map_or(true, |d| d == context.content_domain)
            && self.workflow_stage.map_or(true, |s| s == context.workflow_stage)
    }

    /// Number of specified (non-wildcard) axes
    #[must_use]
    pub fn specificity(&self) -> usize {
        usize::from(self.audience_tier.is_some())
            + usize::from(self.content_domain.is_some())
            + usize::from(self.workflow_stage.is_some())
    }

    /// Whether every context matched by `other` is also matched by `self`
    #[must_use]
    pub fn covers(&self, other: &Self) -> bool {
        fn axis<T: PartialEq>(mine: Option<T>, theirs: Option<T>) -> bool {
            match (mine, theirs) {
                (None, _) => true,
                (Some(a), Some(b)) => a == b,
                (Some(_), None) => false,
            }
        }
        axis(self.audience_tier, other.audience_tier)
            && axis(self.content_domain, other.content_domain)
            && axis(self.workflow_stage, other.workflow_stage)
    }

    /// Whether some context is matched by both predicates
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        fn axis<T: PartialEq>(mine: Option<T>, theirs: Option<T>) -> bool {
            match (mine, theirs) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
        }
        axis(self.audience_tier, other.audience_tier)
            && axis(self.content_domain, other.content_domain)
            && axis(self.workflow_stage, other.workflow_stage)
    }
}

impl fmt::Display for ContextMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show<T: fmt::Display>(v: Option<T>) -> String {
            v.map_or_else(|| "*".to_string(), |v| v.to_string())
        }
        write!(
            f,
            "{{tier={}, domain={}, stage={}}}",
            show(self.audience_tier),
            show(self.content_domain),
            show(self.workflow_stage)
        )
    }
}

// ============================================================================
// Policy Entry
// ============================================================================

/// One row of the policy table
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PolicyEntry {
    /// Name used in logs and errors
    pub name: String,
    /// Which contexts this entry applies to
    pub predicate: ContextMatch,
    /// Backend ids in preference order
    pub candidates: Vec<String>,
    /// Expected cost of a typical request (informational only)
    pub estimated_cost: Decimal,
    /// Shape the decoded response must have
    pub schema: ExpectedSchema,
}

impl PolicyEntry {
    /// Create an entry with an empty schema and zero estimate
    pub fn new(name: impl Into<String>, predicate: ContextMatch, candidates: Vec<String>) -> Self {
        Self {
            name: name.into(),
            predicate,
            candidates,
            estimated_cost: Decimal::ZERO,
            schema: ExpectedSchema::default(),
        }
    }

    /// Set the estimated cost
    #[must_use]
    pub fn with_estimated_cost(mut self, cost: Decimal) -> Self {
        self.estimated_cost = cost;
        self
    }

    /// Set the expected response schema
    #[must_use]
    pub fn with_schema(mut self, schema: ExpectedSchema) -> Self {
        self.schema = schema;
        self
    }

    fn validate(&self, registry: &BackendRegistry) -> Result<(), ConfigError> {
        if self.candidates.is_empty() {
            return Err(ConfigError::EmptyCandidates {
                policy: self.name.clone(),
            });
        }

        let mut seen = HashSet::new();
        for backend in &self.candidates {
            if !registry.contains(backend) {
                return Err(ConfigError::UnknownBackend {
                    policy: self.name.clone(),
                    backend: backend.clone(),
                });
            }
            if !seen.insert(backend.as_str()) {
                return Err(ConfigError::DuplicateCandidate {
                    policy: self.name.clone(),
                    backend: backend.clone(),
                });
            }
        }

        if self.estimated_cost < Decimal::ZERO {
            return Err(ConfigError::ValidationError(format!(
                "policy '{}' has a negative estimated cost",
                self.name
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Policy Table
// ============================================================================

/// Ordered, validated policy entries
#[derive(Clone, Debug, Default)]
pub struct PolicyTable {
    entries: Vec<PolicyEntry>,
}

impl PolicyTable {
    /// Build a table, checking every entry against the registry
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for empty or duplicate candidate lists,
    /// candidates missing from the registry, or two entries with identical
    /// predicates.
    pub fn new(entries: Vec<PolicyEntry>, registry: &BackendRegistry) -> Result<Self, ConfigError> {
        for entry in &entries {
            entry.validate(registry)?;
        }

        for (i, earlier) in entries.iter().enumerate() {
            for later in &entries[i + 1..] {
                if earlier.predicate == later.predicate {
                    return Err(ConfigError::AmbiguousPolicy {
                        first: earlier.name.clone(),
                        second: later.name.clone(),
                    });
                }
                let (earlier_rank, later_rank) =
                    (earlier.predicate.specificity(), later.predicate.specificity());
                if earlier.predicate.covers(&later.predicate) {
                    tracing::warn!(
                        policy = %later.name,
                        specificity = later_rank,
                        shadowed_by = %earlier.name,
                        shadowed_by_specificity = earlier_rank,
                        "Policy entry is unreachable; declare more specific entries first"
                    );
                } else if earlier_rank == later_rank && earlier.predicate.overlaps(&later.predicate) {
                    tracing::warn!(
                        first = %earlier.name,
                        second = %later.name,
                        specificity = earlier_rank,
                        "Equally specific policies overlap; declaration order decides"
                    );
                }
            }
        }

        Ok(Self { entries })
    }

    /// Find the entry for a context (first match in declaration order)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoPolicyMatch`] when no entry applies.
    pub fn resolve(&self, context: &RequestContext) -> Result<&PolicyEntry, ConfigError> {
        self.entries
            .iter()
            .find(|entry| entry.predicate.matches(context))
            .ok_or(ConfigError::NoPolicyMatch { context: *context })
    }

    /// Entries in declaration order
    #[must_use]
    pub fn entries(&self) -> &[PolicyEntry] {
        &self.entries
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
