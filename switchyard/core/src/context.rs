//! Request Context
//!
//! The three closed axes a request is routed on: who the content is for
//! (audience tier), what subject it covers (content domain), and which
//! step of the learning workflow asked for it (workflow stage).
//!
//! Every axis is a fixed enumeration. Unknown values are rejected when the
//! context is built, both from strings ([`std::str::FromStr`]) and from
//! configuration files (serde), so a typo never reaches the router.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Context Axes
// ============================================================================

/// Audience tier the generated content is aimed at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudienceTier {
    /// Pre-K through grade 2
    Early,
    /// Grades 3 through 5
    Elementary,
    /// Grades 6 through 8
    Middle,
    /// Grades 9 through 12
    High,
}

impl AudienceTier {
    /// All tiers, in ascending order
    pub const ALL: [Self; 4] = [Self::Early, Self::Elementary, Self::Middle, Self::High];

    /// Stable lowercase name, matching the configuration spelling
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Early => "early",
            Self::Elementary => "elementary",
            Self::Middle => "middle",
            Self::High => "high",
        }
    }
}

/// Subject area of the requested content
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentDomain {
    /// Mathematics
    Math,
    /// English language arts
    Ela,
    /// Science
    Science,
    /// Social studies
    SocialStudies,
    /// Anything not tied to a subject (greetings, companions, navigation)
    General,
}

impl ContentDomain {
    /// All domains
    pub const ALL: [Self; 5] = [
        Self::Math,
        Self::Ela,
        Self::Science,
        Self::SocialStudies,
        Self::General,
    ];

    /// Stable lowercase name, matching the configuration spelling
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Math => "math",
            Self::Ela => "ela",
            Self::Science => "science",
            Self::SocialStudies => "social_studies",
            Self::General => "general",
        }
    }
}

/// Step of the workflow that issued the request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    /// Direct instruction
    Learn,
    /// Applied, scenario-based practice
    Experience,
    /// Open-ended exploration
    Discover,
    /// Graded checks
    Assessment,
}

impl WorkflowStage {
    /// All stages, in workflow order
    pub const ALL: [Self; 4] = [Self::Learn, Self::Experience, Self::Discover, Self::Assessment];

    /// Stable lowercase name, matching the configuration spelling
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Learn => "learn",
            Self::Experience => "experience",
            Self::Discover => "discover",
            Self::Assessment => "assessment",
        }
    }
}

macro_rules! closed_axis {
    ($ty:ident, $axis:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ContextError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
                Self::ALL
                    .into_iter()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| ContextError::UnknownValue {
                        axis: $axis,
                        value: s.to_string(),
                    })
            }
        }
    };
}

closed_axis!(AudienceTier, "audience tier");
closed_axis!(ContentDomain, "content domain");
closed_axis!(WorkflowStage, "workflow stage");

// ============================================================================
// Request Context
// ============================================================================

/// Routing context supplied with every request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestContext {
    /// Who the content is for
    pub audience_tier: AudienceTier,
    /// What subject it covers
    pub content_domain: ContentDomain,
    /// Which workflow step asked for it
    pub workflow_stage: WorkflowStage,
}

impl RequestContext {
    /// Create a context from already-typed axes
    #[must_use]
    pub fn new(
        audience_tier: AudienceTier,
        content_domain: ContentDomain,
        workflow_stage: WorkflowStage,
    ) -> Self {
        Self {
            audience_tier,
            content_domain,
            workflow_stage,
        }
    }

    /// Build a context from loosely-typed strings, rejecting unknown values
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::UnknownValue`] naming the first axis that did
    /// not parse.
    pub fn parse(tier: &str, domain: &str, stage: &str) -> Result<Self, ContextError> {
        Ok(Self {
            audience_tier: tier.parse()?,
            content_domain: domain.parse()?,
            workflow_stage: stage.parse()?,
        })
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tier={} domain={} stage={}",
            self.audience_tier, self.content_domain, self.workflow_stage
        )
    }
}

/// Error building a [`RequestContext`]
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ContextError {
    /// A value outside the closed set for its axis
    #[error("unknown {axis} '{value}'")]
    UnknownValue {
        /// Axis name
        axis: &'static str,
        /// The rejected input
        value: String,
    },
}
