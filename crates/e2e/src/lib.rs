//! Selfheal E2E Library
//!
//! Lets browser-driven tests survive selector drift and feeds what they
//! learn back into the test sources:
//! - Resolves selector chains at runtime, falling back in order
//! - Records which fallback healed a stale primary, one artifact per worker
//! - Aggregates artifacts across runs (first artifact wins)
//! - Rewrites spec files where the primary is a whole quoted literal
//! - Proposes the rewrite on a git branch, optionally as a pull request
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Test workers (parallel)                     │
//! │    SelectorResolver ── ElementQuery (browser engine)        │
//! │      └── LearningStore ──> <run-id>.learnings.json          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 Batch pipeline (sequential)                 │
//! │    aggregate()          results dir -> AggregatedLearnings  │
//! │    LiteralRewriter      spec files  -> PlannedRewrite       │
//! │    ChangeSet            per-file replacements               │
//! │    GitAutomation        branch, commit, push, PR            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod aggregate;
pub mod config;
pub mod error;
pub mod git;
pub mod learning;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod rewrite;
pub mod selector;

pub use aggregate::{aggregate, AggregatedLearnings, Aggregation, LearningConflict};
pub use config::HealConfig;
pub use error::{HealError, HealResult};
pub use git::{CommandRunner, GitAutomation, GitOutcome, SystemRunner};
pub use learning::{LearningRecord, LearningStore, RunArtifact, RunId};
pub use pipeline::{Pipeline, PipelineReport, PipelineStatus};
pub use report::{ChangeRecord, ChangeSet, Replacement};
pub use resolver::{ElementQuery, Resolved, SelectorResolver};
pub use rewrite::{replace_quoted_literal, LiteralRewriter};
pub use selector::{SelectorCatalog, SelectorChain};
