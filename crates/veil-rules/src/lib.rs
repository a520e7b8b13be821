//! Veil Rules
//!
//! Compiles per-entity settings into declarative rules:
//! - Stable rule ids per (category, qualifier)
//! - One compiler per rule category
//! - Atomic installs against a pluggable evaluation engine
//! - Per-rule-id serialization of every read-modify-install cycle

pub mod compilers;
mod engine;
mod error;
mod ids;
mod list;
mod locks;
mod manager;
mod rule;

pub use compilers::{Resolution, RuleCompiler};
pub use engine::{EngineResult, InMemoryEngine, RuleEngine};
pub use error::{EngineError, RuleError};
pub use ids::{
    IdRegistry, CONTEXT_EXCEPTION_QUALIFIER, DEFAULT_QUALIFIER, FIRST_DYNAMIC_ID,
    RESERVED_AUTOCOMPLETE_BLOCK,
};
pub use list::include_in_list;
pub use locks::{IdGuard, IdLocks};
pub use manager::{ManagerConfig, RuleManager, SetupReport};
pub use rule::{
    priority_for, HeaderMatch, HeaderOp, HeaderOperation, QueryTransform, ResourceKind, Rule,
    RuleAction, RuleCondition, RuleId, RuleUpdate, STATIC_PRIORITY,
};

pub type Result<T> = std::result::Result<T, RuleError>;
