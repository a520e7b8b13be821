//! Rule error types

use thiserror::Error;

use veil_signal::ContextId;

/// Failures reported by the rule-evaluation engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Rule rejected: {0}")]
    Rejected(String),

    #[error("No tab with id: {0}")]
    StaleContext(ContextId),

    #[error("Rule engine unavailable: {0}")]
    Unavailable(String),
}

const STALE_SIGNATURES: [&str; 2] = ["No tab with id", "No frame with id"];

impl EngineError {
    /// The error refers to a context that no longer exists
    pub fn is_stale_context(&self) -> bool {
        match self {
            EngineError::StaleContext(_) => true,
            EngineError::Rejected(message) | EngineError::Unavailable(message) => {
                STALE_SIGNATURES.iter().any(|sig| message.contains(sig))
            }
        }
    }

    /// Context named by a stale-context error, if it can be recovered
    pub fn stale_context(&self) -> Option<ContextId> {
        match self {
            EngineError::StaleContext(context) => Some(*context),
            EngineError::Rejected(message) | EngineError::Unavailable(message)
                if self.is_stale_context() =>
            {
                // "No tab with id: 12" / "No frame with id 3 in tab with id 12"
                message
                    .rsplit(|c: char| !c.is_ascii_digit())
                    .find(|part| !part.is_empty())
                    .and_then(|digits| digits.parse().ok())
                    .map(ContextId)
            }
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Settings error: {0}")]
    Settings(#[from] veil_settings::SettingsError),

    #[error("Signal error: {0}")]
    Signal(#[from] veil_signal::SignalError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_context_signatures() {
        assert!(EngineError::StaleContext(ContextId(4)).is_stale_context());
        assert!(EngineError::Rejected("No tab with id: 12".into()).is_stale_context());
        assert!(EngineError::Unavailable("No frame with id 3 in tab with id 12".into())
            .is_stale_context());
        assert!(!EngineError::Unavailable("quota exceeded".into()).is_stale_context());
    }

    #[test]
    fn test_stale_context_id() {
        assert_eq!(
            EngineError::Rejected("No tab with id: 12".into()).stale_context(),
            Some(ContextId(12))
        );
        assert_eq!(
            EngineError::Rejected("No frame with id 3 in tab with id 12".into()).stale_context(),
            Some(ContextId(12))
        );
        assert_eq!(EngineError::Rejected("bad rule".into()).stale_context(), None);
    }
}
