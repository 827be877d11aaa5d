use crate::stage::StageId;

/// Result type alias for delegation operations.
pub type Result<T> = std::result::Result<T, FlowError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    /// A second delegation was requested on a stage that already has a live child.
    #[error("Stage {stage} is already delegating to a child")]
    AlreadyDelegating { stage: StageId },

    /// Delegation was requested on a stage whose buffer is already closed.
    #[error("Cannot transfer control of stopped stage {stage}")]
    Stopped { stage: StageId },
}

impl FlowError {
    /// The stage the failed request was issued on.
    pub fn stage(&self) -> StageId {
        match self {
            FlowError::AlreadyDelegating { stage } | FlowError::Stopped { stage } => *stage,
        }
    }
}
