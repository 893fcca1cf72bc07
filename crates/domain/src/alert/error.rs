use thiserror::Error;

use crate::engine::error::EngineError;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert not found: {0}")]
    NotFound(String),

    #[error("invalid alert id '{0}', expected 'rule_id:entity_id'")]
    InvalidId(String),

    #[error("no active alert for entity {entity_id} with rule {rule_id}")]
    NoActiveAlert { rule_id: String, entity_id: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}
