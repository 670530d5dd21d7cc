use thiserror::Error;

use super::types::{ObjectId, Year};

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid link from {parent} to {child}: {reason}")]
    InvalidLink {
        parent: ObjectId,
        child: ObjectId,
        reason: String,
    },

    #[error("invalid loan terms for {id}: {reason}")]
    InvalidLoan { id: String, reason: String },

    #[error("object {0} not found")]
    UnknownEntity(ObjectId),

    #[error("illegal sale transition on {id} in {year}: {reason}")]
    SaleTransition {
        id: ObjectId,
        year: Year,
        reason: String,
    },

    #[error("a projection cascade is already in progress")]
    ReentrantCascade,

    #[error("plan document missing fields: {}", fields.join(", "))]
    MissingFields { fields: Vec<String> },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PlanResult<T> = Result<T, PlanError>;
