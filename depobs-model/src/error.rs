use std::fmt::{self, Display};

/// Errors produced by model constructors and validation routines.
#[derive(Debug)]
pub enum ModelError {
    InvalidParams(String),
    InvalidStatus(String),
    IllegalTransition {
        from: crate::ScanStatus,
        to: crate::ScanStatus,
    },
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidParams(msg) => {
                write!(f, "invalid scan params: {msg}")
            }
            ModelError::InvalidStatus(raw) => {
                write!(f, "unknown scan status: {raw}")
            }
            ModelError::IllegalTransition { from, to } => {
                write!(f, "illegal scan status transition {from} -> {to}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
