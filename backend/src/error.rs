//! Error handling for the Metal Recovery Platform
//!
//! Provides consistent error details in Portuguese and English

use rust_decimal::Decimal;
use serde::Serialize;
use shared::types::Language;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {message}")]
    Conflict {
        resource: String,
        message: String,
        message_pt: String,
    },

    // Validation errors
    #[error("Validation error: {message}")]
    Validation {
        field: String,
        message: String,
        message_pt: String,
    },

    // Business logic errors
    #[error("Insufficient balance: requested {requested} g, available {available} g")]
    InsufficientBalance {
        account: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Insufficient lot quantity: requested {requested}, available {available}")]
    InsufficientLotQuantity {
        lot: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Illegal state transition: {entity} does not allow {operation} from {from}")]
    IllegalStateTransition {
        entity: String,
        from: String,
        operation: String,
    },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Already settled: {0}")]
    AlreadySettled(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error")]
    InternalError(#[from] anyhow::Error),
}

/// Error envelope for embedders that serialize failures
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message_en: String,
    pub message_pt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorDetail {
    /// Message in the requested language
    pub fn message(&self, language: Language) -> &str {
        match language {
            Language::Portuguese => &self.message_pt,
            Language::English => &self.message_en,
        }
    }
}

impl AppError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict { .. } => "CONFLICT",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            AppError::InsufficientLotQuantity { .. } => "INSUFFICIENT_LOT_QUANTITY",
            AppError::IllegalStateTransition { .. } => "ILLEGAL_STATE_TRANSITION",
            AppError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            AppError::AlreadySettled(_) => "ALREADY_SETTLED",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Internal(_) | AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Bilingual detail for this error
    pub fn detail(&self) -> ErrorDetail {
        match self {
            AppError::NotFound(resource) => ErrorDetail {
                code: self.code().to_string(),
                message_en: format!("{} not found", resource),
                message_pt: format!("{} não encontrado", resource),
                field: None,
            },
            AppError::Conflict {
                resource,
                message,
                message_pt,
            } => ErrorDetail {
                code: self.code().to_string(),
                message_en: message.clone(),
                message_pt: message_pt.clone(),
                field: Some(resource.clone()),
            },
            AppError::Validation {
                field,
                message,
                message_pt,
            } => ErrorDetail {
                code: self.code().to_string(),
                message_en: message.clone(),
                message_pt: message_pt.clone(),
                field: Some(field.clone()),
            },
            AppError::InsufficientBalance {
                account,
                requested,
                available,
            } => ErrorDetail {
                code: self.code().to_string(),
                message_en: format!(
                    "Insufficient balance on account {}: requested {} g, available {} g",
                    account, requested, available
                ),
                message_pt: format!(
                    "Saldo insuficiente na conta {}: solicitado {} g, disponível {} g",
                    account, requested, available
                ),
                field: None,
            },
            AppError::InsufficientLotQuantity {
                lot,
                requested,
                available,
            } => ErrorDetail {
                code: self.code().to_string(),
                message_en: format!(
                    "Insufficient quantity in lot {}: requested {}, available {}",
                    lot, requested, available
                ),
                message_pt: format!(
                    "Quantidade insuficiente no lote {}: solicitado {}, disponível {}",
                    lot, requested, available
                ),
                field: None,
            },
            AppError::IllegalStateTransition {
                entity,
                from,
                operation,
            } => ErrorDetail {
                code: self.code().to_string(),
                message_en: format!(
                    "{} does not allow {} from state {}",
                    entity, operation, from
                ),
                message_pt: format!(
                    "{} não permite {} a partir do estado {}",
                    entity, operation, from
                ),
                field: None,
            },
            AppError::InvariantViolation(msg) => ErrorDetail {
                code: self.code().to_string(),
                message_en: format!("Invariant violation: {}", msg),
                message_pt: format!("Violação de invariante: {}", msg),
                field: None,
            },
            AppError::AlreadySettled(msg) => ErrorDetail {
                code: self.code().to_string(),
                message_en: format!("Already settled: {}", msg),
                message_pt: format!("Já liquidado: {}", msg),
                field: None,
            },
            AppError::DatabaseError(_) => ErrorDetail {
                code: self.code().to_string(),
                message_en: "A database error occurred".to_string(),
                message_pt: "Ocorreu um erro no banco de dados".to_string(),
                field: None,
            },
            AppError::Internal(msg) => ErrorDetail {
                code: self.code().to_string(),
                message_en: msg.clone(),
                message_pt: "Ocorreu um erro interno".to_string(),
                field: None,
            },
            AppError::InternalError(_) => ErrorDetail {
                code: self.code().to_string(),
                message_en: "An internal error occurred".to_string(),
                message_pt: "Ocorreu um erro interno".to_string(),
                field: None,
            },
        }
    }

    /// Wrap this error's detail in the serializable envelope
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.detail(),
        }
    }
}

/// Result type alias for service operations
pub type AppResult<T> = Result<T, AppError>;
