//! Typed proof errors and the classifier that produces them.
//!
//! Every failure in the pipeline ends up as a [`ProofError`] whose kind maps to
//! a fixed severity and recoverability. The retry loop only looks at
//! recoverability, so new kinds are added here without touching it.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use trustproof_core::CircuitSize;
use trustproof_fusion::FusionError;
use trustproof_prover::ProverError;
use trustproof_workers::PoolError;

/// Result type for pipeline operations
pub type PipelineResult<T> = std::result::Result<T, ProofError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recoverability {
    Retryable,
    FallbackAvailable,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofErrorKind {
    CircuitCompilationFailed,
    CircuitLoadFailed,
    CircuitNotFound,
    InvalidCircuitParams,
    WitnessPreparationFailed,
    ProofGenerationFailed,
    ProofGenerationTimeout,
    ProofValidationFailed,
    ProofTampered,
    OutOfMemory,
    ResourceExhausted,
    WorkerUnavailable,
    NetworkError,
    ApiError,
    AccessDenied,
    RateLimited,
    QueueFull,
    Cancelled,
    InvalidInput,
    InternalError,
}

impl ProofErrorKind {
    pub const ALL: [ProofErrorKind; 20] = [
        ProofErrorKind::CircuitCompilationFailed,
        ProofErrorKind::CircuitLoadFailed,
        ProofErrorKind::CircuitNotFound,
        ProofErrorKind::InvalidCircuitParams,
        ProofErrorKind::WitnessPreparationFailed,
        ProofErrorKind::ProofGenerationFailed,
        ProofErrorKind::ProofGenerationTimeout,
        ProofErrorKind::ProofValidationFailed,
        ProofErrorKind::ProofTampered,
        ProofErrorKind::OutOfMemory,
        ProofErrorKind::ResourceExhausted,
        ProofErrorKind::WorkerUnavailable,
        ProofErrorKind::NetworkError,
        ProofErrorKind::ApiError,
        ProofErrorKind::AccessDenied,
        ProofErrorKind::RateLimited,
        ProofErrorKind::QueueFull,
        ProofErrorKind::Cancelled,
        ProofErrorKind::InvalidInput,
        ProofErrorKind::InternalError,
    ];

    /// Inverse of [`ProofErrorKind::code`]
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.code() == code)
    }

    /// Default severity and recoverability for each kind
    pub fn profile(&self) -> (Severity, Recoverability) {
        use ProofErrorKind::*;
        use Recoverability::*;
        use Severity::*;
        match self {
            CircuitCompilationFailed => (High, FallbackAvailable),
            CircuitLoadFailed => (High, FallbackAvailable),
            CircuitNotFound => (High, FallbackAvailable),
            InvalidCircuitParams => (High, Fatal),
            WitnessPreparationFailed => (Medium, Retryable),
            ProofGenerationFailed => (High, Retryable),
            ProofGenerationTimeout => (Medium, Retryable),
            ProofValidationFailed => (High, Retryable),
            ProofTampered => (Critical, Fatal),
            OutOfMemory => (High, FallbackAvailable),
            ResourceExhausted => (Medium, Retryable),
            WorkerUnavailable => (Medium, Retryable),
            NetworkError => (Medium, Retryable),
            ApiError => (Medium, Retryable),
            AccessDenied => (High, Fatal),
            RateLimited => (Medium, Fatal),
            QueueFull => (Medium, Fatal),
            Cancelled => (Low, Fatal),
            InvalidInput => (Medium, Fatal),
            InternalError => (High, Retryable),
        }
    }

    pub fn severity(&self) -> Severity {
        self.profile().0
    }

    pub fn recoverability(&self) -> Recoverability {
        self.profile().1
    }

    pub fn code(&self) -> &'static str {
        use ProofErrorKind::*;
        match self {
            CircuitCompilationFailed => "CIRCUIT_COMPILATION_FAILED",
            CircuitLoadFailed => "CIRCUIT_LOAD_FAILED",
            CircuitNotFound => "CIRCUIT_NOT_FOUND",
            InvalidCircuitParams => "INVALID_CIRCUIT_PARAMS",
            WitnessPreparationFailed => "WITNESS_PREPARATION_FAILED",
            ProofGenerationFailed => "PROOF_GENERATION_FAILED",
            ProofGenerationTimeout => "PROOF_GENERATION_TIMEOUT",
            ProofValidationFailed => "PROOF_VALIDATION_FAILED",
            ProofTampered => "PROOF_TAMPERED",
            OutOfMemory => "OUT_OF_MEMORY",
            ResourceExhausted => "RESOURCE_EXHAUSTED",
            WorkerUnavailable => "WORKER_UNAVAILABLE",
            NetworkError => "NETWORK_ERROR",
            ApiError => "API_ERROR",
            AccessDenied => "ACCESS_DENIED",
            RateLimited => "RATE_LIMITED",
            QueueFull => "QUEUE_FULL",
            Cancelled => "CANCELLED",
            InvalidInput => "INVALID_INPUT",
            InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ProofErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Where in the pipeline an error surfaced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub request_id: Option<String>,
    pub circuit_size: Option<CircuitSize>,
    pub attempt: Option<u32>,
}

impl ErrorContext {
    pub fn for_attempt(request_id: &str, circuit_size: CircuitSize, attempt: u32) -> Self {
        Self {
            request_id: Some(request_id.to_string()),
            circuit_size: Some(circuit_size),
            attempt: Some(attempt),
        }
    }
}

/// Classified proof failure
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ProofError {
    pub kind: ProofErrorKind,
    pub message: String,
    pub severity: Severity,
    pub recoverability: Recoverability,
    pub context: ErrorContext,
}

impl ProofError {
    /// Error with the kind's default profile
    pub fn new(kind: ProofErrorKind, message: impl Into<String>) -> Self {
        let (severity, recoverability) = kind.profile();
        Self {
            kind,
            message: message.into(),
            severity,
            recoverability,
            context: ErrorContext::default(),
        }
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.recoverability == Recoverability::Fatal
    }
}

/// Turns arbitrary failures into [`ProofError`]s.
///
/// Typed errors from the workspace crates map directly. Anything else is
/// matched on its lowercased message, first match wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    const MESSAGE_RULES: &'static [(&'static [&'static str], ProofErrorKind)] = &[
        (&["tamper"], ProofErrorKind::ProofTampered),
        (&["circuit", "compile"], ProofErrorKind::CircuitCompilationFailed),
        (&["memory", "heap"], ProofErrorKind::OutOfMemory),
        (&["timeout", "timed out"], ProofErrorKind::ProofGenerationTimeout),
        (&["network", "fetch"], ProofErrorKind::NetworkError),
        (&["witness"], ProofErrorKind::WitnessPreparationFailed),
    ];

    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, raw: &anyhow::Error, context: &ErrorContext) -> ProofError {
        let classified = if let Some(error) = raw.downcast_ref::<ProofError>() {
            error.clone()
        } else if let Some(error) = raw.downcast_ref::<ProverError>() {
            Self::from_prover(error)
        } else if let Some(error) = raw.downcast_ref::<FusionError>() {
            ProofError::new(ProofErrorKind::InvalidInput, error.to_string())
        } else if let Some(error) = raw.downcast_ref::<PoolError>() {
            Self::from_pool(error)
        } else if raw.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            ProofError::new(ProofErrorKind::ProofGenerationTimeout, format!("{:#}", raw))
        } else {
            Self::classify_message(&format!("{:#}", raw))
        };
        classified.with_context(context.clone())
    }

    /// Pattern-match a bare error message
    pub fn classify_message(message: &str) -> ProofError {
        let lowered = message.to_lowercase();
        let kind = Self::MESSAGE_RULES
            .iter()
            .find(|(needles, _)| needles.iter().any(|n| lowered.contains(n)))
            .map(|(_, kind)| *kind)
            .unwrap_or(ProofErrorKind::InternalError);
        ProofError::new(kind, message)
    }

    fn from_prover(error: &ProverError) -> ProofError {
        let kind = match error {
            ProverError::NotInitialized => ProofErrorKind::InternalError,
            ProverError::CircuitNotFound(_) => ProofErrorKind::CircuitNotFound,
            ProverError::CircuitLoadFailed { .. } | ProverError::IntegrityMismatch { .. } => {
                ProofErrorKind::CircuitLoadFailed
            }
            ProverError::InvalidFallbackTable(_) => ProofErrorKind::InvalidCircuitParams,
            ProverError::WitnessGenerationFailed(_) => ProofErrorKind::WitnessPreparationFailed,
            ProverError::ProofGenerationFailed(_) => ProofErrorKind::ProofGenerationFailed,
            ProverError::OutOfMemory(_) => ProofErrorKind::OutOfMemory,
            ProverError::VerificationFailed(_) => ProofErrorKind::ProofValidationFailed,
            ProverError::InvalidInput(_) => ProofErrorKind::InvalidInput,
        };
        ProofError::new(kind, error.to_string())
    }

    fn from_pool(error: &PoolError) -> ProofError {
        match error {
            PoolError::Cancelled(_) => {
                ProofError::new(ProofErrorKind::Cancelled, error.to_string())
            }
            PoolError::RetriesExhausted { last_error: failure, .. }
            | PoolError::TaskRejected { failure, .. } => {
                // A worker-supplied code is authoritative
                let tagged = failure.code.as_deref().and_then(ProofErrorKind::from_code);
                let kind = match tagged {
                    Some(kind) => kind,
                    None => match Self::classify_message(&failure.message).kind {
                        ProofErrorKind::InternalError | ProofErrorKind::NetworkError => {
                            ProofErrorKind::WorkerUnavailable
                        }
                        other => other,
                    },
                };
                ProofError::new(kind, error.to_string())
            }
            PoolError::Shutdown
            | PoolError::WorkerNotFound(_)
            | PoolError::DuplicateWorker(_)
            | PoolError::InvalidWorker(_) => {
                ProofError::new(ProofErrorKind::WorkerUnavailable, error.to_string())
            }
        }
    }
}
