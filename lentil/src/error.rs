//! Error types for distributions, traces and inference.

use thiserror::Error;

/// Errors raised while building distributions, running programs or
/// optimizing a guide.
#[derive(Debug, Error)]
pub enum PplError {
    /// Probabilities along the category axis do not sum to 1.
    #[error("probabilities not normalized: sum = {sum} (expected 1.0)")]
    NotNormalized { sum: f32 },

    /// A probability parameter is negative.
    #[error("negative probability {value}")]
    NegativeProbability { value: f32 },

    /// Shapes that must agree (or broadcast) do not.
    #[error("shape mismatch in {op}: {lhs:?} vs {rhs:?}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },

    /// A value lies outside the support of the distribution scoring it.
    #[error("value outside the support of {0}")]
    OutOfSupport(String),

    /// A sample site name was used twice within one trace.
    #[error("sample site '{0}' already exists in the trace")]
    DuplicateSite(String),

    /// The operation is not available for this distribution or site.
    #[error("{op} is not supported by {what}")]
    Unsupported { what: String, op: &'static str },

    /// A parameter value violates its constraint.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Model and guide traces disagree about a latent site.
    #[error("site '{site}' is {problem}")]
    SiteMismatch { site: String, problem: &'static str },

    /// A replayed trace recorded this site as observed.
    #[error("site '{0}' is observed in the replayed trace")]
    ReplayObserved(String),

    /// Log densities were requested before the trace was closed.
    #[error("trace is still open")]
    TraceOpen,

    /// A site was added after the trace was closed.
    #[error("trace is already closed")]
    TraceClosed,

    /// The parameter store has no parameter of this name.
    #[error("unknown parameter '{0}'")]
    MissingParam(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

impl PplError {
    pub fn unsupported(what: impl Into<String>, op: &'static str) -> Self {
        Self::Unsupported {
            what: what.into(),
            op,
        }
    }

    pub fn shape_mismatch(op: &'static str, lhs: &[usize], rhs: &[usize]) -> Self {
        Self::ShapeMismatch {
            op,
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PplError>;
