use thiserror::Error;

/// Errors raised by the core data structures and algorithms.
///
/// Parse-level problems are reported separately as localized
/// [`htn_utils::input::ErrLoc`] values; everything below the surface syntax
/// funnels through this type.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("attempt to address element {index} of a sequence of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("conflicting binding for {var}: {existing} vs {new}")]
    SubstitutionDoubleBinding {
        var: String,
        existing: String,
        new: String,
    },

    #[error("substitution exceeded the maximum application depth ({0})")]
    SubstitutionRecurses(u32),

    #[error("operator {0} is not applicable in the current state")]
    OperatorNotApplicable(String),

    #[error("method {0} is not applicable in the current state")]
    MethodNotApplicable(String),

    #[error("subtask covering plan range [{before}, {after}] overlaps an already chosen subtask")]
    OperatorOverlap { before: usize, after: usize },

    #[error("only predicates and equalities may be negated")]
    NegNotPredOrEqu,

    #[error("a state may only contain ground predicate atoms")]
    StateNotAtom,

    #[error("problem declares domain `{problem}` but the domain file defines `{domain}`")]
    DomainMismatch { problem: String, domain: String },

    #[error("term `{name}` used with inconsistent typing ({first} vs {second})")]
    TypingMismatch {
        name: String,
        first: String,
        second: String,
    },

    #[error("unsupported feature: {0}")]
    NotImplemented(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
