//! Errors that can occur when detecting or flagging RFI.

use thiserror::Error;

/// Error for when the shape of an array does not match what was expected.
///
/// Shape disagreements are always a hard error, never a silent broadcast.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("bad array shape supplied to argument {argument} of function {function}. expected {expected}, received {received}")]
pub struct ShapeMismatch {
    /// The argument that was invalid
    pub argument: &'static str,
    /// The function the argument was supplied to
    pub function: &'static str,
    /// The expected shape
    pub expected: String,
    /// The shape that was received instead
    pub received: String,
}

/// Errors from constructing or looking up a flagging strategy.
///
/// All of these are fatal at construction time, before any data is processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    /// A strategy name that is not in the registry
    #[error("unknown flagging strategy {name:?}. available: {available}")]
    UnknownStrategy {
        /// The name that was requested
        name: String,
        /// Comma-separated names of the registered strategies
        available: String,
    },

    /// A strategy with no steps
    #[error("strategy {name:?} has no steps")]
    EmptyStrategy {
        /// The name of the offending strategy
        name: String,
    },

    /// A step parameter outside its valid range
    #[error("strategy {name:?} step {index} ({step}): {reason}")]
    BadStepParam {
        /// The name of the offending strategy
        name: String,
        /// Zero-based index of the offending step
        index: usize,
        /// A short description of the step kind
        step: &'static str,
        /// Why the parameter is invalid
        reason: String,
    },

    /// A flagger or combiner placed before any detector has produced
    /// a significance array
    #[error(
        "strategy {name:?} step {index} ({step}) needs a significance array, but no detector precedes it"
    )]
    MissingSignificance {
        /// The name of the offending strategy
        name: String,
        /// Zero-based index of the offending step
        index: usize,
        /// A short description of the step kind
        step: &'static str,
    },
}

/// Errors from operating on a [`FlagSet`](crate::FlagSet).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlagSetError {
    /// Error for bad array shape in provided argument
    #[error(transparent)]
    ShapeMismatch(#[from] ShapeMismatch),

    /// Two sets whose modes disagree were combined without an explicit
    /// conversion
    #[error("cannot {op} a {lhs} set with a {rhs} set; convert modes explicitly first")]
    ModeMismatch {
        /// The operation that was attempted
        op: &'static str,
        /// Mode of the left-hand set
        lhs: &'static str,
        /// Mode of the right-hand set
        rhs: &'static str,
    },

    /// Two sets whose kinds disagree were combined
    #[error("cannot {op} a {lhs} set with a {rhs} set")]
    KindMismatch {
        /// The operation that was attempted
        op: &'static str,
        /// Kind of the left-hand set
        lhs: &'static str,
        /// Kind of the right-hand set
        rhs: &'static str,
    },

    /// Coordinate metadata disagrees between two shape-compatible sets
    #[error("{field} differs between the two sets in {op}")]
    MetadataMismatch {
        /// The operation that was attempted
        op: &'static str,
        /// The metadata field that disagrees
        field: &'static str,
    },

    /// An operation that is only valid on one mode was applied to the other
    #[error("{op} is only valid on {expected}-mode sets, got {received}")]
    WrongMode {
        /// The operation that was attempted
        op: &'static str,
        /// The mode the operation requires
        expected: &'static str,
        /// The mode of the set it was applied to
        received: &'static str,
    },

    /// An operation that is only valid on some kinds was applied to another
    #[error("{op} is only valid on {expected} sets, got {received}")]
    WrongKind {
        /// The operation that was attempted
        op: &'static str,
        /// The kinds the operation accepts
        expected: &'static str,
        /// The kind of the set it was applied to
        received: &'static str,
    },
}

/// The union of all error types in this crate.
#[derive(Error, Debug)]
pub enum XrfiError {
    /// Error for bad array shape in provided argument
    #[error(transparent)]
    ShapeMismatch(#[from] ShapeMismatch),

    /// Error when constructing or looking up a strategy
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    /// Error when operating on a flag set
    #[error(transparent)]
    FlagSet(#[from] FlagSetError),
}
