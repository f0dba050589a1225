use thiserror::Error;

/// A fatal compilation failure.
///
/// None of these are recoverable: the compiler is a single-pass, deterministic
/// lowering and every failure indicates either malformed (unvalidated) input
/// or an internal inconsistency. The driver attaches the name of the
/// offending instruction before surfacing the error.
#[derive(Debug, Error)]
pub enum CompileError {
    /// An operand pop or peek did not match the statically known type.
    #[error("operand stack type mismatch: expected {expected}, found {found}")]
    StackType { expected: String, found: String },

    /// The operand stack held the wrong number of values at a block boundary.
    #[error("operand stack does not match block arity at exit: expected {expected} values above the block base, found {found}")]
    StackMismatch { expected: usize, found: usize },

    /// A branch named a relative depth with no corresponding open block.
    #[error("branch depth {depth} exceeds the current block nesting of {max}")]
    InvalidBranch { depth: u32, max: usize },

    /// Too many parameters plus locals; reported before any code is emitted.
    #[error("function declares {count} parameters and locals, exceeding the limit of 65535")]
    LimitExceeded { count: usize },

    /// A non-local branch was requested from a unit that has no registered
    /// non-local entry point. Only possible when the block compiler and the
    /// continuation compiler disagree about a block's split status.
    #[error("non-local branch from a unit with no registered non-local entry point")]
    ProtocolMisuse,

    #[error("internal consistency error: {0}")]
    Internal(String),
}
