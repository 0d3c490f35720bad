//! Error types for the interpreter core and its ambient collaborators.
//!
//! One enum per layer, in the style of the postprocessor's own error type:
//! `thiserror`-derived, `Display` messages meant for a human operator or log
//! line, `From` conversions installed at the boundaries that produce them.

/// Errors raised by the interpreter core (parsing, state, parameter store).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("parameter #{0} is out of range")]
    ParamOutOfRange(u32),

    #[error("stack underflow")]
    StackUnderflow,

    #[error("block exceeds maximum length")]
    BlockTooLong,

    #[error("malformed number in word '{0}'")]
    MalformedNumber(char),

    #[error("program number {0} has no known offset")]
    ProgramNotFound(u32),

    #[error("machine fault: {0}")]
    MachineFault(String),
}

/// Errors raised by the ambient layer (CLI, file-backed collaborators).
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("parameter file I/O: {0}")]
    ParamFileIo(String),

    #[error("parameter file is not valid JSON: {0}")]
    ParamFileFormat(String),

    #[error("input I/O: {0}")]
    InputIo(String),
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        Self::ParamFileIo(e.to_string())
    }
}
