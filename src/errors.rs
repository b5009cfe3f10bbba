use std::fmt;

/// Crate-wide error type for conditions that are fatal to the current
/// process: I/O failures, on-disk corruption, and invariant violations
/// inside the tree. Recoverable conditions (bad input, duplicate keys)
/// are represented separately by `PrepareResult`/`ExecuteResult` and
/// never constructed as an `Error`.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    /// The on-disk image violates an assumption the engine relies on
    /// (bad file length, an out-of-bounds page reference, a dangling
    /// `INVALID_PAGE` child).
    Corrupt(String),
    /// A page mutex was poisoned by a panic in another critical section.
    LockPoisoned(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Corrupt(msg) => write!(f, "{}", msg),
            Error::LockPoisoned(msg) => write!(f, "internal lock poisoned: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}
