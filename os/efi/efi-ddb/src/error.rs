#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum DdbError {
    #[error("bad device tree header: {0}")]
    BadHeader(&'static str),
    /// The header declares more bytes than were actually loaded.
    #[error("incomplete device tree: {declared} bytes declared, {available} loaded")]
    Incomplete { declared: usize, available: usize },
    /// The output buffer is too small; retry with at least `required` bytes.
    #[error("device tree needs {required} bytes, buffer holds {capacity}")]
    NoSpace { required: usize, capacity: usize },
    #[error("malformed device tree: {0}")]
    Malformed(&'static str),
    #[error("overlay target node not found")]
    MissingNode,
    #[error("property name missing from the string table")]
    UnknownString,
}
