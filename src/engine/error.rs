use ulid::Ulid;

#[derive(Debug, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed input: identical endpoints, start after end, bad MAC, empty name.
    Validation(&'static str),
    /// Referenced entity does not exist. Carries the role and the id looked up.
    NotFound(&'static str, Ulid),
    /// Device exists but is not in the `installed` state.
    Precondition(&'static str, Ulid),
    /// Proposed interval overlaps an existing active one (the offender's id).
    Conflict(Ulid),
    /// Uniqueness violated: MAC address, type/model name, username.
    AlreadyExists(&'static str),
    /// The entity is still referenced and cannot be deleted.
    InUse(&'static str, Ulid),
    LimitExceeded(&'static str),
    Wal(String),
}

impl EngineError {
    /// Stable machine-checkable discriminator, used in API bodies and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(..) => "not-found",
            EngineError::Precondition(..) => "precondition",
            EngineError::Conflict(_) => "conflict",
            EngineError::AlreadyExists(_) => "already-exists",
            EngineError::InUse(..) => "in-use",
            EngineError::LimitExceeded(_) => "limit",
            EngineError::Wal(_) => "internal",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::NotFound(what, id) => write!(f, "{what} not found: {id}"),
            EngineError::Precondition(what, id) => {
                write!(f, "{what} {id} is not installed")
            }
            EngineError::Conflict(id) => {
                write!(f, "dates overlap an existing connection: {id}")
            }
            EngineError::AlreadyExists(what) => write!(f, "{what} already in use"),
            EngineError::InUse(what, id) => {
                write!(f, "cannot delete {what} {id}: still referenced")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
