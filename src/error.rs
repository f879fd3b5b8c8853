#[derive(Debug, thiserror::Error)]
pub enum KvdisError {
    #[error("ERR {0}")]
    Generic(String),

    #[error("ERR command params error")]
    CmdParams,

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArgCount(String),

    #[error("ERR syntax error")]
    SyntaxError,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR key cannot be empty")]
    KeyEmpty,

    #[error("ERR key or field cannot be empty")]
    KeyOrFieldEmpty,

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR raw key type not match")]
    TypeNotMatch,

    #[error("ERR invalid key meta")]
    InvalidMeta,

    #[error("ERR index out of range")]
    IndexOutOfRange,

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("BUSYKEY key is deleting, retry later")]
    KeyBusy,

    /// A concurrent transaction committed a write to a key in our write set.
    /// Retried internally by `Store::run_in_txn`.
    #[error("ERR write conflict on commit")]
    WriteConflict,

    #[error("ERR transaction commit conflict after {0} retries")]
    CommitConflict(usize),

    #[error("ERR snapshot at {read_ts} is older than gc safe point {safe_point}")]
    SnapshotTooOld { read_ts: u64, safe_point: u64 },

    #[error("ERR storage error: {0}")]
    Storage(String),

    #[error("ERR MULTI calls can not be nested")]
    NestedMulti,

    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,

    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,

    #[error("EXECABORT Transaction discarded because of previous errors.")]
    ExecAbort,

    #[error("NOAUTH Authentication required.")]
    NoAuth,

    #[error("ERR invalid password")]
    InvalidPassword,

    #[error("ERR DB index is out of range")]
    InvalidDb,

    #[error("ERR unknown command '{0}', with args beginning with: {1}")]
    UnknownCommand(String, String),

    #[error("ERR {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl KvdisError {
    pub fn to_resp_error(&self) -> String {
        format!("{self}")
    }

    /// Whether a whole transaction body may be re-run after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KvdisError::WriteConflict)
    }
}

pub type KvdisResult<T> = Result<T, KvdisError>;
