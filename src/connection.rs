use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Per-client connection state.
#[derive(Debug)]
pub struct ClientState {
    pub id: u64,
    pub name: Option<Vec<u8>>,
    pub db: u8,
    pub authenticated: bool,
    pub should_close: bool,

    // Transaction state
    pub in_multi: bool,
    /// Full command lines, name included, queued since MULTI.
    pub multi_queue: Vec<Vec<Vec<u8>>>,
    /// A queued command failed validation; EXEC must abort.
    pub multi_error: bool,
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientState {
    pub fn new() -> Self {
        ClientState {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            name: None,
            db: 0,
            authenticated: false,
            should_close: false,
            in_multi: false,
            multi_queue: Vec::new(),
            multi_error: false,
        }
    }
}
