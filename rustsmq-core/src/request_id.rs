//! Request identifiers attached to every server response

use base64::Engine;
use std::fmt;
use uuid::Uuid;

/// Response header carrying [`RequestId::id`]
pub const REQUEST_ID_HEADER: &str = "x-rsmq-request-id";
/// Response header carrying [`RequestId::trace`]
pub const TRACE_ID_HEADER: &str = "x-rsmq-id-2";

/// Identifier pair for one request
///
/// `id` is what error bodies and logs quote. `trace` is an opaque base64
/// token clients echo back when reporting problems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId {
    pub id: String,
    pub trace: String,
}

impl RequestId {
    pub fn new() -> Self {
        let id = Uuid::new_v4().simple().to_string().to_uppercase();
        let trace = base64::engine::general_purpose::STANDARD.encode(Uuid::new_v4().as_bytes());
        Self { id, trace }
    }

    /// Header name/value pairs for a response
    pub fn headers(&self) -> [(&'static str, &str); 2] {
        [
            (REQUEST_ID_HEADER, self.id.as_str()),
            (TRACE_ID_HEADER, self.trace.as_str()),
        ]
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
