pub mod session_id;

pub use session_id::{make_span_with_session_id, session_id_middleware, SessionRequestId};
