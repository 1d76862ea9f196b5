//! Request correlation for logs
//!
//! Every request gets a short trace id; entry and exit are logged as one
//! line each so a request can be followed with a single grep.

mod trace_context;

pub use trace_context::{generate_trace_id, RequestSpan, TraceContext};
