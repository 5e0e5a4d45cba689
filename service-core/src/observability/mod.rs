pub mod logging;
pub mod metrics;
pub mod trace_context;

pub use logging::init_tracing;
pub use metrics::{init_metrics, unregistered_metrics_handle};
pub use trace_context::{
    inject_trace_context, TracedClientExt, TracedRequest, REQUEST_ID_HEADER,
    TRACEPARENT_HEADER, TRACESTATE_HEADER,
};
