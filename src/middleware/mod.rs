mod logging;
mod metrics;

pub use logging::RequestLogging;
pub use metrics::MetricsMiddleware;
