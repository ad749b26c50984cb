pub use crate::http::build_metrics_router;
pub use crate::http::build_router;
pub use crate::http::ApiDoc;
pub use crate::tasks::ack_timeout::{ack_timeout_loop, sweep_ack_timeouts};
pub use crate::tasks::retention::log_retention_loop;
