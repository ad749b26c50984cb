pub mod ack_timeout;
pub mod retention;
