//! Database rows and queue envelope types.

pub mod queue;
pub mod queue_message;

pub use self::queue::*;
pub use self::queue_message::*;
