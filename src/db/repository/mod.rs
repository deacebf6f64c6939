pub mod message_repository;
pub mod queue_repository;

pub use message_repository::QueueMessageRepository;
pub use queue_repository::{CreateQueue, QueueRepository};
