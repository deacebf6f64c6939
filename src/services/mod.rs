pub mod delivery;
pub mod init;
pub mod memory_backend;
pub mod notification_queue;
pub mod publisher;
pub mod queue_backend;
pub mod sqlite_backend;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;
