pub mod consumer;
pub mod handler;
pub mod message;
pub mod publisher;
