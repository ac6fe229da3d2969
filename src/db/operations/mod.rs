pub mod goals;
pub mod messages;
pub mod sessions;
pub mod stats;
pub mod vocabulary;
