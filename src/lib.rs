pub mod config;
pub mod db;
pub mod gateway;
pub mod logging;
pub mod tutor;

pub use db::{Ledger, LedgerError};
pub use gateway::{AnthropicGateway, GatewayError, GenerationGateway};
pub use tutor::types::{ChatMessage, FeedbackNote, Level, Role, TutorReply};
pub use tutor::{TurnOutcome, TutorError, TutorSession};
