pub mod answer;
pub mod config;
pub mod error;
pub mod ports;
pub mod record;
pub mod value;

pub use answer::{AI_ERROR_PREFIX, Answerer, Generated, Outcome, Skip, eligibility};
pub use config::ReactorConfig;
pub use error::{BoxError, GenerateError, StoreError};
pub use ports::{ChangeFeed, DocumentStore, FEED_CAPACITY, Subscription, TextGenerator};
pub use record::{AnswerUpdate, ChangeEvent, ChangeKind, FillOutcome, Record, document_id};
pub use value::{Document, FieldValue, Fields};
