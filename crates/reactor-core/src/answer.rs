//! The answer-fill procedure shared by the watcher and the event handler.
//!
//! Given one record: skip it unless it has a question and no answer, ask the
//! model once, then write the answer back with a single conditional update.
//! Model failures become the answer text; store failures are returned.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::ports::{DocumentStore, TextGenerator};
use crate::record::{AnswerUpdate, FillOutcome, Record};

/// Prefix of the answer written when generation fails.
pub const AI_ERROR_PREFIX: &str = "AI Error: ";

/// Why a record was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    NoQuestion,
    /// `question` exists but is not a string.
    QuestionNotText,
    AlreadyAnswered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Answered {
        answer: String,
        generation_failed: bool,
    },
    Skipped(Skip),
    /// A concurrent writer answered between our snapshot and our write.
    LostRace,
}

/// Text produced by the generation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub text: String,
    pub failed: bool,
}

/// Decide whether `record` needs an answer, returning its question if so.
pub fn eligibility(record: &Record) -> Result<&str, Skip> {
    if record.has_answer() {
        return Err(Skip::AlreadyAnswered);
    }
    match record.question() {
        Some(q) => Ok(q),
        None if record.has_question() => Err(Skip::QuestionNotText),
        None => Err(Skip::NoQuestion),
    }
}

pub struct Answerer {
    store: Arc<dyn DocumentStore>,
    generator: Arc<dyn TextGenerator>,
    status: String,
    stamp_server_time: bool,
}

impl Answerer {
    /// `status` is written alongside every answer.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        generator: Arc<dyn TextGenerator>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            store,
            generator,
            status: status.into(),
            stamp_server_time: false,
        }
    }

    /// Also stamp the server's commit time onto each answered record.
    pub fn with_server_timestamp(mut self, stamp: bool) -> Self {
        self.stamp_server_time = stamp;
        self
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Run the full procedure on one record snapshot.
    pub async fn fill(&self, record: &Record) -> Result<Outcome, StoreError> {
        let question = match eligibility(record) {
            Ok(q) => q,
            Err(skip) => {
                debug!(id = %record.id, ?skip, "record not eligible");
                return Ok(Outcome::Skipped(skip));
            }
        };

        info!(id = %record.id, question, "new question detected");
        let generated = self.ask(question).await;

        let update = AnswerUpdate {
            answer: generated.text,
            status: self.status.clone(),
            stamp_server_time: self.stamp_server_time,
        };

        info!(id = %record.id, status = %update.status, "saving answer");
        match self.store.fill_answer(&record.id, &update).await? {
            FillOutcome::Written => {
                info!(id = %record.id, "answer saved");
                Ok(Outcome::Answered {
                    answer: update.answer,
                    generation_failed: generated.failed,
                })
            }
            FillOutcome::AlreadyAnswered => {
                warn!(id = %record.id, "record was answered concurrently, discarding ours");
                Ok(Outcome::LostRace)
            }
        }
    }

    /// Generation step only: one model call, errors folded into the text.
    pub async fn ask(&self, question: &str) -> Generated {
        info!(question, "asking model");
        match self.generator.generate(question).await {
            Ok(text) => Generated {
                text,
                failed: false,
            },
            Err(e) => {
                warn!(error = %e, "generation failed");
                Generated {
                    text: format!("{AI_ERROR_PREFIX}{e}"),
                    failed: true,
                }
            }
        }
    }
}
