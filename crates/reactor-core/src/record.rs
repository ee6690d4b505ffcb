//! Question/answer records and the change events that carry them.

use crate::value::{Document, FieldValue, Fields};

pub const QUESTION_FIELD: &str = "question";
pub const ANSWER_FIELD: &str = "answer";
pub const STATUS_FIELD: &str = "status";
/// Server-assigned time of the answer write.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// One document of the watched collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub id: String,
    pub fields: Fields,
    /// Changes when the document is deleted and created again under the same id.
    pub create_time: Option<String>,
    pub update_time: Option<String>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Build a record from a REST/trigger document; the id is the last segment of its name.
    pub fn from_document(doc: Document) -> Self {
        Self {
            id: document_id(&doc.name).to_string(),
            fields: doc.fields,
            create_time: doc.create_time,
            update_time: doc.update_time,
        }
    }

    /// The question text, if the field is present and holds a string.
    pub fn question(&self) -> Option<&str> {
        self.fields.get(QUESTION_FIELD).and_then(FieldValue::as_str)
    }

    pub fn has_question(&self) -> bool {
        self.fields.contains_key(QUESTION_FIELD)
    }

    pub fn answer(&self) -> Option<&str> {
        self.fields.get(ANSWER_FIELD).and_then(FieldValue::as_str)
    }

    /// Presence only: an `answer` of any type (even null) marks the record answered.
    pub fn has_answer(&self) -> bool {
        self.fields.contains_key(ANSWER_FIELD)
    }

    pub fn status(&self) -> Option<&str> {
        self.fields.get(STATUS_FIELD).and_then(FieldValue::as_str)
    }

    /// A question is waiting and nobody has answered it yet.
    pub fn is_pending(&self) -> bool {
        self.question().is_some() && !self.has_answer()
    }
}

/// Final segment of a slash-delimited document path.
pub fn document_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One notification from a change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub record: Record,
}

impl ChangeEvent {
    pub fn added(record: Record) -> Self {
        Self {
            kind: ChangeKind::Added,
            record,
        }
    }
}

/// The single write the answer-fill procedure issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerUpdate {
    pub answer: String,
    pub status: String,
    /// Also set [`TIMESTAMP_FIELD`] to the server's commit time.
    pub stamp_server_time: bool,
}

/// Result of a conditional answer write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    Written,
    /// Another writer set `answer` first; nothing was written.
    AlreadyAnswered,
}
