//! Shared configuration for the watcher and the event handler.

pub const DEFAULT_DATABASE: &str = "(default)";
pub const DEFAULT_COLLECTION: &str = "chatbot";
pub const DEFAULT_REGION: &str = "asia-south1";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Status written by the long-running watcher.
pub const WATCHER_STATUS: &str = "completed";
/// Status written by the trigger-driven event handler.
pub const HANDLER_STATUS: &str = "cloud_handled";

/// Which project, database, collection and model to work against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactorConfig {
    pub project_id: String,
    pub database: String,
    pub collection: String,
    pub region: String,
    pub model: String,
}

impl ReactorConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database: DEFAULT_DATABASE.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            region: DEFAULT_REGION.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// `projects/{project}/databases/{database}`
    pub fn database_path(&self) -> String {
        format!("projects/{}/databases/{}", self.project_id, self.database)
    }

    /// `projects/{project}/databases/{database}/documents`
    pub fn documents_path(&self) -> String {
        format!("{}/documents", self.database_path())
    }

    /// Full resource name of one document in the watched collection.
    pub fn document_name(&self, id: &str) -> String {
        format!("{}/{}/{}", self.documents_path(), self.collection, id)
    }
}
