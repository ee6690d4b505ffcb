use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use reactor_core::ReactorConfig;
use reactor_core::config::{DEFAULT_COLLECTION, DEFAULT_DATABASE, DEFAULT_MODEL, DEFAULT_REGION};

#[derive(Parser)]
#[command(
    name = "reactor",
    about = "Answer questions written to a Firestore collection with Gemini.",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub global: Global,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
pub struct Global {
    /// Google Cloud project; falls back to the credentials' project
    #[arg(long, global = true, env = "GOOGLE_CLOUD_PROJECT")]
    pub project: Option<String>,

    /// Firestore database id
    #[arg(long, global = true, env = "REACTOR_DATABASE", default_value = DEFAULT_DATABASE)]
    pub database: String,

    /// Collection holding the question documents
    #[arg(long, global = true, default_value = DEFAULT_COLLECTION)]
    pub collection: String,

    /// Vertex AI region
    #[arg(long, global = true, env = "REACTOR_REGION", default_value = DEFAULT_REGION)]
    pub region: String,

    /// Gemini model id
    #[arg(long, global = true, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Service account key file
    #[arg(long, global = true, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    /// Pre-issued OAuth access token; takes precedence over --credentials
    #[arg(long, global = true, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Use the Generative Language API with this key instead of Vertex AI
    #[arg(long, global = true, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Firestore REST endpoint, e.g. an emulator at http://localhost:8080/v1
    #[arg(long, global = true, env = "FIRESTORE_URL")]
    pub firestore_url: Option<String>,

    /// Per-request timeout for model calls
    #[arg(long, global = true)]
    pub generate_timeout_secs: Option<u64>,

    /// Per-request timeout for Firestore calls
    #[arg(long, global = true)]
    pub store_timeout_secs: Option<u64>,
}

impl Global {
    pub fn config(&self, project_id: String) -> ReactorConfig {
        ReactorConfig {
            project_id,
            database: self.database.clone(),
            collection: self.collection.clone(),
            region: self.region.clone(),
            model: self.model.clone(),
        }
    }

    pub fn generate_timeout(&self) -> Option<Duration> {
        self.generate_timeout_secs.map(Duration::from_secs)
    }

    pub fn store_timeout(&self) -> Option<Duration> {
        self.store_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Watch the collection and answer every new question until Ctrl-C
    Watch {
        /// How often to re-list the collection
        #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
        poll_interval_ms: u64,
    },

    /// Handle one document-write event payload
    Handle {
        /// Payload file, or `-` for stdin
        #[arg(long)]
        payload: Option<PathBuf>,
    },

    /// Ask the model one question and print the reply
    Ask { question: String },
}
