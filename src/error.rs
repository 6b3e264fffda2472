//! Error taxonomy for pipeline stages.
//!
//! Conflicts on natural keys are not errors (they surface as "skipped"
//! counts), and per-document analysis failures are recovered inside the
//! enricher, so everything here is fatal for the stage that returns it.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("failed to parse raw document {raw_id}: {reason}")]
    Parse { raw_id: i64, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("job cancelled")]
    Cancelled,

    #[error("job deadline exceeded")]
    DeadlineExceeded,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Transport-class failure: network, non-200, or malformed body.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Transport(_) | Self::UpstreamStatus { .. } => true,
            Self::Stage { source, .. } => source.is_transport(),
            _ => false,
        }
    }

    pub fn is_parse(&self) -> bool {
        match self {
            Self::Parse { .. } => true,
            Self::Stage { source, .. } => source.is_parse(),
            _ => false,
        }
    }

    /// Stopped by the caller (signal or deadline) rather than by a fault.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Cancelled | Self::DeadlineExceeded => true,
            Self::Stage { source, .. } => source.is_interrupted(),
            _ => false,
        }
    }

    /// Name of the stage that failed, when wrapped by the orchestrator.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Self::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }

    pub(crate) fn in_stage(self, stage: &'static str) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Transport(format!("malformed JSON: {}", e))
    }
}
