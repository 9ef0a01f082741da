use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::prompts::PromptSource;

/// The request a journal event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSubject {
    pub entity: String,
    pub style_id: String,
    /// Short hex digest of the resolved prompt; the prompt itself stays out
    /// of the journal.
    pub prompt_digest: String,
}

/// One step of a generation request. Serialized with its `type` tag next to
/// the subject fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    GenerationRejected {
        #[serde(flatten)]
        subject: EventSubject,
        error: &'static str,
    },
    GenerationStarted {
        #[serde(flatten)]
        subject: EventSubject,
        provider: String,
        prompt_source: PromptSource,
    },
    GenerationFailed {
        #[serde(flatten)]
        subject: EventSubject,
        error: &'static str,
        message: String,
    },
    ImageStored {
        #[serde(flatten)]
        subject: EventSubject,
        image_url: String,
        bytes: usize,
    },
    CatalogSaved {
        #[serde(flatten)]
        subject: EventSubject,
        image_url: String,
    },
}

impl GenerationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GenerationRejected { .. } => "generation_rejected",
            Self::GenerationStarted { .. } => "generation_started",
            Self::GenerationFailed { .. } => "generation_failed",
            Self::ImageStored { .. } => "image_stored",
            Self::CatalogSaved { .. } => "catalog_saved",
        }
    }
}

#[derive(Serialize)]
struct JournalLine<'a> {
    #[serde(flatten)]
    event: &'a GenerationEvent,
    instance: &'a str,
    ts: String,
}

/// Append-only generation journal, one compact JSON object per line.
/// Every line carries the writer's `instance` id and an RFC 3339 `ts`.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<Journal>,
}

#[derive(Debug)]
struct Journal {
    path: PathBuf,
    instance: String,
    append: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, instance: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Journal {
                path: path.into(),
                instance: instance.into(),
                append: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn instance(&self) -> &str {
        &self.inner.instance
    }

    pub fn emit(&self, event: &GenerationEvent) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(&JournalLine {
            event,
            instance: &self.inner.instance,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        })?;
        line.push('\n');

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Concurrent requests share one file; whole lines only.
        let _guard = self
            .inner
            .append
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .with_context(|| format!("failed to append to {}", self.inner.path.display()))
    }
}
