use chrono::{DateTime, FixedOffset};
use thiserror::Error;
use uuid::Uuid;

use crate::actions::Action;
use crate::logs::{self, LogEntry, SystemStatus};
use crate::models::Modules;
use crate::preprocess::PreprocessError;
use crate::samples::{SampleError, SampleLibrary};
use crate::session::{Detection, Session, SessionStore, UNKNOWN_NAME};
use crate::source::{resolve_active_image, Upload};
use crate::view::{render, RenderContext, SessionView};

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("session not found")]
    SessionNotFound,
    #[error("detection modules unavailable: {0}")]
    ModulesUnavailable(String),
    #[error("no active image: upload a photo or select a sample")]
    NoActiveImage,
    #[error(transparent)]
    Sample(#[from] SampleError),
    #[error("preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("detection failed: {0}")]
    Detection(String),
    #[error("question must not be empty")]
    EmptyQuestion,
    #[error("chat is locked until a celebrity is identified")]
    ChatLocked,
    #[error("question answering failed: {0}")]
    Qa(String),
}

/// Runs user actions against one session at a time.
pub struct Controller {
    pub store: SessionStore,
    pub modules: Modules,
    pub samples: SampleLibrary,
    pub api_key_missing: bool,
}

impl Controller {
    pub fn new(modules: Modules, samples: SampleLibrary, api_key_missing: bool) -> Self {
        Self { store: SessionStore::default(), modules, samples, api_key_missing }
    }

    fn module_error(&self) -> Option<&str> {
        self.modules.capabilities().err()
    }

    async fn session(&self, id: Uuid) -> Result<Session, ActionError> {
        self.store.get(id).await.ok_or(ActionError::SessionNotFound)
    }

    async fn dispatch(&self, id: Uuid, action: Action) -> Result<Session, ActionError> {
        self.store.dispatch(id, action).await.ok_or(ActionError::SessionNotFound)
    }

    pub async fn view(&self, id: Uuid) -> Result<SessionView, ActionError> {
        let session = self.session(id).await?;
        let ctx = RenderContext { module_error: self.module_error(), api_key_missing: self.api_key_missing };
        Ok(render(&session, &ctx))
    }

    pub async fn logs(&self, id: Uuid, now: DateTime<FixedOffset>) -> Result<Vec<LogEntry>, ActionError> {
        let session = self.session(id).await?;
        let status = SystemStatus { module_error: self.module_error(), api_key_missing: self.api_key_missing };
        Ok(logs::collect(&status, &session, now))
    }

    pub async fn select_sample(&self, id: Uuid, file_name: &str) -> Result<Session, ActionError> {
        self.samples.resolve(file_name)?;
        tracing::info!(session = %id, sample = file_name, "sample selected");
        self.dispatch(id, Action::SelectSample { path: file_name.to_string() }).await
    }

    pub async fn clear_chat(&self, id: Uuid) -> Result<Session, ActionError> {
        self.dispatch(id, Action::ClearChat).await
    }

    pub async fn reset(&self, id: Uuid) -> Result<Session, ActionError> {
        self.dispatch(id, Action::Reset).await
    }

    /// Resolves the active image, preprocesses it and asks the detector.
    /// Nothing is written until the detector answered; the upload's effect on
    /// the sample selection is stored together with the detection.
    pub async fn detect(&self, id: Uuid, upload: Option<Upload>) -> Result<Session, ActionError> {
        let caps = self
            .modules
            .capabilities()
            .map_err(|e| ActionError::ModulesUnavailable(e.to_string()))?
            .clone();
        let session = self.session(id).await?;
        let uploaded = upload.is_some();

        let active = resolve_active_image(upload, session.selected_sample.as_deref(), &self.samples)
            .await
            .ok_or(ActionError::NoActiveImage)?;
        tracing::info!(session = %id, origin = ?active.origin, image = active.image.name(), "detecting");

        let preprocessor = caps.preprocessor.clone();
        let image = active.image;
        let processed = tokio::task::spawn_blocking(move || preprocessor.process(&image))
            .await
            .map_err(|e| ActionError::Detection(format!("preprocessing task: {e}")))?
            .inspect_err(|_| {
                metrics::counter!("celebqa_detections_total", "outcome" => "failed").increment(1);
            })?;

        let identification = match caps.detector.identify(&processed.bytes).await {
            Ok(i) => i,
            Err(e) => {
                tracing::error!(session = %id, error = %e, "detection failed");
                metrics::counter!("celebqa_detections_total", "outcome" => "failed").increment(1);
                return Err(ActionError::Detection(e.to_string()));
            }
        };

        let name = match identification.name.trim() {
            "" => UNKNOWN_NAME.to_string(),
            n => n.to_string(),
        };
        let detection = Detection { name, info: identification.text };
        let outcome = if detection.is_identified() { "identified" } else { "unknown" };
        metrics::counter!("celebqa_detections_total", "outcome" => outcome).increment(1);
        tracing::info!(session = %id, name = %detection.name, face = ?processed.face, "detection finished");

        let mut actions = Vec::with_capacity(2);
        if uploaded {
            actions.push(Action::UploadReceived);
        }
        actions.push(Action::Detected(detection));
        self.store.dispatch_all(id, actions).await.ok_or(ActionError::SessionNotFound)
    }

    /// Asks about the identified celebrity. Appends the question and the answer
    /// only when the QA call succeeded.
    pub async fn ask(&self, id: Uuid, question: &str) -> Result<Session, ActionError> {
        let caps = self
            .modules
            .capabilities()
            .map_err(|e| ActionError::ModulesUnavailable(e.to_string()))?
            .clone();
        let session = self.session(id).await?;
        let question = question.trim();
        if question.is_empty() {
            return Err(ActionError::EmptyQuestion);
        }
        let subject = session.chat_subject().ok_or(ActionError::ChatLocked)?;

        let answer = match caps.qa.ask_about_celebrity(subject, question).await {
            Ok(a) => a,
            Err(e) => {
                tracing::error!(session = %id, error = %e, "question answering failed");
                metrics::counter!("celebqa_questions_total", "outcome" => "failed").increment(1);
                return Err(ActionError::Qa(e.to_string()));
            }
        };
        metrics::counter!("celebqa_questions_total", "outcome" => "answered").increment(1);
        self.dispatch(id, Action::Answered { question: question.to_string(), answer }).await
    }
}
