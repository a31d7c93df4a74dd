use serde::Serialize;
use uuid::Uuid;

use crate::samples::display_name;
use crate::session::{ChatEntry, Session};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DetectionPanel {
    NotAttempted,
    Identified { name: String, analysis: String },
    Unidentified { message: String },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChatPanel {
    Locked { prompt: String },
    Open {
        subject: String,
        entries: Vec<ChatEntry>,
        hint: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SelectedSampleView {
    pub file_name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionView {
    pub id: Uuid,
    /// False when the detection modules failed to load; detect and ask are disabled.
    pub interactive: bool,
    pub detection: DetectionPanel,
    pub chat: ChatPanel,
    pub selected_sample: Option<SelectedSampleView>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderContext<'a> {
    pub module_error: Option<&'a str>,
    pub api_key_missing: bool,
}

pub fn render(session: &Session, ctx: &RenderContext<'_>) -> SessionView {
    let mut warnings = Vec::new();
    if let Some(err) = ctx.module_error {
        warnings.push(format!("Failed to load detection modules: {err}"));
    }
    if ctx.api_key_missing {
        warnings.push(format!("{} not found. Please configure it.", crate::settings::API_KEY_ENV));
    }

    let detection = match &session.detection {
        None => DetectionPanel::NotAttempted,
        Some(d) if d.is_identified() => DetectionPanel::Identified {
            name: d.name.clone(),
            analysis: d.info.clone(),
        },
        Some(_) => DetectionPanel::Unidentified {
            message: "Could not identify the person.".into(),
        },
    };

    let chat = match session.chat_subject() {
        Some(subject) => ChatPanel::Open {
            subject: subject.to_string(),
            hint: session
                .chat_history
                .is_empty()
                .then(|| "Start the conversation by asking a question below.".to_string()),
            entries: session.chat_history.clone(),
        },
        None => ChatPanel::Locked {
            prompt: "Detect a celebrity above to unlock the Q/A chat.".into(),
        },
    };

    SessionView {
        id: session.id,
        interactive: ctx.module_error.is_none(),
        detection,
        chat,
        selected_sample: session.selected_sample.as_ref().map(|f| SelectedSampleView {
            display_name: display_name(f),
            file_name: f.clone(),
        }),
        warnings,
    }
}
