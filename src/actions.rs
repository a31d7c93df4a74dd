//! State transitions for a session.
//!
//! Every user-visible change goes through [`apply`], which takes a snapshot and
//! returns a new one. Handlers that talk to external capabilities build the
//! [`Action`] first and only dispatch it once the call succeeded, so a failed
//! call never touches stored state.

use crate::session::{ChatEntry, Detection, Role, Session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A gallery entry was picked. `path` is relative to the samples directory.
    SelectSample { path: String },
    /// A fresh upload arrived; it supersedes any sample selection.
    UploadReceived,
    Detected(Detection),
    Answered { question: String, answer: String },
    ClearChat,
    /// "Refresh": drop detection, chat and sample selection.
    Reset,
}

pub fn apply(session: &Session, action: Action) -> Session {
    let mut next = session.clone();
    match action {
        Action::SelectSample { path } => {
            next.selected_sample = Some(path);
        }
        Action::UploadReceived => {
            next.selected_sample = None;
        }
        Action::Detected(detection) => {
            next.detection = Some(detection);
        }
        Action::Answered { question, answer } => {
            next.chat_history.push(ChatEntry { role: Role::User, message: question });
            next.chat_history.push(ChatEntry { role: Role::Ai, message: answer });
        }
        Action::ClearChat => {
            next.chat_history = Vec::new();
        }
        Action::Reset => {
            next.chat_history = Vec::new();
            next.detection = None;
            next.selected_sample = None;
        }
    }
    next
}
