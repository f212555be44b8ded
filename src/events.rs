use std::sync::mpsc::{channel, Receiver, Sender};

/// Engine-to-UI notifications. Workers never touch UI state directly; the
/// UI-owning thread drains the receiver and renders.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Log { task_id: String, message: String },
    TitleResolved { task_id: String, title: String },
    Progress { task_id: String, video_url: String, percent: u8 },
    /// Terminal summary. `error` is set when the job never produced a video
    /// list (resolution failure); a clean success has neither failures nor
    /// an error.
    Finished {
        task_id: String,
        failed_video_urls: Vec<String>,
        error: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<EngineEvent>,
}

impl EventSender {
    pub fn channel() -> (EventSender, Receiver<EngineEvent>) {
        let (tx, rx) = channel();
        (EventSender { tx }, rx)
    }

    /// A sender whose events go nowhere, for headless use and tests.
    pub fn disconnected() -> EventSender {
        let (tx, _rx) = channel();
        EventSender { tx }
    }

    pub fn emit(&self, event: EngineEvent) {
        // A dropped receiver just means nobody is watching.
        let _ = self.tx.send(event);
    }

    pub fn log(&self, task_id: &str, message: impl Into<String>) {
        self.emit(EngineEvent::Log {
            task_id: task_id.to_string(),
            message: message.into(),
        });
    }
}
