//! Recording observers for tests.

use std::sync::Mutex;

use devbox_core::NoticeSink;

use crate::dispatch::NotificationHandler;

/// Records observer calls as `"refetch"`, `"done"` and `"waiting:<id>"`.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl NotificationHandler for Recorder {
    fn on_refetch(&self) {
        self.push("refetch".into());
    }

    fn on_waiting(&self, container_id: &str) {
        self.push(format!("waiting:{container_id}"));
    }

    fn on_done(&self) {
        self.push("done".into());
    }
}

/// Records notices as `"<level>: <text>"`.
#[derive(Default)]
pub struct RecordingNotices {
    shown: Mutex<Vec<String>>,
}

impl RecordingNotices {
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.shown.lock().unwrap())
    }

    fn push(&self, level: &str, text: &str) {
        self.shown.lock().unwrap().push(format!("{level}: {text}"));
    }
}

impl NoticeSink for RecordingNotices {
    fn info(&self, text: &str) {
        self.push("info", text);
    }

    fn success(&self, text: &str) {
        self.push("success", text);
    }

    fn warn(&self, text: &str) {
        self.push("warn", text);
    }
}
