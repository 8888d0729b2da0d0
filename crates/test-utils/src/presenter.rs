use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use toolflow::present::{Presenter, RenderPayload};

/// One `present` call.
#[derive(Debug, Clone)]
pub struct Presented {
    pub tool_name: String,
    pub payloads: BTreeMap<String, RenderPayload>,
}

/// Presenter that keeps everything it was shown.
#[derive(Debug, Clone, Default)]
pub struct RecordingPresenter {
    seen: Arc<Mutex<Vec<Presented>>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Arc<Mutex<Vec<Presented>>> {
        Arc::clone(&self.seen)
    }
}

impl Presenter for RecordingPresenter {
    fn present(&mut self, tool_name: &str, payloads: BTreeMap<String, RenderPayload>) {
        self.seen.lock().unwrap().push(Presented {
            tool_name: tool_name.to_string(),
            payloads,
        });
    }
}
