use quarry::StatementInspector;

use std::sync::{Arc, Mutex};

/// Records the SQL of every statement without changing it.
#[derive(Debug, Clone, Default)]
pub struct RecordingInspector {
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingInspector {
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<String> {
        self.log.lock().unwrap().last().cloned()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Drains the statements recorded so far.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock().unwrap())
    }
}

impl StatementInspector for RecordingInspector {
    fn inspect(&self, sql: &str) -> Option<String> {
        self.log.lock().unwrap().push(sql.to_string());
        None
    }
}
