use chrono::Utc;
use std::sync::{Arc, Mutex};

use crate::models::{LogLevel, LogLine};

/// 单次运行的日志捕获, 同时转发到 tracing
#[derive(Debug, Clone)]
pub struct RunLog {
    job_id: String,
    company: String,
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl RunLog {
    pub fn new(job_id: impl Into<String>, company: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            company: company.into(),
            lines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(job_id = %self.job_id, company = %self.company, "{}", message);
        self.push(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(job_id = %self.job_id, company = %self.company, "{}", message);
        self.push(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(job_id = %self.job_id, company = %self.company, "{}", message);
        self.push(LogLevel::Error, message);
    }

    fn push(&self, level: LogLevel, message: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.push(LogLine {
            at: Utc::now(),
            level,
            message,
        });
    }

    pub fn snapshot(&self) -> Vec<LogLine> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_same_buffer() {
        let log = RunLog::new("job-1", "Das Dach");
        let handle = log.clone();
        log.info("fetching documents");
        handle.error("session lost");

        let lines = log.snapshot();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].level, LogLevel::Error);
        assert!(lines[1].to_string().ends_with("ERROR session lost"));
    }
}
