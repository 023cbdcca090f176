use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 跳过原因 (业务规则, 不算错误)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    ZeroAmount,
    MissingDeliveryDate,
    InvalidDeliveryDate,
    StaleDocument { age_days: i64, max_age_days: i64 },
    AlreadyInvoiced { invoice_number: Option<String> },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ZeroAmount => f.write_str("zero amount"),
            SkipReason::MissingDeliveryDate => f.write_str("missing delivery date"),
            SkipReason::InvalidDeliveryDate => f.write_str("invalid delivery date"),
            SkipReason::StaleDocument { age_days, max_age_days } => {
                write!(f, "stale document ({age_days} days old, limit {max_age_days})")
            }
            SkipReason::AlreadyInvoiced { invoice_number: Some(n) } => {
                write!(f, "already invoiced ({n})")
            }
            SkipReason::AlreadyInvoiced { invoice_number: None } => f.write_str("already invoiced"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SucceededEntry {
    pub document_id: String,
    pub invoice_number: String,
    pub auth_code: String,
    pub rate: BigDecimal,
    pub withholding: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub document_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub document_id: String,
    /// 完整错误信息 (含 cause 链)
    pub error: String,
    /// 致命错误: 触发整批中止
    pub fatal: bool,
}

impl FailedEntry {
    pub fn first_line(&self) -> &str {
        self.error.lines().next().unwrap_or_default()
    }
}

/// webhook 中的计数摘要
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_attempted: usize,
}

/// 单次批处理的运行报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub company: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total: usize,
    pub succeeded: Vec<SucceededEntry>,
    pub skipped: Vec<SkippedEntry>,
    pub failed: Vec<FailedEntry>,
    pub not_attempted: Vec<String>,
    /// 因致命错误提前终止
    pub aborted: bool,
    /// 超过运行时长上限
    pub timed_out: bool,
}

/// 失败数不超过该值时输出完整错误详情
const FULL_DETAIL_MAX_FAILURES: usize = 3;

impl RunReport {
    pub fn new(company: impl Into<String>, total: usize) -> Self {
        Self {
            company: company.into(),
            started_at: Utc::now(),
            finished_at: None,
            total,
            succeeded: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            not_attempted: Vec::new(),
            aborted: false,
            timed_out: false,
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total: self.total,
            succeeded: self.succeeded.len(),
            failed: self.failed.len(),
            skipped: self.skipped.len(),
            not_attempted: self.not_attempted.len(),
        }
    }

    pub fn success_percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.succeeded.len() as f64 / self.total as f64 * 100.0
    }

    pub fn has_fatal_failure(&self) -> bool {
        self.failed.iter().any(|f| f.fatal)
    }

    /// 人类可读的运行报告
    pub fn render(&self) -> Vec<String> {
        let rule = "=".repeat(50);
        let thin = "-".repeat(40);
        let mut out = vec![
            rule.clone(),
            format!("RUN REPORT - {}", self.company),
            rule.clone(),
            format!("Total documents: {}", self.total),
            format!("Succeeded: {}", self.succeeded.len()),
            format!("Skipped: {}", self.skipped.len()),
            format!("Failed: {}", self.failed.len()),
        ];
        if !self.not_attempted.is_empty() {
            out.push(format!("Not attempted: {}", self.not_attempted.len()));
        }
        if self.total > 0 {
            out.push(format!("Success rate: {:.1}%", self.success_percentage()));
        }
        if self.aborted {
            out.push("Run aborted after a fatal failure".to_string());
        }
        if self.timed_out {
            out.push("Run stopped: time limit reached".to_string());
        }

        if !self.succeeded.is_empty() {
            out.push(String::new());
            out.push("SUCCEEDED:".to_string());
            out.push(thin.clone());
            for (i, s) in self.succeeded.iter().enumerate() {
                out.push(format!(
                    "{:2}. {} - invoice {} CAE {}",
                    i + 1,
                    s.document_id,
                    s.invoice_number,
                    s.auth_code
                ));
            }
        }

        if !self.skipped.is_empty() {
            out.push(String::new());
            out.push("SKIPPED:".to_string());
            out.push(thin.clone());
            for (i, s) in self.skipped.iter().enumerate() {
                out.push(format!("{:2}. {} - {}", i + 1, s.document_id, s.reason));
            }
        }

        if !self.failed.is_empty() {
            out.push(String::new());
            out.push("FAILED:".to_string());
            out.push(thin.clone());
            for (i, f) in self.failed.iter().enumerate() {
                let tag = if f.fatal { "FATAL" } else { "ERROR" };
                out.push(format!("{:2}. {} - {}", i + 1, f.document_id, tag));
                out.push(format!("    Error: {}", f.first_line()));
            }

            if self.failed.len() <= FULL_DETAIL_MAX_FAILURES {
                out.push(String::new());
                out.push("FULL ERROR DETAILS:".to_string());
                out.push(thin.clone());
                for (i, f) in self.failed.iter().enumerate() {
                    out.push(format!("Error #{} - {}:", i + 1, f.document_id));
                    out.extend(f.error.lines().map(str::to_string));
                    out.push(thin.clone());
                }
            }
        }

        if !self.not_attempted.is_empty() {
            out.push(String::new());
            out.push("NOT ATTEMPTED:".to_string());
            out.push(thin.clone());
            for (i, id) in self.not_attempted.iter().enumerate() {
                out.push(format!("{:2}. {}", i + 1, id));
            }
        }

        out.push(String::new());
        out.push(format!("Started: {}", self.started_at.format("%Y-%m-%d %H:%M:%S")));
        if let Some(end) = self.finished_at {
            out.push(format!("Finished: {}", end.format("%Y-%m-%d %H:%M:%S")));
            let secs = (end - self.started_at).num_milliseconds() as f64 / 1000.0;
            out.push(format!("Elapsed: {secs:.1}s"));
        }
        out.push(rule);
        out
    }
}
