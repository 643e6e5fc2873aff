//! Validation for host configuration and start requests.

use serde::{Deserialize, Serialize};

use crate::config::DeckConfig;
use crate::types::StartRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

impl Validate for DeckConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.terminal.shell.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "terminal.shell.empty",
                message: "terminal shell is empty — sessions cannot be spawned".to_string(),
            });
        }

        if self.terminal.rows == 0 || self.terminal.cols == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "terminal.size.zero",
                message: format!(
                    "terminal geometry {}x{} is invalid — rows and cols must be greater than zero",
                    self.terminal.cols, self.terminal.rows
                ),
            });
        }

        if self.execution.poll_interval_ms == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "execution.poll_interval.zero",
                message: "completion-detection poll interval cannot be 0".to_string(),
            });
        } else if self.execution.poll_interval_ms > 60_000 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "execution.poll_interval.slow",
                message: format!(
                    "poll interval of {}ms means completed executions linger as running",
                    self.execution.poll_interval_ms
                ),
            });
        }

        issues
    }
}

impl Validate for StartRequest {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.task_id.0.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "request.task_id.empty",
                message: "start request has an empty task id".to_string(),
            });
        }

        if self.command.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "request.command.empty",
                message: "start request has an empty command".to_string(),
            });
        }

        issues
    }
}

/// True when no error-level issue is present.
pub fn is_valid(issues: &[ValidationIssue]) -> bool {
    issues
        .iter()
        .all(|issue| issue.level != ValidationLevel::Error)
}
