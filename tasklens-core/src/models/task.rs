use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::TaskLensError;

/// Lifecycle state of a task, stored as text in the `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "todo")]
    Todo,
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "done")]
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in progress",
            TaskStatus::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskLensError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "in progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            other => Err(TaskLensError::InvalidStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = TaskLensError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A task row as returned to clients. The embedding column is never selected.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: i32,
    pub title: String,
    pub description: String,
    #[sqlx(try_from = "String")]
    pub status: TaskStatus,
}

/// Body of `POST /tasks`. Fields are optional so missing ones can be reported
/// as a validation error instead of a deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
}

/// A `NewTask` that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidTask {
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskValidationError {
    #[error("Missing required fields")]
    MissingFields,

    #[error("Invalid status value")]
    InvalidStatus,

    #[error("Title too long")]
    TitleTooLong,

    #[error("Description too long")]
    DescriptionTooLong,
}

impl NewTask {
    /// Check presence first, then status, then lengths (in characters).
    pub fn validate(
        &self,
        max_title_length: usize,
        max_description_length: usize,
    ) -> Result<ValidTask, TaskValidationError> {
        let (title, description, status) = match (
            non_empty(&self.title),
            non_empty(&self.description),
            non_empty(&self.status),
        ) {
            (Some(t), Some(d), Some(s)) => (t, d, s),
            _ => return Err(TaskValidationError::MissingFields),
        };

        let status: TaskStatus = status
            .parse()
            .map_err(|_| TaskValidationError::InvalidStatus)?;

        if title.chars().count() > max_title_length {
            return Err(TaskValidationError::TitleTooLong);
        }
        if description.chars().count() > max_description_length {
            return Err(TaskValidationError::DescriptionTooLong);
        }

        Ok(ValidTask {
            title: title.to_string(),
            description: description.to_string(),
            status,
        })
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}
