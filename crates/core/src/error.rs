use thiserror::Error;

/// Errors returned by task queue operations and configuration loading.
#[derive(Error, Debug)]
pub enum TimedTaskError {
    #[error("not found item in queue: {0}")]
    NotFound(String),

    #[error("{queue} {op} failed, no items enqueued")]
    EmptyQueue { queue: String, op: &'static str },

    #[error("task already enqueued: {0}")]
    AlreadyEnqueued(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}

/// Outcome of a single task execution that did not succeed.
///
/// Both variants are recoverable: the dispatch layer logs them and keeps
/// scheduling.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("{task} failed: {source}")]
    Failed {
        task: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{task} panicked: {message}")]
    Panicked { task: String, message: String },
}

impl TaskError {
    /// Identity string of the task that produced this error.
    pub fn task(&self) -> &str {
        match self {
            TaskError::Failed { task, .. } | TaskError::Panicked { task, .. } => task,
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panicked { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_queue_message_names_queue_and_op() {
        let err = TimedTaskError::EmptyQueue {
            queue: "TQ".to_string(),
            op: "remove",
        };
        assert_eq!(err.to_string(), "TQ remove failed, no items enqueued");
    }

    #[test]
    fn task_error_accessors() {
        let failed = TaskError::Failed {
            task: "Task[a at tick:1]".to_string(),
            source: anyhow::anyhow!("boom"),
        };
        assert_eq!(failed.task(), "Task[a at tick:1]");
        assert!(!failed.is_panic());
        assert!(failed.to_string().contains("boom"));

        let panicked = TaskError::Panicked {
            task: "Task[b at tick:2]".to_string(),
            message: "index out of bounds".to_string(),
        };
        assert!(panicked.is_panic());
    }
}
