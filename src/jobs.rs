// Batch Job Helpers
//
// Every pipeline stage is an independently-triggerable, bounded batch job:
// it processes one page with a hard size limit and returns. All store and
// snapshot I/O runs under a deadline so a timeout is a failure, not a hang.

use crate::error::{OuroborosError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Run a batch job under its configured deadline.
///
/// A timeout maps to a connectivity failure and aborts the run; partial
/// work committed before the deadline stays committed, since every link is
/// an independent single-row update.
pub async fn run_bounded<F, T>(job_name: &str, max_duration: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(max_duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(OuroborosError::Connectivity(format!(
            "{} timed out after {:?}",
            job_name, max_duration
        ))),
    }
}

/// Capped collector for per-item error messages.
///
/// Run summaries report the total failure count but only retain the first
/// N messages, each expected to carry enough context (repo, prediction id)
/// to investigate.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    max_messages: usize,
    total: usize,
    messages: Vec<String>,
}

impl ErrorLog {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages,
            total: 0,
            messages: Vec::new(),
        }
    }

    /// Count an error, retaining its message if under the cap
    pub fn push(&mut self, message: String) {
        self.total += 1;
        if self.messages.len() < self.max_messages {
            self.messages.push(message);
        }
    }

    /// Total errors counted, including ones whose messages were dropped
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Retained messages, oldest first
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<String> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_bounded_passes_result_through() {
        let result = run_bounded("test", Duration::from_secs(5), async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_run_bounded_times_out() {
        let result: Result<()> = run_bounded("slow-job", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, OuroborosError::Connectivity(_)));
        assert!(err.to_string().contains("slow-job"));
    }

    #[tokio::test]
    async fn test_run_bounded_propagates_errors() {
        let result: Result<()> = run_bounded("failing", Duration::from_secs(5), async {
            Err(OuroborosError::Database("boom".to_string()))
        })
        .await;

        assert!(matches!(result.unwrap_err(), OuroborosError::Database(_)));
    }

    #[test]
    fn test_error_log_caps_messages_but_counts_all() {
        let mut log = ErrorLog::new(2);
        for i in 0..5 {
            log.push(format!("error {}", i));
        }

        assert_eq!(log.total(), 5);
        assert_eq!(log.messages().len(), 2);
        assert_eq!(log.messages()[0], "error 0");
        assert_eq!(log.messages()[1], "error 1");
    }

    #[test]
    fn test_error_log_empty() {
        let log = ErrorLog::new(5);
        assert!(log.is_empty());
        assert_eq!(log.total(), 0);
    }
}
