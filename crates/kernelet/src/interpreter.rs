//! Execution-engine seam.
//!
//! The engine behind this trait owns all execution semantics; the dispatch
//! core only translates between protocol content and these calls. Replies
//! are open JSON (`serde_json::Value`) because their schemas belong to the
//! implementation language, not to the dispatch engine.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::output::KernelIo;

/// Failure surfaced by the execution engine.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct InterpreterError {
    message: String,
}

impl InterpreterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_access_type() -> String {
    "tail".to_string()
}

/// Content of an `execute_request`, with protocol defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub silent: bool,
    /// Forced to `false` by the dispatcher when `silent` is set.
    #[serde(default = "default_true")]
    pub store_history: bool,
    #[serde(default)]
    pub user_expressions: Option<Value>,
    #[serde(default = "default_true")]
    pub allow_stdin: bool,
    #[serde(default)]
    pub stop_on_error: bool,
}

/// `history_request` arguments, bundled before delegation.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryArguments {
    #[serde(default = "default_access_type")]
    pub hist_access_type: String,
    #[serde(default)]
    pub output: bool,
    #[serde(default)]
    pub raw: bool,
    #[serde(default)]
    pub session: i64,
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub stop: i64,
    #[serde(default)]
    pub n: i64,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub unique: bool,
}

/// One operation per request type the dispatch core routes.
///
/// `execute` receives a [`KernelIo`] handle so a running interpreter can
/// broadcast output and request stdin input mid-execution, stamped with the
/// triggering request's context.
#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Run code. The reply content must carry a `status` field
    /// (`"ok"`/`"error"`); anything else is treated as an error status.
    async fn execute(
        &self,
        request: ExecuteRequest,
        io: &KernelIo,
    ) -> Result<Value, InterpreterError>;

    async fn complete(&self, code: &str, cursor_pos: i64) -> Result<Value, InterpreterError>;

    async fn inspect(
        &self,
        code: &str,
        cursor_pos: i64,
        detail_level: i64,
    ) -> Result<Value, InterpreterError>;

    async fn history(&self, args: HistoryArguments) -> Result<Value, InterpreterError>;

    async fn is_complete(&self, code: &str) -> Result<Value, InterpreterError>;

    /// Kernel metadata; the dispatcher adds `protocol_version`.
    async fn kernel_info(&self) -> Result<Value, InterpreterError>;

    /// Interrupt hook. Fire-and-forget; the dispatcher replies immediately.
    async fn interrupt(&self);

    /// Front-end answer to a stdin request issued during execution.
    async fn input_reply(&self, value: String);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn execute_request_defaults_match_protocol() {
        let request: ExecuteRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(request.code, "");
        assert!(!request.silent);
        assert!(request.store_history);
        assert!(request.user_expressions.is_none());
        assert!(request.allow_stdin);
        assert!(!request.stop_on_error);
    }

    #[test]
    fn execute_request_rejects_wrong_types() {
        let result: Result<ExecuteRequest, _> = serde_json::from_value(json!({"code": 42}));
        assert!(result.is_err());
    }

    #[test]
    fn history_arguments_default_to_tail() {
        let args: HistoryArguments = serde_json::from_value(json!({})).unwrap();
        assert_eq!(args.hist_access_type, "tail");
        assert_eq!(args.n, 0);
        assert!(!args.unique);
    }

    #[test]
    fn history_arguments_parse_full_request() {
        let args: HistoryArguments = serde_json::from_value(json!({
            "hist_access_type": "search",
            "output": true,
            "raw": true,
            "session": 2,
            "start": 1,
            "stop": 10,
            "n": 5,
            "pattern": "import *",
            "unique": true,
        }))
        .unwrap();
        assert_eq!(args.hist_access_type, "search");
        assert_eq!(args.pattern, "import *");
        assert!(args.unique);
    }
}
