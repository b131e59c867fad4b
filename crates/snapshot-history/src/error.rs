use thiserror::Error;

use crate::{CommandOutput, HistoryOp};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to run {program} for {op}: {source}")]
    Spawn {
        op: HistoryOp,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{op} exited with {}: {}", exit_label(.code), .output.summary())]
    Failed {
        op: HistoryOp,
        code: Option<i32>,
        output: CommandOutput,
    },
}

impl HistoryError {
    pub fn op(&self) -> HistoryOp {
        match self {
            HistoryError::Spawn { op, .. } | HistoryError::Failed { op, .. } => *op,
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}
