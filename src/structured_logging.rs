//! Structured logging and operation context

use crate::tx_builder::errors::{ForgeError, Stage};
use std::time::Instant;
use uuid::Uuid;

/// Correlation context for one top-level operation (create-mint, transfer,
/// withdraw, ...). Every event it emits carries the same `operation_id`.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub operation_id: String,
    pub operation: &'static str,
    started: Instant,
}

impl OperationContext {
    pub fn new(operation: &'static str) -> Self {
        let context = Self {
            operation_id: Uuid::new_v4().to_string(),
            operation,
            started: Instant::now(),
        };
        tracing::debug!(
            operation_id = %context.operation_id,
            operation = context.operation,
            "Operation started"
        );
        context
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn log_stage(&self, stage: Stage, detail: &str) {
        tracing::debug!(
            operation_id = %self.operation_id,
            operation = self.operation,
            stage = %stage,
            detail = %detail,
            "Stage reached"
        );
    }

    pub fn log_submission(&self, instructions: usize, signers: usize) {
        tracing::info!(
            operation_id = %self.operation_id,
            operation = self.operation,
            instructions,
            signers,
            "Submitting transaction"
        );
    }

    pub fn log_success(&self, signature: &str) {
        tracing::info!(
            operation_id = %self.operation_id,
            operation = self.operation,
            signature = %signature,
            latency_ms = self.elapsed_ms(),
            "Operation succeeded"
        );
    }

    pub fn log_failure(&self, error: &ForgeError) {
        tracing::warn!(
            operation_id = %self.operation_id,
            operation = self.operation,
            stage = %error.stage(),
            category = error.category(),
            error = %error,
            latency_ms = self.elapsed_ms(),
            "Operation failed"
        );
    }
}
