//! # Background Effects
//!
//! Fire-and-forget work (payout transfers, emails, notifications) runs on
//! spawned tasks so the webhook or HTTP response never waits for it.
//! Every effect is named; its outcome is logged, never propagated.

use crate::error::MarketResult;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Outcome-logging task spawner
#[derive(Clone, Default)]
pub struct Background {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Background {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `effect` on its own task
    pub fn spawn<F>(&self, name: &'static str, effect: F)
    where
        F: Future<Output = MarketResult<()>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            match effect.await {
                Ok(()) => debug!(effect = name, "background effect completed"),
                Err(e) => error!(effect = name, error = %e, "background effect failed"),
            }
        });

        let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Wait for every effect spawned so far (shutdown and tests)
    pub async fn flush(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = {
                let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
                std::mem::take(&mut *handles)
            };
            if pending.is_empty() {
                break;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    error!(error = %e, "background task panicked");
                }
            }
        }
    }
}
