//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loops.
//! This module handles reconciliation errors and watch stream errors.

use super::Worker;
use crate::controller::backoff::BackoffState;
use crate::controller::context::ReconcilerError;
use kube::Resource;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Key of the per-resource backoff state
pub fn resource_key(controller: &str, namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{controller}/{ns}/{name}"),
        None => format!("{controller}/{name}"),
    }
}

/// Handle reconciliation errors with Fibonacci backoff
///
/// Backoff state is tracked per resource so one failing parent does not slow
/// down the others.
pub fn handle_reconciliation_error<K>(
    obj: Arc<K>,
    error: &ReconcilerError,
    worker: Arc<Worker>,
) -> Action
where
    K: Resource,
{
    let controller = worker.reconciler.name();
    let name = obj.meta().name.as_deref().unwrap_or("unknown");
    let namespace = obj.meta().namespace.as_deref();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        controller,
        resource.name = name,
        resource.namespace = namespace.unwrap_or_default(),
        error = %error
    );
    let _error_guard = error_span.enter();

    let reason = error.requeue_reason();
    match error {
        ReconcilerError::NotReady(message) => {
            info!("⏳ {} not ready yet: {}", name, message);
        }
        _ => {
            error!("Reconciliation error for {}: {:?}", name, error);
            worker.ctx.metrics.increment_reconciliation_errors(controller);
        }
    }

    let key = resource_key(controller, namespace, name);
    let (backoff_seconds, error_count) = next_backoff(&worker, &key);

    info!(
        "🔄 Retrying with Fibonacci backoff: {}s (error count: {}, trigger source: {})",
        backoff_seconds, error_count, reason
    );
    match next_retry_time(chrono::Utc::now(), backoff_seconds) {
        Some(at) => info!(
            "📅 Next retry scheduled: {} (in {}s)",
            at.to_rfc3339(),
            backoff_seconds
        ),
        None => info!("📅 Next retry scheduled in {}s", backoff_seconds),
    }

    worker.ctx.metrics.increment_requeues_total(reason);
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// Wall-clock time of the next retry, `None` when it is not representable
pub fn next_retry_time(
    now: chrono::DateTime<chrono::Utc>,
    backoff_seconds: u64,
) -> Option<chrono::DateTime<chrono::Utc>> {
    let delay = chrono::TimeDelta::try_seconds(i64::try_from(backoff_seconds).ok()?)?;
    now.checked_add_signed(delay)
}

/// Advance the backoff of `key`, returning the delay and error count
fn next_backoff(worker: &Worker, key: &str) -> (u64, u32) {
    let config = &worker.ctx.config;
    match worker.ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(key.to_string()).or_insert_with(|| {
                BackoffState::new(config.backoff_min_secs, config.backoff_max_secs)
            });
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using default backoff", e);
            (config.backoff_max_secs, 0)
        }
    }
}

/// Classification of a watch stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    Expired,
    TooManyRequests,
    NotFound,
    Other,
}

impl WatchErrorKind {
    pub fn classify(error_string: &str) -> Self {
        // 404s can carry "WatchFailed" in the chain, so they are checked first
        let is_not_found = error_string.contains("ObjectNotFound")
            || error_string.contains("404")
            || error_string.contains("not found");
        let is_unauthorized =
            error_string.contains("401") || error_string.contains("Unauthorized");
        if is_unauthorized && !is_not_found {
            Self::Unauthorized
        } else if error_string.contains("410")
            || error_string.contains("too old resource version")
            || error_string.contains("Expired")
            || error_string.contains("Gone")
        {
            Self::Expired
        } else if error_string.contains("429")
            || error_string.contains("storage is (re)initializing")
            || error_string.contains("TooManyRequests")
        {
            Self::TooManyRequests
        } else if is_not_found {
            Self::NotFound
        } else {
            Self::Other
        }
    }
}

/// Handle watch stream errors with appropriate classification and backoff
///
/// Returns `None` to filter the error out (the stream restarts) or `Some(())`
/// to keep going.
pub async fn handle_watch_stream_error(
    controller: &str,
    error_string: &str,
    backoff: &AtomicU64,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        controller,
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match WatchErrorKind::classify(error_string) {
        WatchErrorKind::Unauthorized => {
            error!(
                "❌ Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired"
            );
            error!(
                "🔍 Check that the operator ServiceAccount still holds its ClusterRoleBinding"
            );
            warn!(
                "⏳ Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                watch_restart_delay.as_secs()
            );
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
        WatchErrorKind::Expired => {
            warn!("Watch resource version expired (410), watch will restart");
            warn!(error_type = "410", "watch.error.resource_version_expired");
            None
        }
        WatchErrorKind::TooManyRequests => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            warn!(
                "API server storage reinitializing (429), backing off for {}ms before restart...",
                current_backoff
            );
            tokio::time::sleep(Duration::from_millis(current_backoff)).await;
            backoff.store(current_backoff.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
            None
        }
        WatchErrorKind::NotFound => {
            warn!(
                "Resource not found (404) - this may be normal if it was deleted or its CRD is missing. Error: {}",
                error_string
            );
            Some(())
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
    }
}
