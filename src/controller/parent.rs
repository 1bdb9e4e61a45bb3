//! # Parent Reconcile
//!
//! The lifecycle shared by every parent kind. Each pass re-reads the parent
//! and walks the same state machine:
//!
//! 1. Parent gone: nothing to do.
//! 2. Parent deleting and still carrying our finalizer: tear down, then
//!    remove the finalizer from a fresh copy of the parent.
//! 3. Finalizer missing: add it and stop. The write triggers the next pass.
//! 4. Initialize conditions and run the install stages.
//! 5. Write the status back only if it changed.
//!
//! What "install" and "teardown" mean is up to the [`ParentReconciler`].

use super::context::{Context, ReconcilerError};
use crate::cluster::ObjectKey;
use crate::crd::{ComponentStatus, ConditionSet};
use async_trait::async_trait;
use kube::core::{DynamicObject, GroupVersionKind};
use kube_runtime::controller::Action;
use serde_json::json;
use tracing::{debug, info, warn};

/// One parent kind
#[async_trait]
pub trait ParentReconciler: Send + Sync {
    /// Metric label and log name of the controller
    fn name(&self) -> &'static str;

    fn gvk(&self) -> GroupVersionKind;

    fn finalizer(&self) -> &'static str;

    /// `type` label of the `knative_up` gauge
    fn up_type(&self) -> &'static str;

    /// Condition types this reconciler owns on the parent status
    fn conditions(&self) -> ConditionSet;

    /// Whether `status.observedGeneration` is ours to write
    fn writes_observed_generation(&self) -> bool {
        true
    }

    /// Converge children towards the parent spec, recording progress in `status`
    async fn install(
        &self,
        ctx: &Context,
        parent: &DynamicObject,
        status: &mut ComponentStatus,
    ) -> Result<(), ReconcilerError>;

    /// Remove every child the cluster does not garbage-collect on its own
    async fn teardown(&self, ctx: &Context, parent: &DynamicObject) -> Result<(), ReconcilerError>;
}

/// Run one reconcile pass for the parent `namespace/name`
pub async fn reconcile_parent<R>(
    reconciler: &R,
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<Action, ReconcilerError>
where
    R: ParentReconciler + ?Sized,
{
    let key = ObjectKey::new(reconciler.gvk(), Some(namespace), name);
    let Some(parent) = ctx.cluster.get(&key).await? else {
        debug!(resource = %key, "Parent no longer exists");
        return Ok(Action::await_change());
    };

    let finalizer = reconciler.finalizer();
    if parent.metadata.deletion_timestamp.is_some() {
        if has_finalizer(&parent, finalizer) {
            finalize(reconciler, ctx, &key, &parent).await?;
        }
        return Ok(Action::await_change());
    }

    if !has_finalizer(&parent, finalizer) {
        info!(resource = %key, finalizer, "Adding finalizer");
        let mut updated = parent;
        updated
            .metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(finalizer.to_string());
        ctx.cluster.update(&updated).await?;
        return Ok(Action::await_change());
    }

    let previous = read_status(&parent);
    let mut status = previous.clone();
    let conditions = reconciler.conditions();
    conditions.manage(&mut status).initialize();

    let result = reconciler.install(ctx, &parent, &mut status).await;

    if reconciler.writes_observed_generation() {
        status.observed_generation = parent.metadata.generation;
    }
    if status != previous {
        if let Err(e) = ctx.cluster.patch_status(&key, status_patch(&status)).await {
            warn!(
                resource = %key,
                error = %e,
                "Failed to persist status, retrying on next reconcile"
            );
            if result.is_ok() {
                return Err(e.into());
            }
        }
    }

    ctx.metrics
        .set_up(reconciler.up_type(), conditions.is_happy(&status));

    result?;
    info!(resource = %key, "✅ Reconciled");
    Ok(Action::requeue(ctx.config.resync_interval()))
}

async fn finalize<R>(
    reconciler: &R,
    ctx: &Context,
    key: &ObjectKey,
    parent: &DynamicObject,
) -> Result<(), ReconcilerError>
where
    R: ParentReconciler + ?Sized,
{
    info!(resource = %key, "🧹 Running teardown before removing finalizer");
    reconciler.teardown(ctx, parent).await?;
    ctx.metrics.remove_up(reconciler.up_type());

    // The parent may have changed while tearing down
    let Some(mut fresh) = ctx.cluster.get(key).await? else {
        return Ok(());
    };
    let finalizer = reconciler.finalizer();
    if let Some(finalizers) = fresh.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != finalizer);
    }
    ctx.cluster.update(&fresh).await?;
    info!(resource = %key, finalizer, "Removed finalizer");
    Ok(())
}

fn has_finalizer(parent: &DynamicObject, finalizer: &str) -> bool {
    parent
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Parent status as last written, empty when absent or unreadable
pub fn read_status(parent: &DynamicObject) -> ComponentStatus {
    parent
        .data
        .get("status")
        .and_then(|s| serde_json::from_value(s.clone()).ok())
        .unwrap_or_default()
}

fn status_patch(status: &ComponentStatus) -> serde_json::Value {
    let mut patch = json!({ "conditions": status.conditions });
    if let Some(version) = &status.version {
        patch["version"] = json!(version);
    }
    if let Some(generation) = status.observed_generation {
        patch["observedGeneration"] = json!(generation);
    }
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::InMemoryCluster;
    use crate::cluster::ClusterClient;
    use crate::config::ControllerConfig;
    use crate::crd::{CONDITION_INSTALL_SUCCEEDED, CONDITION_READY};
    use crate::observability::Metrics;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const SET: ConditionSet = ConditionSet::living(&[CONDITION_INSTALL_SUCCEEDED]);

    #[derive(Default)]
    struct Widget {
        fail: bool,
        fail_teardown: bool,
        installs: AtomicUsize,
        teardowns: AtomicUsize,
    }

    #[async_trait]
    impl ParentReconciler for Widget {
        fn name(&self) -> &'static str {
            "widget"
        }

        fn gvk(&self) -> GroupVersionKind {
            GroupVersionKind::gvk("example.dev", "v1", "Widget")
        }

        fn finalizer(&self) -> &'static str {
            "widget-finalizer"
        }

        fn up_type(&self) -> &'static str {
            "widget_status"
        }

        fn conditions(&self) -> ConditionSet {
            SET
        }

        async fn install(
            &self,
            _: &Context,
            _: &DynamicObject,
            status: &mut ComponentStatus,
        ) -> Result<(), ReconcilerError> {
            self.installs.fetch_add(1, Ordering::SeqCst);
            let mut conditions = SET.manage(status);
            if self.fail {
                conditions.mark_false(CONDITION_INSTALL_SUCCEEDED, "Error", "boom");
                return Err(ReconcilerError::NotReady("boom".to_string()));
            }
            conditions.mark_true(CONDITION_INSTALL_SUCCEEDED);
            Ok(())
        }

        async fn teardown(&self, _: &Context, _: &DynamicObject) -> Result<(), ReconcilerError> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            if self.fail_teardown {
                return Err(ReconcilerError::Other(anyhow::anyhow!("child delete refused")));
            }
            Ok(())
        }
    }

    fn setup() -> (Arc<InMemoryCluster>, Context, ObjectKey) {
        let cluster = Arc::new(InMemoryCluster::new());
        let parent: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "example.dev/v1",
            "kind": "Widget",
            "metadata": {"name": "p", "namespace": "ns"},
            "spec": {}
        }))
        .unwrap();
        let key = cluster.seed(parent).unwrap();
        let ctx = Context::new(
            Arc::clone(&cluster) as Arc<dyn ClusterClient>,
            Arc::new(ControllerConfig::default()),
            Arc::new(Metrics::new().unwrap()),
        );
        (cluster, ctx, key)
    }

    #[tokio::test]
    async fn test_first_pass_only_adds_finalizer() {
        let (cluster, ctx, key) = setup();
        let widget = Widget::default();

        reconcile_parent(&widget, &ctx, "ns", "p").await.unwrap();
        assert_eq!(widget.installs.load(Ordering::SeqCst), 0);
        let stored = cluster.object(&key).unwrap();
        assert!(has_finalizer(&stored, "widget-finalizer"));

        reconcile_parent(&widget, &ctx, "ns", "p").await.unwrap();
        assert_eq!(widget.installs.load(Ordering::SeqCst), 1);
        let status = read_status(&cluster.object(&key).unwrap());
        assert!(status.is_true(CONDITION_READY));
        assert_eq!(ctx.metrics.up("widget_status"), Some(1.0));
    }

    #[tokio::test]
    async fn test_unchanged_status_is_not_rewritten() {
        let (cluster, ctx, _) = setup();
        let widget = Widget::default();
        reconcile_parent(&widget, &ctx, "ns", "p").await.unwrap();
        reconcile_parent(&widget, &ctx, "ns", "p").await.unwrap();
        cluster.clear_mutations();

        reconcile_parent(&widget, &ctx, "ns", "p").await.unwrap();
        assert!(cluster.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_install_error_still_records_status() {
        let (cluster, ctx, key) = setup();
        let widget = Widget {
            fail: true,
            ..Default::default()
        };
        reconcile_parent(&widget, &ctx, "ns", "p").await.unwrap();

        let err = reconcile_parent(&widget, &ctx, "ns", "p").await.unwrap_err();
        assert!(matches!(err, ReconcilerError::NotReady(_)));
        let status = read_status(&cluster.object(&key).unwrap());
        let condition = status.condition(CONDITION_INSTALL_SUCCEEDED).unwrap();
        assert_eq!(condition.reason.as_deref(), Some("Error"));
        assert_eq!(ctx.metrics.up("widget_status"), Some(0.0));
    }

    #[tokio::test]
    async fn test_deletion_tears_down_then_releases_finalizer() {
        let (cluster, ctx, key) = setup();
        let widget = Widget::default();
        reconcile_parent(&widget, &ctx, "ns", "p").await.unwrap();
        reconcile_parent(&widget, &ctx, "ns", "p").await.unwrap();

        cluster.delete(&key).await.unwrap();
        assert!(cluster.object(&key).is_some());

        reconcile_parent(&widget, &ctx, "ns", "p").await.unwrap();
        assert_eq!(widget.teardowns.load(Ordering::SeqCst), 1);
        assert!(cluster.object(&key).is_none());
        assert_eq!(ctx.metrics.up("widget_status"), None);

        let action = reconcile_parent(&widget, &ctx, "ns", "p").await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_failed_teardown_keeps_finalizer() {
        let (cluster, ctx, key) = setup();
        let widget = Widget {
            fail_teardown: true,
            ..Default::default()
        };
        reconcile_parent(&widget, &ctx, "ns", "p").await.unwrap();
        reconcile_parent(&widget, &ctx, "ns", "p").await.unwrap();
        cluster.delete(&key).await.unwrap();

        assert!(reconcile_parent(&widget, &ctx, "ns", "p").await.is_err());
        let stored = cluster.object(&key).unwrap();
        assert!(has_finalizer(&stored, "widget-finalizer"));
        assert!(stored.metadata.deletion_timestamp.is_some());

        assert!(reconcile_parent(&widget, &ctx, "ns", "p").await.is_err());
        assert_eq!(widget.teardowns.load(Ordering::SeqCst), 2);
        assert!(cluster.object(&key).is_some());
    }
}
