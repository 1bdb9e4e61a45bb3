//! # In-Memory Cluster
//!
//! A [`ClusterClient`] that keeps objects in process memory. It mimics the API
//! server closely enough for reconcile tests: resource versions and
//! optimistic concurrency, finalizer-gated deletion, a status subresource,
//! label-filtered lists and `NoMatch` for kinds that are not registered.
//!
//! Every write is recorded in a journal so tests can assert on exactly which
//! objects were created, updated or deleted.

use super::{labels_match, ClusterClient, ClusterError, ObjectKey};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::{DynamicObject, GroupVersionKind};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A write observed by the in-memory cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Created(ObjectKey),
    Updated(ObjectKey),
    StatusPatched(ObjectKey),
    Deleted(ObjectKey),
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<ObjectKey, DynamicObject>,
    unregistered: HashSet<(String, String)>,
    failing: HashSet<String>,
    next_version: u64,
    journal: Vec<Mutation>,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn check_registered(&self, gvk: &GroupVersionKind) -> Result<(), ClusterError> {
        if self
            .unregistered
            .contains(&(gvk.group.clone(), gvk.kind.clone()))
        {
            return Err(ClusterError::NoMatch(gvk.kind.clone()));
        }
        Ok(())
    }

    fn check_failing(&self, key: &ObjectKey) -> Result<(), ClusterError> {
        if self.failing.contains(&key.gvk.kind) {
            return Err(ClusterError::Conflict(
                key.to_string(),
                "injected failure".to_string(),
            ));
        }
        Ok(())
    }
}

/// In-process object store implementing [`ClusterClient`]
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object without recording a mutation
    ///
    /// The object is stored as given, including its status. A resource
    /// version and uid are assigned when missing.
    pub fn seed(&self, mut obj: DynamicObject) -> Result<ObjectKey, ClusterError> {
        let key = ObjectKey::from_object(&obj)?;
        let mut state = self.state();
        let version = state.bump();
        obj.metadata.resource_version = Some(version.clone());
        if obj.metadata.uid.is_none() {
            obj.metadata.uid = Some(format!("uid-{version}"));
        }
        if obj.metadata.generation.is_none() {
            obj.metadata.generation = Some(1);
        }
        state.objects.insert(key.clone(), obj);
        Ok(key)
    }

    /// Seed a typed object
    pub fn seed_typed<K: serde::Serialize>(&self, obj: &K) -> Result<ObjectKey, ClusterError> {
        self.seed(super::to_dynamic(obj)?)
    }

    /// Current stored copy of an object
    pub fn object(&self, key: &ObjectKey) -> Option<DynamicObject> {
        self.state().objects.get(key).cloned()
    }

    /// Make every call for the kind fail with `NoMatch`
    pub fn unregister_kind(&self, group: &str, kind: &str) {
        self.state()
            .unregistered
            .insert((group.to_string(), kind.to_string()));
    }

    /// Make writes of the kind fail with a conflict
    pub fn fail_writes_for(&self, kind: &str) {
        self.state().failing.insert(kind.to_string());
    }

    pub fn heal_writes_for(&self, kind: &str) {
        self.state().failing.remove(kind);
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.state().journal.clone()
    }

    pub fn clear_mutations(&self) {
        self.state().journal.clear();
    }

    pub fn created(&self) -> Vec<ObjectKey> {
        self.filter_journal(|m| match m {
            Mutation::Created(k) => Some(k),
            _ => None,
        })
    }

    pub fn updated(&self) -> Vec<ObjectKey> {
        self.filter_journal(|m| match m {
            Mutation::Updated(k) => Some(k),
            _ => None,
        })
    }

    pub fn deleted(&self) -> Vec<ObjectKey> {
        self.filter_journal(|m| match m {
            Mutation::Deleted(k) => Some(k),
            _ => None,
        })
    }

    pub fn status_patched(&self) -> Vec<ObjectKey> {
        self.filter_journal(|m| match m {
            Mutation::StatusPatched(k) => Some(k),
            _ => None,
        })
    }

    fn filter_journal<F>(&self, f: F) -> Vec<ObjectKey>
    where
        F: Fn(&Mutation) -> Option<&ObjectKey>,
    {
        self.state().journal.iter().filter_map(f).cloned().collect()
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, ClusterError> {
        let state = self.state();
        state.check_registered(&key.gvk)?;
        Ok(state.objects.get(key).cloned())
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let state = self.state();
        state.check_registered(gvk)?;
        let mut items: Vec<DynamicObject> = state
            .objects
            .iter()
            .filter(|(key, _)| &key.gvk == gvk)
            .filter(|(key, _)| namespace.is_none() || key.namespace.as_deref() == namespace)
            .filter(|(_, obj)| labels_match(obj.metadata.labels.as_ref(), labels))
            .map(|(_, obj)| obj.clone())
            .collect();
        items.sort_by(|a, b| {
            (&a.metadata.namespace, &a.metadata.name).cmp(&(&b.metadata.namespace, &b.metadata.name))
        });
        Ok(items)
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let key = ObjectKey::from_object(obj)?;
        let mut state = self.state();
        state.check_registered(&key.gvk)?;
        state.check_failing(&key)?;
        if state.objects.contains_key(&key) {
            return Err(ClusterError::Conflict(
                key.to_string(),
                "already exists".to_string(),
            ));
        }

        let version = state.bump();
        let mut stored = obj.clone();
        stored.metadata.resource_version = Some(version.clone());
        stored.metadata.uid = Some(format!("uid-{version}"));
        stored.metadata.generation = Some(1);
        stored.metadata.creation_timestamp = now();
        state.objects.insert(key.clone(), stored.clone());
        state.journal.push(Mutation::Created(key));
        Ok(stored)
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let key = ObjectKey::from_object(obj)?;
        let mut state = self.state();
        state.check_registered(&key.gvk)?;
        state.check_failing(&key)?;
        let Some(current) = state.objects.get(&key).cloned() else {
            return Err(ClusterError::NotFound(key.to_string()));
        };
        if let Some(rv) = &obj.metadata.resource_version {
            if current.metadata.resource_version.as_ref() != Some(rv) {
                return Err(ClusterError::Conflict(
                    key.to_string(),
                    "the object has been modified".to_string(),
                ));
            }
        }

        let version = state.bump();
        let mut stored = obj.clone();
        stored.metadata.resource_version = Some(version);
        stored.metadata.uid.clone_from(&current.metadata.uid);
        stored.metadata.creation_timestamp.clone_from(&current.metadata.creation_timestamp);
        stored.metadata.deletion_timestamp.clone_from(&current.metadata.deletion_timestamp);
        // status is only writable through the status subresource
        match current.data.get("status") {
            Some(status) => {
                if let Some(data) = stored.data.as_object_mut() {
                    data.insert("status".to_string(), status.clone());
                }
            }
            None => {
                if let Some(data) = stored.data.as_object_mut() {
                    data.remove("status");
                }
            }
        }
        let spec_changed = current.data.get("spec") != stored.data.get("spec");
        let generation = current.metadata.generation.unwrap_or(1);
        stored.metadata.generation = Some(if spec_changed { generation + 1 } else { generation });

        state.journal.push(Mutation::Updated(key.clone()));
        let finalized = stored.metadata.deletion_timestamp.is_some()
            && stored
                .metadata
                .finalizers
                .as_ref()
                .is_none_or(Vec::is_empty);
        if finalized {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, stored.clone());
        }
        Ok(stored)
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        status: serde_json::Value,
    ) -> Result<(), ClusterError> {
        let mut state = self.state();
        state.check_registered(&key.gvk)?;
        let version = state.bump();
        let Some(stored) = state.objects.get_mut(key) else {
            return Err(ClusterError::NotFound(key.to_string()));
        };
        let mut patch = serde_json::Map::new();
        patch.insert("status".to_string(), status);
        merge_patch(&mut stored.data, &serde_json::Value::Object(patch));
        stored.metadata.resource_version = Some(version);
        state.journal.push(Mutation::StatusPatched(key.clone()));
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClusterError> {
        let mut state = self.state();
        state.check_registered(&key.gvk)?;
        state.check_failing(key)?;
        let Some(stored) = state.objects.get_mut(key) else {
            return Err(ClusterError::NotFound(key.to_string()));
        };
        let has_finalizers = stored
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| !f.is_empty());
        if has_finalizers {
            if stored.metadata.deletion_timestamp.is_none() {
                stored.metadata.deletion_timestamp = now();
            }
        } else {
            state.objects.remove(key);
        }
        state.journal.push(Mutation::Deleted(key.clone()));
        Ok(())
    }
}

/// Current time as an API timestamp
fn now() -> Option<Time> {
    let stamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    serde_json::from_value(serde_json::Value::String(stamp)).ok()
}

/// JSON merge patch (RFC 7386)
fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    let serde_json::Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = serde_json::Value::Object(serde_json::Map::new());
    }
    if let serde_json::Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(
                    target.entry(key.clone()).or_insert(serde_json::Value::Null),
                    value,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::gvk_of;
    use k8s_openapi::api::core::v1::ConfigMap;
    use serde_json::json;

    fn config_map(name: &str, labels: serde_json::Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": "default", "labels": labels},
            "data": {"a": "1"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_get_update_with_resource_versions() {
        let cluster = InMemoryCluster::new();
        let created = cluster.create(&config_map("a", json!({}))).await.unwrap();
        let stale = created.clone();

        let updated = cluster.update(&created).await.unwrap();
        assert_ne!(updated.metadata.resource_version, stale.metadata.resource_version);

        let err = cluster.update(&stale).await.unwrap_err();
        assert!(err.is_conflict());

        let duplicate = cluster.create(&config_map("a", json!({}))).await.unwrap_err();
        assert!(duplicate.is_conflict());
        assert_eq!(cluster.created().len(), 1);
        assert_eq!(cluster.updated().len(), 1);
    }

    #[tokio::test]
    async fn test_list_filters_by_labels() {
        let cluster = InMemoryCluster::new();
        cluster.seed(config_map("a", json!({"app": "x"}))).unwrap();
        cluster.seed(config_map("b", json!({"app": "y"}))).unwrap();

        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), "x".to_string());
        let items = cluster
            .list(&gvk_of::<ConfigMap>(), None, &selector)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].metadata.name.as_deref(), Some("a"));
        assert!(cluster.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_delete_waits_for_finalizers() {
        let cluster = InMemoryCluster::new();
        let mut obj = config_map("a", json!({}));
        obj.metadata.finalizers = Some(vec!["guard".to_string()]);
        let key = cluster.seed(obj).unwrap();

        cluster.delete(&key).await.unwrap();
        let mut stored = cluster.object(&key).unwrap();
        assert!(stored.metadata.deletion_timestamp.is_some());

        stored.metadata.finalizers = Some(Vec::new());
        cluster.update(&stored).await.unwrap();
        assert!(cluster.object(&key).is_none());

        let err = cluster.delete(&key).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_no_match() {
        let cluster = InMemoryCluster::new();
        cluster.unregister_kind("", "ConfigMap");
        let err = cluster
            .get(&ObjectKey::of::<ConfigMap>(Some("default"), "a"))
            .await
            .unwrap_err();
        assert!(err.is_no_match());
    }

    #[tokio::test]
    async fn test_status_is_only_written_through_patch_status() {
        let cluster = InMemoryCluster::new();
        let key = cluster.seed(config_map("a", json!({}))).unwrap();

        cluster
            .patch_status(&key, json!({"version": "1.0", "conditions": []}))
            .await
            .unwrap();
        let mut stored = cluster.object(&key).unwrap();
        assert_eq!(stored.data["status"]["version"], "1.0");

        stored.data["status"] = json!({"version": "2.0"});
        cluster.update(&stored).await.unwrap();
        assert_eq!(cluster.object(&key).unwrap().data["status"]["version"], "1.0");
        assert_eq!(cluster.status_patched(), vec![key]);
    }
}
