//! # Watch Loop
//!
//! One `kube_runtime::Controller` per watched kind, each run in a restart
//! loop. Watch events only name the object to reconcile; the reconciler
//! re-reads current state.
//!
//! Children of a parent are mapped back through their owner annotations when
//! they live in another namespace, and through their owner reference otherwise.

use super::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use super::initialization::{log_existing, InitializationResult};
use super::{reconcile, ControllerSet, Worker};
use crate::cluster::gvk_of;
use crate::constants::{EVENTING_NAMESPACE, KAFKA_DEPENDENT_CONFIGMAPS, OPENSHIFT_INGRESS_LABEL};
use crate::controller::component::{
    ComponentParent, ExtensionManifests, EVENTING_PROFILE, SERVING_PROFILE,
};
use crate::controller::ingress::ingress_of;
use crate::controller::kafka::{KafkaManifests, KafkaParent, KAFKA_OWNER_KEYS};
use crate::controller::Reconciler;
use crate::crd::{Ingress, KnativeKafka, Route};
use crate::server::ServerState;
use crate::transform::owner::OwnerAnnotationKeys;
use anyhow::Context as _;
use futures::future::BoxFuture;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, ApiResource};
use kube::core::DynamicObject;
use kube::{Client, Resource, ResourceExt};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{controller, watcher, Controller};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Map a child to its parent: owner annotations first, then an owner
/// reference of the parent kind in the child's namespace
pub fn owner_mapper<K>(
    keys: OwnerAnnotationKeys,
    dyntype: K::DynamicType,
) -> impl Fn(DynamicObject) -> Option<ObjectRef<K>> + Send + Sync + 'static
where
    K: Resource,
    K::DynamicType: Clone + Send + Sync + 'static,
{
    move |child| {
        if let Some((name, namespace)) = child
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| keys.owner_of(a))
        {
            return Some(ObjectRef::new_with(&name, dyntype.clone()).within(&namespace));
        }
        let kind = K::kind(&dyntype);
        let api_version = K::api_version(&dyntype);
        let owner = child
            .metadata
            .owner_references
            .as_ref()?
            .iter()
            .find(|o| o.kind == kind.as_ref() && o.api_version == api_version.as_ref())?;
        let namespace = child.metadata.namespace.as_deref()?;
        Some(ObjectRef::new_with(&owner.name, dyntype.clone()).within(namespace))
    }
}

/// Controller for KnativeKafka
///
/// Besides the parent it watches every installed kind, mapped back through
/// the owner annotations, and the eventing ConfigMaps whose change resyncs
/// all KnativeKafka objects.
pub fn kafka_controller(
    client: &Client,
    namespace: Option<&str>,
    owned: &[ApiResource],
) -> Controller<KnativeKafka> {
    let parents: Api<KnativeKafka> = match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let controller = Controller::new(parents, watcher::Config::default().any_semantic());

    let store = controller.store();
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), EVENTING_NAMESPACE);
    let mut controller =
        controller.watches(config_maps, watcher::Config::default(), move |config_map| {
            if KAFKA_DEPENDENT_CONFIGMAPS.contains(&config_map.name_any().as_str()) {
                debug!(config_map = %config_map.name_any(), "Resyncing every KnativeKafka");
                store
                    .state()
                    .iter()
                    .map(|kafka| ObjectRef::from_obj(kafka.as_ref()))
                    .collect()
            } else {
                Vec::new()
            }
        });

    for resource in owned {
        let api: Api<DynamicObject> = Api::all_with(client.clone(), resource);
        controller = controller.watches_with(
            api,
            resource.clone(),
            watcher::Config::default(),
            owner_mapper::<KnativeKafka>(KAFKA_OWNER_KEYS, ()),
        );
    }
    controller
}

/// Controller for KnativeServing or KnativeEventing, optionally restricted
/// to the namespace the parent must live in
pub fn component_controller(
    client: &Client,
    resource: &ApiResource,
    namespace: Option<&str>,
) -> Controller<DynamicObject> {
    let parents: Api<DynamicObject> = match namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, resource),
        None => Api::all_with(client.clone(), resource),
    };
    Controller::new_with(
        parents,
        watcher::Config::default().any_semantic(),
        resource.clone(),
    )
}

/// Controller for Knative Ingresses and the Routes generated for them
pub fn ingress_controller(client: &Client) -> Controller<Ingress> {
    let ingresses: Api<Ingress> = Api::all(client.clone());
    let routes: Api<Route> = Api::all(client.clone());
    Controller::new(ingresses, watcher::Config::default().any_semantic()).watches(
        routes,
        watcher::Config::default().labels(OPENSHIFT_INGRESS_LABEL),
        |route| {
            ingress_of(route.labels()).map(|(name, namespace)| ObjectRef::new(&name).within(&namespace))
        },
    )
}

/// Mark the server unready once a shutdown signal arrives
pub fn spawn_shutdown_handler(server_state: Arc<ServerState>) {
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        server_state.request_shutdown();
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Run a controller until shutdown, restarting its stream when it ends
///
/// `build` is called for every (re)start, so each restart gets fresh watches.
pub async fn run_watch_loop<K, B>(
    build: B,
    worker: Arc<Worker>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Debug + Unpin + Send + Sync,
    B: Fn() -> Controller<K>,
{
    let name = worker.reconciler.name();
    let config = Arc::clone(&worker.ctx.config);
    let backoff_duration_ms = Arc::new(AtomicU64::new(config.watch_backoff_start_ms));

    while !server_state.shutting_down() {
        let watch_span = tracing::info_span!("controller.watch", controller = name);
        info!(parent: &watch_span, "Starting {} controller watch loop...", name);

        let backoff = Arc::clone(&backoff_duration_ms);
        let stream_config = Arc::clone(&config);
        build()
            .with_config(
                controller::Config::default().concurrency(config.max_concurrent_reconciliations),
            )
            .shutdown_on_signal()
            .run(
                reconcile::<K>,
                handle_reconciliation_error::<K>,
                Arc::clone(&worker),
            )
            .filter_map(move |x| {
                let backoff = Arc::clone(&backoff);
                let config = Arc::clone(&stream_config);
                async move {
                    match &x {
                        Ok(_) => {
                            backoff.store(config.watch_backoff_start_ms, Ordering::Relaxed);
                            debug!("watch.event.success");
                            Some(x)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                name,
                                &error_string,
                                &backoff,
                                config.watch_backoff_max_ms,
                                config.watch_restart_delay(),
                            )
                            .await
                            .map(|()| x)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .await;

        if server_state.shutting_down() {
            info!("Shutdown requested, exiting {} watch loop", name);
            break;
        }

        let delay = config.watch_restart_delay();
        warn!(
            "{} controller stream ended, restarting watch in {}s...",
            name,
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }

    Ok(())
}

/// Start the selected controllers and run them until shutdown
///
/// Manifests are loaded first; a missing required path or a broken manifest
/// stops startup. Parent kinds whose CRD is not installed are skipped.
pub async fn run_controllers(
    set: ControllerSet,
    init: &InitializationResult,
) -> Result<(), anyhow::Error> {
    let ctx = &init.ctx;
    let config = &ctx.config;
    let mut loops: Vec<BoxFuture<'_, Result<(), anyhow::Error>>> = Vec::new();

    if set.runs_operator() {
        let manifests =
            KafkaManifests::load(&config.manifests).context("Failed to load Kafka manifests")?;
        let mut owned = Vec::new();
        for gvk in manifests.kinds()? {
            match init.cluster.resolve(&gvk).await {
                Ok((resource, _)) => owned.push(resource),
                Err(e) => warn!(kind = %gvk.kind, error = %e, "Not watching kind"),
            }
        }
        log_existing(ctx.cluster.as_ref(), &gvk_of::<KnativeKafka>()).await;
        let worker = Arc::new(Worker::new(
            Reconciler::Kafka(Arc::new(KafkaParent::new(manifests))),
            ctx.clone(),
        ));
        let namespace = config.required_kafka_namespace.clone();
        let client = init.client.clone();
        loops.push(Box::pin(run_watch_loop(
            move || kafka_controller(&client, namespace.as_deref(), &owned),
            worker,
            Arc::clone(&init.server_state),
        )));

        for profile in [SERVING_PROFILE, EVENTING_PROFILE] {
            let component = profile.component;
            let resource = match init.cluster.resolve(&component.gvk()).await {
                Ok((resource, _)) => resource,
                Err(e) => {
                    warn!(
                        kind = %component.gvk().kind,
                        error = %e,
                        "Not starting {} controller",
                        profile.name
                    );
                    continue;
                }
            };
            log_existing(ctx.cluster.as_ref(), &component.gvk()).await;
            let extensions = ExtensionManifests::load(component, &config.manifests)
                .with_context(|| format!("Failed to load {} manifests", profile.name))?;
            let worker = Arc::new(Worker::new(
                Reconciler::Component(Arc::new(ComponentParent::new(profile, extensions))),
                ctx.clone(),
            ));
            let namespace = component.required_namespace(config).map(str::to_string);
            let client = init.client.clone();
            loops.push(Box::pin(run_watch_loop(
                move || component_controller(&client, &resource, namespace.as_deref()),
                worker,
                Arc::clone(&init.server_state),
            )));
        }
    }

    if set.runs_ingress() {
        let worker = Arc::new(Worker::new(Reconciler::Ingress, ctx.clone()));
        let client = init.client.clone();
        loops.push(Box::pin(run_watch_loop(
            move || ingress_controller(&client),
            worker,
            Arc::clone(&init.server_state),
        )));
    }

    spawn_shutdown_handler(Arc::clone(&init.server_state));
    init.server_state.set_ready(true);
    info!("{} controllers running", loops.len());

    futures::future::try_join_all(loops).await?;
    info!("Controllers stopped");
    Ok(())
}
