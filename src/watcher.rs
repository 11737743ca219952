// System
use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

// Third Party
use futures::{pin_mut, Stream, StreamExt};
use kube::{
    api::Api,
    runtime::{
        reflector::{store::Writer, ObjectRef, Store},
        watcher,
        watcher::Event,
        WatchStreamExt,
    },
    Client, Resource,
};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

// Local
use crate::lifecycle::ShutdownListener;

/// Capacity of the queue between the watch and the sink.
pub const NOTIFICATION_QUEUE_CAPACITY: usize = 256;

/// An informer-style change notification for a single object.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification<K> {
    Added(K),
    Updated(K),
    Deleted(K),
}

/// Local copy of the watched collection, used to tell new objects apart from changed ones.
pub struct Mirror<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    writer: Writer<K>,
    store: Store<K>,
}

impl<K> Default for Mirror<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    fn default() -> Self {
        let writer = Writer::default();
        let store = writer.as_reader();
        Self { writer, store }
    }
}

impl<K> Mirror<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.store.state().len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, obj: &K) -> bool {
        self.store.get(&ObjectRef::from_obj(obj)).is_some()
    }

    /// Fold a watch event into the mirror and return the notifications it amounts to.
    ///
    /// A relist (`Restarted`) yields `Added` for objects the mirror has never seen, `Updated` for
    /// ones it has, and `Deleted` for mirrored objects missing from the new listing.
    pub fn apply(&mut self, event: Event<K>) -> Vec<Notification<K>> {
        let notifications = match &event {
            Event::Applied(obj) => {
                if self.contains(obj) {
                    vec![Notification::Updated(obj.clone())]
                } else {
                    vec![Notification::Added(obj.clone())]
                }
            }
            Event::Deleted(obj) => vec![Notification::Deleted(obj.clone())],
            Event::Restarted(objs) => {
                let listed: HashSet<ObjectRef<K>> = objs.iter().map(ObjectRef::from_obj).collect();
                let mut notifications: Vec<Notification<K>> = objs
                    .iter()
                    .map(|obj| {
                        if self.contains(obj) {
                            Notification::Updated(obj.clone())
                        } else {
                            Notification::Added(obj.clone())
                        }
                    })
                    .collect();
                notifications.extend(
                    self.store
                        .state()
                        .into_iter()
                        .filter(|obj| !listed.contains(&ObjectRef::from_obj(&**obj)))
                        .map(|obj| Notification::Deleted(K::clone(&obj))),
                );
                notifications
            }
        };
        self.writer.apply_watcher_event(&event);
        notifications
    }
}

/// Watches every object of kind `K` across the cluster and forwards change notifications to a
/// single consumer.
pub struct EventWatcher<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    api: Api<K>,
    mirror: Mirror<K>,
}

impl<K> EventWatcher<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    pub fn new(client: &Client) -> Self {
        Self {
            api: Api::all(client.clone()),
            mirror: Mirror::default(),
        }
    }

    /// Watch until cancelled. Reconnects are handled by the kube watcher with its default
    /// backoff.
    pub async fn run(self, sender: mpsc::Sender<Notification<K>>, shutdown: ShutdownListener) {
        info!("Starting event watcher...");
        let stream = watcher(self.api, watcher::Config::default()).default_backoff();
        forward(stream, self.mirror, sender, shutdown).await;
    }
}

/// Pump `stream` through `mirror` into `sender`. Returns when shutdown is requested, the stream
/// ends, or the receiver is dropped.
pub async fn forward<K, S>(
    stream: S,
    mut mirror: Mirror<K>,
    sender: mpsc::Sender<Notification<K>>,
    mut shutdown: ShutdownListener,
) where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
    S: Stream<Item = Result<Event<K>, watcher::Error>>,
{
    pin_mut!(stream);
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Watch cancelled");
                return;
            }
            next = stream.next() => match next {
                Some(Ok(event)) => event,
                Some(Err(error)) => {
                    warn!("Watch stream error, retrying: {}", error);
                    continue;
                }
                None => {
                    info!("Watch stream ended");
                    return;
                }
            },
        };
        for notification in mirror.apply(event) {
            if sender.send(notification).await.is_err() {
                debug!("Notification receiver dropped, stopping watch");
                return;
            }
        }
    }
}
