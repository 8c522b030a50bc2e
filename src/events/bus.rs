//! Per-entity change topics with a dedicated delivery thread.
//!
//! Publishers hand committed change sets to the delivery thread and
//! return immediately; the thread fans each set out to the entity's live
//! subscribers in publish order. Subscriber channels are unbounded, so a
//! slow subscriber delays nobody. Closing the bus delivers one terminal
//! `Err(StoreDestroyed)` to every subscriber, after everything published
//! before the close.

use super::types::{ChangeSet, Observer};
use crate::error::{Result, StoreError};
use crate::record::Record;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

type DeliveryJob = Box<dyn FnOnce() + Send>;

struct Subscriber<R: Record> {
    sender: Sender<Result<ChangeSet<R>>>,
    id_filter: Option<String>,
}

/// All subscribers of one entity type.
struct Topic<R: Record> {
    subscribers: Mutex<Vec<Subscriber<R>>>,
}

impl<R: Record> Topic<R> {
    fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Fan a change set out, dropping disconnected subscribers.
    fn deliver(&self, set: &ChangeSet<R>) {
        self.subscribers.lock().retain(|subscriber| {
            let item = match &subscriber.id_filter {
                Some(id) => {
                    let filtered = set.filtered_to_id(id);
                    if filtered.is_empty() {
                        return true;
                    }
                    filtered
                }
                None => set.clone(),
            };
            if subscriber.sender.send(Ok(item)).is_err() {
                tracing::debug!(entity = R::entity_name(), "dropping disconnected subscriber");
                return false;
            }
            true
        });
    }
}

trait AnyTopic: Send + Sync {
    /// Deliver the terminal error and detach all subscribers.
    fn close(&self);
    fn as_any(&self) -> &dyn Any;
}

impl<R: Record> AnyTopic for Topic<R> {
    fn close(&self) {
        for subscriber in self.subscribers.lock().drain(..) {
            let _ = subscriber.sender.send(Err(StoreError::StoreDestroyed));
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct BusState {
    /// Entity tag -> topic. Topics are created lazily on first observe
    /// and retained for the bus lifetime, even at zero subscribers.
    topics: HashMap<&'static str, Arc<dyn AnyTopic>>,
    closed: bool,
}

pub(crate) struct ChangeBus {
    state: RwLock<BusState>,
    delivery: Mutex<Option<Sender<DeliveryJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeBus {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = unbounded::<DeliveryJob>();
        let worker = std::thread::Builder::new()
            .name("livestore-delivery".to_string())
            .spawn(move || {
                for job in receiver {
                    job();
                }
            })
            .expect("failed to spawn delivery thread");
        Self {
            state: RwLock::new(BusState {
                topics: HashMap::new(),
                closed: false,
            }),
            delivery: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Subscribe to an entity's change stream, optionally filtered to a
    /// single record id.
    pub(crate) fn observe<R: Record>(&self, id_filter: Option<String>) -> Observer<R> {
        let (sender, receiver) = unbounded();
        let mut state = self.state.write();
        if state.closed {
            let _ = sender.send(Err(StoreError::StoreDestroyed));
            return Observer { receiver };
        }

        let topic = state
            .topics
            .entry(R::entity_name())
            .or_insert_with(|| Arc::new(Topic::<R>::new()) as Arc<dyn AnyTopic>);
        let topic = topic
            .as_any()
            .downcast_ref::<Topic<R>>()
            .unwrap_or_else(|| {
                panic!(
                    "entity tag '{}' is registered by two record types",
                    R::entity_name()
                )
            });
        topic.subscribers.lock().push(Subscriber { sender, id_filter });
        Observer { receiver }
    }

    /// Hand a committed change set to the delivery thread. Empty sets
    /// and entities nobody ever observed are dropped here.
    pub(crate) fn publish<R: Record>(&self, set: ChangeSet<R>) {
        if set.is_empty() {
            return;
        }
        let topic = {
            let state = self.state.read();
            if state.closed {
                return;
            }
            let Some(topic) = state.topics.get(R::entity_name()) else {
                return;
            };
            Arc::clone(topic)
        };
        self.enqueue(Box::new(move || {
            if let Some(topic) = topic.as_any().downcast_ref::<Topic<R>>() {
                topic.deliver(&set);
            }
        }));
    }

    /// Deliver the terminal error to every subscriber, after everything
    /// already published, and poison future observers.
    pub(crate) fn close(&self) {
        let topics: Vec<Arc<dyn AnyTopic>> = {
            let mut state = self.state.write();
            if state.closed {
                return;
            }
            state.closed = true;
            state.topics.values().map(Arc::clone).collect()
        };
        self.enqueue(Box::new(move || {
            for topic in topics {
                topic.close();
            }
        }));
    }

    fn enqueue(&self, job: DeliveryJob) {
        if let Some(sender) = self.delivery.lock().as_ref() {
            let _ = sender.send(job);
        }
    }
}

impl Drop for ChangeBus {
    fn drop(&mut self) {
        // Disconnect the channel so the delivery thread drains and exits.
        self.delivery.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}
