//! In-process publish/subscribe bus with request/response services.
//!
//! Topics are latest-value channels: a subscriber that falls behind only sees
//! the newest message, which is the queue-depth-1 behaviour sensor streams
//! want. Services are synchronous handlers looked up by name.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::debug;

use crate::error::BusError;
use crate::msg::{Empty, Message};

/// Handler behind a service name.
pub type ServiceHandler = Arc<dyn Fn(Empty) -> Result<Empty, BusError> + Send + Sync>;

/// Synchronous publish capability.
///
/// The simulation loop publishes through this trait so tests can substitute
/// a recording sink for a bus topic.
pub trait Publish<T>: Send + Sync {
    /// Hand one message to the transport.
    fn publish(&self, msg: T) -> Result<(), BusError>;
}

struct TopicEntry {
    type_name: &'static str,
    sender: Arc<dyn Any + Send + Sync>,
}

#[derive(Default)]
struct BusInner {
    topics: Mutex<HashMap<String, TopicEntry>>,
    services: Mutex<HashMap<String, ServiceHandler>>,
}

/// Shared handle to the bus. Clones refer to the same topics and services.
#[derive(Clone, Default)]
pub struct Bus {
    inner: Arc<BusInner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Bus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    fn channel<T: Message>(&self, topic: &str) -> Result<Arc<watch::Sender<Option<T>>>, BusError> {
        let mut topics = lock(&self.inner.topics);
        let entry = topics.entry(topic.to_string()).or_insert_with(|| {
            debug!("creating topic {topic} ({})", T::TYPE_NAME);
            let (tx, _rx) = watch::channel::<Option<T>>(None);
            TopicEntry {
                type_name: T::TYPE_NAME,
                sender: Arc::new(tx),
            }
        });
        let found = entry.type_name;
        Arc::clone(&entry.sender)
            .downcast::<watch::Sender<Option<T>>>()
            .map_err(|_| BusError::TypeMismatch {
                topic: topic.to_string(),
                expected: T::TYPE_NAME,
                found,
            })
    }

    /// Open the publishing side of a topic.
    pub fn advertise<T: Message>(&self, topic: &str) -> Result<Publisher<T>, BusError> {
        Ok(Publisher {
            topic: topic.to_string(),
            sender: self.channel(topic)?,
        })
    }

    /// Open the receiving side of a topic. Only messages published after this
    /// call are reported as new.
    pub fn subscribe<T: Message>(&self, topic: &str) -> Result<Subscriber<T>, BusError> {
        Ok(Subscriber {
            topic: topic.to_string(),
            receiver: self.channel::<T>(topic)?.subscribe(),
        })
    }

    /// Names of the topics created so far, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner.topics).keys().cloned().collect();
        names.sort();
        names
    }

    /// Register a service handler.
    pub fn advertise_service<F>(&self, name: &str, handler: F) -> Result<(), BusError>
    where
        F: Fn(Empty) -> Result<Empty, BusError> + Send + Sync + 'static,
    {
        let mut services = lock(&self.inner.services);
        if services.contains_key(name) {
            return Err(BusError::DuplicateService(name.to_string()));
        }
        debug!("advertising service {name}");
        services.insert(name.to_string(), Arc::new(handler));
        Ok(())
    }

    /// Remove a service handler. Returns whether one was registered.
    pub fn unadvertise_service(&self, name: &str) -> bool {
        lock(&self.inner.services).remove(name).is_some()
    }

    /// Call a service and wait for its response.
    ///
    /// The handler runs on the calling thread, outside the bus lock.
    pub fn call_service(&self, name: &str, request: Empty) -> Result<Empty, BusError> {
        let handler = lock(&self.inner.services)
            .get(name)
            .cloned()
            .ok_or_else(|| BusError::UnknownService(name.to_string()))?;
        handler(request)
    }

    /// Names of the registered services, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner.services).keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("topics", &self.topics())
            .field("services", &self.services())
            .finish()
    }
}

/// Publishing side of a topic.
#[derive(Clone)]
pub struct Publisher<T> {
    topic: String,
    sender: Arc<watch::Sender<Option<T>>>,
}

impl<T: Message> Publisher<T> {
    /// Topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Message> Publish<T> for Publisher<T> {
    fn publish(&self, msg: T) -> Result<(), BusError> {
        // Replaces the previous sample even when nobody is listening.
        self.sender.send_replace(Some(msg));
        Ok(())
    }
}

/// Receiving side of a topic.
pub struct Subscriber<T> {
    topic: String,
    receiver: watch::Receiver<Option<T>>,
}

impl<T: Message> Subscriber<T> {
    /// Topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Newest message ever published, seen or not.
    pub fn latest(&self) -> Option<T> {
        self.receiver.borrow().clone()
    }

    /// Newest message if one arrived since the last `take_new` or `recv`.
    pub fn take_new(&mut self) -> Option<T> {
        match self.receiver.has_changed() {
            Ok(true) => self.receiver.borrow_and_update().clone(),
            _ => None,
        }
    }

    /// Wait for the next message.
    pub async fn recv(&mut self) -> Result<T, BusError> {
        loop {
            self.receiver
                .changed()
                .await
                .map_err(|_| BusError::Closed(self.topic.clone()))?;
            let current = self.receiver.borrow_and_update().clone();
            if let Some(msg) = current {
                return Ok(msg);
            }
        }
    }
}
