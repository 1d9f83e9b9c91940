// MIT License - Copyright (c) 2026 Peter Wright
// Satel Integra bridge

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::error::SubscriberError;
use crate::event::{Channel, Signal};

/// Callback registered for a channel.
pub type Callback = Arc<dyn Fn(&Signal) -> Result<(), SubscriberError> + Send + Sync>;

/// A published signal together with the callbacks registered when it was published.
struct Delivery {
    signal: Signal,
    callbacks: Vec<Callback>,
}

struct ChannelSlot {
    callbacks: Vec<Callback>,
    queue: mpsc::UnboundedSender<Delivery>,
    /// Receiving end of `queue` until the channel's delivery task is spawned.
    pending: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
}

/// Publish/subscribe hub between the coordinator and presentation components.
///
/// Every channel owns a FIFO queue drained by its own task, so `publish`
/// only enqueues and returns. Within a channel, callbacks run one at a
/// time, in registration order, in the order signals were published. A
/// slow callback holds back later deliveries on its own channel only.
///
/// # Example
///
/// ```no_run
/// use satel_bridge::{Channel, EventDispatcher, Signal};
///
/// #[tokio::main]
/// async fn main() {
///     let dispatcher = EventDispatcher::new();
///     dispatcher.subscribe(Channel::ZonesUpdated, |signal| {
///         println!("zones changed: {:?}", signal.payload());
///         Ok(())
///     });
///     dispatcher.publish(Signal::ZonesUpdated(serde_json::json!({"3": 1})));
///     dispatcher.shutdown().await;
/// }
/// ```
#[derive(Default)]
pub struct EventDispatcher {
    channels: RwLock<HashMap<Channel, ChannelSlot>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for future signals on `channel`.
    ///
    /// Registering the same callback twice makes it run twice per signal.
    /// Needs no runtime; the channel's delivery task is spawned by the first
    /// `publish` made from within one.
    pub fn subscribe<F>(&self, channel: Channel, callback: F)
    where
        F: Fn(&Signal) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let slot = channels.entry(channel).or_insert_with(|| {
            let (queue, rx) = mpsc::unbounded_channel();
            ChannelSlot {
                callbacks: Vec::new(),
                queue,
                pending: Mutex::new(Some(rx)),
            }
        });
        slot.callbacks.push(Arc::new(callback));
        debug!("Subscriber #{} registered on {}", slot.callbacks.len(), channel);
    }

    /// Deliver `signal` to every callback currently registered on its channel.
    ///
    /// Never waits for callbacks and never fails; publishing on a channel
    /// without subscribers does nothing. Outside a tokio runtime the signal
    /// stays queued until a later `publish` starts the delivery task.
    pub fn publish(&self, signal: Signal) {
        let channel = signal.channel();
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = channels.get(&channel) else {
            trace!("No subscribers on {}, dropping signal", channel);
            return;
        };

        let delivery = Delivery {
            signal,
            callbacks: slot.callbacks.clone(),
        };
        if slot.queue.send(delivery).is_err() {
            error!("Delivery task for {} has stopped", channel);
            return;
        }
        self.start_worker(channel, slot);
    }

    /// Number of callbacks registered on `channel`.
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .map_or(0, |slot| slot.callbacks.len())
    }

    /// Deliver everything already published, then drop all subscribers.
    ///
    /// Waits for every channel's delivery task to finish. Later publishes
    /// are no-ops until something subscribes again.
    pub async fn shutdown(&self) {
        let slots: Vec<(Channel, ChannelSlot)> = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        // Signals queued but never started still get delivered.
        for (channel, slot) in &slots {
            self.start_worker(*channel, slot);
        }
        drop(slots);

        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Delivery task ended abnormally: {}", e);
            }
        }
        debug!("Dispatcher shut down");
    }

    fn start_worker(&self, channel: Channel, slot: &ChannelSlot) {
        let mut pending = slot.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.is_none() {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            trace!("No runtime yet, keeping {} deliveries queued", channel);
            return;
        };
        if let Some(rx) = pending.take() {
            let worker = handle.spawn(deliver(channel, rx));
            self.workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(worker);
        }
    }
}

/// Drain one channel's queue, running each delivery's callbacks in order.
async fn deliver(channel: Channel, mut rx: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(Delivery { signal, callbacks }) = rx.recv().await {
        for (index, callback) in callbacks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback(&signal))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Subscriber #{} on {} failed: {}", index + 1, channel, e);
                }
                Err(_) => {
                    error!("Subscriber #{} on {} panicked", index + 1, channel);
                }
            }
        }
        // Let other tasks run between deliveries of a busy channel.
        tokio::task::yield_now().await;
    }
    debug!("Delivery task for {} finished", channel);
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::time::{timeout, Duration};

    use super::*;

    type Seen = mpsc::UnboundedReceiver<(&'static str, Signal)>;

    fn recorder(
        dispatcher: &EventDispatcher,
        channel: Channel,
        name: &'static str,
        tx: &mpsc::UnboundedSender<(&'static str, Signal)>,
    ) {
        let tx = tx.clone();
        dispatcher.subscribe(channel, move |signal| {
            tx.send((name, signal.clone()))?;
            Ok(())
        });
    }

    async fn next(rx: &mut Seen) -> (&'static str, Signal) {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delivery timed out")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_delivers_payload_unchanged_once() {
        let dispatcher = EventDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        recorder(&dispatcher, Channel::ZonesUpdated, "a", &tx);

        dispatcher.publish(Signal::ZonesUpdated(json!({"3": "violated"})));

        let (_, signal) = next(&mut rx).await;
        assert_eq!(signal, Signal::ZonesUpdated(json!({"3": "violated"})));
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_registration_order() {
        let dispatcher = EventDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        recorder(&dispatcher, Channel::OutputsUpdated, "first", &tx);
        recorder(&dispatcher, Channel::OutputsUpdated, "second", &tx);

        dispatcher.publish(Signal::OutputsUpdated(json!({"1": 1})));
        dispatcher.publish(Signal::OutputsUpdated(json!({"1": 0})));

        let order: Vec<(&str, Signal)> = vec![
            next(&mut rx).await,
            next(&mut rx).await,
            next(&mut rx).await,
            next(&mut rx).await,
        ];
        assert_eq!(order[0], ("first", Signal::OutputsUpdated(json!({"1": 1}))));
        assert_eq!(order[1], ("second", Signal::OutputsUpdated(json!({"1": 1}))));
        assert_eq!(order[2], ("first", Signal::OutputsUpdated(json!({"1": 0}))));
        assert_eq!(order[3], ("second", Signal::OutputsUpdated(json!({"1": 0}))));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let dispatcher = EventDispatcher::new();
        dispatcher.publish(Signal::PanelStatus);
        assert_eq!(dispatcher.subscriber_count(Channel::PanelStatus), 0);
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let dispatcher = EventDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        recorder(&dispatcher, Channel::ZonesUpdated, "zones", &tx);
        recorder(&dispatcher, Channel::OutputsUpdated, "outputs", &tx);

        dispatcher.publish(Signal::ZonesUpdated(json!({"3": 1})));

        assert_eq!(next(&mut rx).await.0, "zones");
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_failing_subscriber_is_isolated() {
        let dispatcher = EventDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher.subscribe(Channel::PanelStatus, |_| Err("display offline".into()));
        dispatcher.subscribe(Channel::PanelStatus, |_| panic!("broken subscriber"));
        recorder(&dispatcher, Channel::PanelStatus, "healthy", &tx);

        dispatcher.publish(Signal::PanelStatus);
        dispatcher.publish(Signal::PanelStatus);

        assert_eq!(next(&mut rx).await, ("healthy", Signal::PanelStatus));
        assert_eq!(next(&mut rx).await, ("healthy", Signal::PanelStatus));
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscribers() {
        let dispatcher = EventDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        recorder(&dispatcher, Channel::ZonesUpdated, "early", &tx);
        dispatcher.publish(Signal::ZonesUpdated(json!({"1": 1})));
        assert_eq!(next(&mut rx).await.0, "early");

        recorder(&dispatcher, Channel::ZonesUpdated, "late", &tx);
        dispatcher.publish(Signal::ZonesUpdated(json!({"1": 0})));

        let a = next(&mut rx).await;
        let b = next(&mut rx).await;
        assert_eq!(a, ("early", Signal::ZonesUpdated(json!({"1": 0}))));
        assert_eq!(b, ("late", Signal::ZonesUpdated(json!({"1": 0}))));
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_repeated_registration_repeats_delivery() {
        let dispatcher = EventDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        recorder(&dispatcher, Channel::PanelStatus, "same", &tx);
        recorder(&dispatcher, Channel::PanelStatus, "same", &tx);
        assert_eq!(dispatcher.subscriber_count(Channel::PanelStatus), 2);

        dispatcher.publish(Signal::PanelStatus);
        assert_eq!(next(&mut rx).await.0, "same");
        assert_eq!(next(&mut rx).await.0, "same");
    }

    #[test]
    fn test_subscribe_outside_runtime() {
        let dispatcher = EventDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        recorder(&dispatcher, Channel::ZonesUpdated, "early", &tx);
        // Queued before any runtime exists.
        dispatcher.publish(Signal::ZonesUpdated(json!({"1": 1})));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            dispatcher.publish(Signal::ZonesUpdated(json!({"1": 0})));
            assert_eq!(next(&mut rx).await.1, Signal::ZonesUpdated(json!({"1": 1})));
            assert_eq!(next(&mut rx).await.1, Signal::ZonesUpdated(json!({"1": 0})));
            dispatcher.shutdown().await;
        });
    }

    #[tokio::test]
    async fn test_shutdown_delivers_queued_signals() {
        let dispatcher = EventDispatcher::new();
        let delivered = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = delivered.clone();
        dispatcher.subscribe(Channel::OutputsUpdated, move |_| {
            std::thread::sleep(Duration::from_millis(10));
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });

        for state in 0..3 {
            dispatcher.publish(Signal::OutputsUpdated(json!({"2": state})));
        }
        timeout(Duration::from_secs(2), dispatcher.shutdown())
            .await
            .expect("shutdown timed out");

        assert_eq!(delivered.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(dispatcher.subscriber_count(Channel::OutputsUpdated), 0);
        dispatcher.publish(Signal::OutputsUpdated(json!({"2": 9})));
    }
}
