// MIT License - Copyright (c) 2026 Peter Wright
// Satel Integra bridge

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::config::{InstallationConfig, MonitoredOutput, OutputId};
use crate::dispatcher::EventDispatcher;
use crate::error::{Result, SatelError};
use crate::event::DecodedEvent;
use crate::link::{LinkSettings, PanelLink};

/// Lifecycle of a [`ConnectionCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// Why the keep-alive and monitor tasks stopped, if they did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    Running,
    /// `stop()` was called.
    Shutdown,
    /// The link failed or its status stream ended.
    LinkLost,
}

/// The link together with its close-once guard.
///
/// `stop()` and the tasks reacting to link loss may both try to close the
/// link; only the first call reaches it.
struct OwnedLink<L> {
    link: Arc<L>,
    closed: AtomicBool,
}

impl<L: PanelLink> OwnedLink<L> {
    fn new(link: L) -> Self {
        Self {
            link: Arc::new(link),
            closed: AtomicBool::new(false),
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.link.close().await;
        }
    }
}

struct Inner<L> {
    state: CoordinatorState,
    link: Option<Arc<OwnedLink<L>>>,
    monitored_outputs: Vec<(OutputId, MonitoredOutput)>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns the single panel link and turns its status frames into dispatcher signals.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use satel_bridge::{Channel, ConnectionCoordinator, EventDispatcher, GatewayLink, InstallationConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = InstallationConfig::from_toml_str(r#"host = "192.168.1.20""#)?;
///     let coordinator = ConnectionCoordinator::new(Arc::new(EventDispatcher::new()));
///     coordinator.start(&config, GatewayLink::new).await?;
///
///     coordinator.dispatcher().subscribe(Channel::ZonesUpdated, |signal| {
///         println!("zones: {:?}", signal.payload());
///         Ok(())
///     });
///
///     tokio::signal::ctrl_c().await?;
///     coordinator.stop().await;
///     Ok(())
/// }
/// ```
pub struct ConnectionCoordinator<L: PanelLink> {
    dispatcher: Arc<EventDispatcher>,
    inner: Mutex<Inner<L>>,
    halt: Arc<watch::Sender<Halt>>,
}

impl<L: PanelLink> ConnectionCoordinator<L> {
    pub fn new(dispatcher: Arc<EventDispatcher>) -> Self {
        let (halt, _) = watch::channel(Halt::Running);
        Self {
            dispatcher,
            inner: Mutex::new(Inner {
                state: CoordinatorState::Idle,
                link: None,
                monitored_outputs: Vec::new(),
                tasks: Vec::new(),
            }),
            halt: Arc::new(halt),
        }
    }

    /// Build the link from `config`, connect it and start monitoring.
    ///
    /// Connecting is bounded by the configured connect timeout. On failure
    /// the link is closed, no task is spawned and the coordinator ends up
    /// `Closed`; callers should abort startup. Must be called from within a
    /// tokio runtime.
    pub async fn start<F>(&self, config: &InstallationConfig, make_link: F) -> Result<()>
    where
        F: FnOnce(LinkSettings) -> L,
    {
        {
            let mut inner = self.lock();
            if inner.state != CoordinatorState::Idle {
                return Err(SatelError::AlreadyStarted);
            }
            inner.state = CoordinatorState::Connecting;
        }

        let settings = LinkSettings::from_config(config);
        let monitored_outputs = settings.outputs.clone();
        let link = Arc::new(OwnedLink::new(make_link(settings)));

        debug!("Connecting to panel at {}:{}", config.host, config.port);
        let connected = match timeout(config.connect_timeout(), link.link.connect()).await {
            Ok(result) => result,
            Err(_) => Err(SatelError::ConnectionTimeout {
                host: config.host.clone(),
                port: config.port,
                timeout_ms: config.connect_timeout_ms,
            }),
        };

        if let Err(e) = connected {
            error!("Cannot establish panel connection: {}", e);
            link.close().await;
            let mut inner = self.lock();
            inner.state = CoordinatorState::Closed;
            inner.link = Some(link);
            return Err(e);
        }

        let started = {
            let mut inner = self.lock();
            // stop() may have run while we were connecting.
            if inner.state == CoordinatorState::Connecting {
                let keep_alive = supervise(
                    "keep-alive",
                    link.clone(),
                    self.halt.clone(),
                    keep_alive_task(link.clone(), self.halt.clone()),
                );
                let monitor = supervise(
                    "monitor",
                    link.clone(),
                    self.halt.clone(),
                    monitor_task(link.clone(), self.dispatcher.clone(), self.halt.clone()),
                );
                inner.state = CoordinatorState::Connected;
                inner.link = Some(link.clone());
                inner.monitored_outputs = monitored_outputs;
                inner.tasks = vec![keep_alive, monitor];
                true
            } else {
                false
            }
        };

        if !started {
            link.close().await;
            return Err(SatelError::LinkClosed);
        }
        info!("Panel connected, monitoring started");
        Ok(())
    }

    /// Stop both tasks and close the link.
    ///
    /// Waits for the keep-alive and monitor tasks to finish. Calling it
    /// again, or while another call is in progress, does nothing.
    pub async fn stop(&self) {
        let (link, tasks) = {
            let mut inner = self.lock();
            match inner.state {
                CoordinatorState::Closing | CoordinatorState::Closed => {
                    debug!("Coordinator already stopped");
                    return;
                }
                CoordinatorState::Idle | CoordinatorState::Connecting => {
                    inner.state = CoordinatorState::Closed;
                    self.raise(Halt::Shutdown);
                    return;
                }
                CoordinatorState::Connected => {
                    inner.state = CoordinatorState::Closing;
                    (inner.link.clone(), std::mem::take(&mut inner.tasks))
                }
            }
        };

        info!("Stopping panel coordinator");
        self.raise(Halt::Shutdown);
        if let Some(link) = link {
            link.close().await;
        }
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Coordinator task ended abnormally: {}", e);
            }
        }

        self.lock().state = CoordinatorState::Closed;
        info!("Panel coordinator stopped");
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn state(&self) -> CoordinatorState {
        self.lock().state
    }

    /// True between a successful connect and either `stop()` or link loss.
    pub fn is_running(&self) -> bool {
        self.state() == CoordinatorState::Connected && *self.halt.borrow() == Halt::Running
    }

    /// The link, once `start` has created it.
    pub fn link(&self) -> Option<Arc<L>> {
        self.lock().link.as_ref().map(|owned| owned.link.clone())
    }

    /// Outputs then switchable outputs, as computed when the link was started.
    pub fn monitored_outputs(&self) -> Vec<(OutputId, MonitoredOutput)> {
        self.lock().monitored_outputs.clone()
    }

    pub fn halt_reason(&self) -> Halt {
        *self.halt.borrow()
    }

    /// Resolve once the tasks have been told to stop, returning why.
    pub async fn wait_for_halt(&self) -> Halt {
        let mut rx = self.halt.subscribe();
        halted(&mut rx).await
    }

    fn raise(&self, reason: Halt) -> bool {
        raise(&self.halt, reason)
    }

    fn lock(&self) -> MutexGuard<'_, Inner<L>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Record the first halt reason; later ones are ignored.
fn raise(halt: &watch::Sender<Halt>, reason: Halt) -> bool {
    halt.send_if_modified(|current| {
        if *current == Halt::Running {
            *current = reason;
            true
        } else {
            false
        }
    })
}

async fn halted(rx: &mut watch::Receiver<Halt>) -> Halt {
    match rx.wait_for(|h| *h != Halt::Running).await {
        Ok(reason) => *reason,
        // The sender is owned by the coordinator, which outlives its tasks.
        Err(_) => Halt::Shutdown,
    }
}

/// Run a coordinator task, treating a panic inside it as link loss.
fn supervise<L, F>(
    name: &'static str,
    link: Arc<OwnedLink<L>>,
    halt: Arc<watch::Sender<Halt>>,
    task: F,
) -> JoinHandle<()>
where
    L: PanelLink,
    F: Future<Output = ()> + Send + 'static,
{
    let inner = tokio::spawn(task);
    tokio::spawn(async move {
        if let Err(e) = inner.await {
            if raise(&halt, Halt::LinkLost) {
                error!("Panel {} task failed, link lost: {}", name, e);
            }
            link.close().await;
        }
    })
}

async fn keep_alive_task<L: PanelLink>(
    link: Arc<OwnedLink<L>>,
    halt: Arc<watch::Sender<Halt>>,
) {
    let mut halt_rx = halt.subscribe();
    let result = tokio::select! {
        biased;
        _ = halted(&mut halt_rx) => {
            debug!("Keep-alive task stopping");
            return;
        }
        result = link.link.run_keep_alive() => result,
    };

    match result {
        Ok(()) => {
            if raise(&halt, Halt::LinkLost) {
                error!("Panel link closed underneath the keep-alive task");
            }
        }
        Err(e) => {
            if raise(&halt, Halt::LinkLost) {
                if e.is_link_failure() {
                    error!("Keep-alive failed, panel link lost: {}", e);
                } else {
                    warn!("Keep-alive stopped: {}", e);
                }
            }
        }
    }
    link.close().await;
}

async fn monitor_task<L: PanelLink>(
    link: Arc<OwnedLink<L>>,
    dispatcher: Arc<EventDispatcher>,
    halt: Arc<watch::Sender<Halt>>,
) {
    let mut halt_rx = halt.subscribe();
    loop {
        let event = tokio::select! {
            biased;
            _ = halted(&mut halt_rx) => {
                debug!("Monitor task stopping");
                return;
            }
            event = link.link.next_event() => event,
        };

        match event {
            Some(event) => dispatch(&dispatcher, event),
            None => {
                if raise(&halt, Halt::LinkLost) {
                    error!("Panel status stream ended, link lost");
                }
                link.close().await;
                return;
            }
        }
    }
}

/// Publish the signal a decoded frame announces; unrecognized frames are dropped.
pub(crate) fn dispatch(dispatcher: &EventDispatcher, event: DecodedEvent) {
    match event.classify() {
        Some(signal) => {
            debug!("Panel update on {}: {:?}", signal.channel(), signal.payload());
            dispatcher.publish(signal);
        }
        None => trace!("Ignoring unrecognized panel frame"),
    }
}
