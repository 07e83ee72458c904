//! Binding to the out-of-process display service.
//!
//! The IPC substrate is abstracted behind [`Binder`]: a bind request hands the
//! substrate a [`BindToken`], through which it later reports `attached` (with a
//! live [`RemoteService`] handle) or `detached`. Those reports are queued on a
//! channel and only take effect when the owner calls [`ServiceLink::dispatch`]
//! on its home thread, so no locking is needed inside the link.

use super::error::TransportFault;
use super::protocol::LaunchParams;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Calls that can be made into a bound service
pub trait RemoteService: Send {
    /// Best-effort liveness probe
    fn is_running(&mut self) -> Result<bool, TransportFault>;

    /// Ask the running service to adopt new parameters without restarting
    fn reconfigure(&mut self, params: &LaunchParams) -> Result<(), TransportFault>;
}

/// Attach/detach reports from the substrate
pub enum SubstrateEvent {
    Attached {
        generation: u64,
        remote: Box<dyn RemoteService>,
    },
    Detached {
        generation: u64,
    },
}

impl std::fmt::Debug for SubstrateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubstrateEvent::Attached { generation, .. } => {
                write!(f, "Attached {{ generation: {} }}", generation)
            }
            SubstrateEvent::Detached { generation } => {
                write!(f, "Detached {{ generation: {} }}", generation)
            }
        }
    }
}

/// Handle given to the substrate for one bind request.
///
/// Reports sent after the binding was released are dropped by the link.
#[derive(Debug, Clone)]
pub struct BindToken {
    generation: u64,
    events: Sender<SubstrateEvent>,
}

impl BindToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report that the remote is attached; returns false if the link is gone
    pub fn attached(&self, remote: Box<dyn RemoteService>) -> bool {
        self.events
            .send(SubstrateEvent::Attached {
                generation: self.generation,
                remote,
            })
            .is_ok()
    }

    /// Report that the remote went away; returns false if the link is gone
    pub fn detached(&self) -> bool {
        self.events
            .send(SubstrateEvent::Detached {
                generation: self.generation,
            })
            .is_ok()
    }
}

/// The IPC substrate: issues and releases bind requests
pub trait Binder {
    fn bind(&mut self, token: BindToken) -> Result<(), TransportFault>;

    /// Release the current binding; must not report through its token afterwards
    fn unbind(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unbound,
    /// Binding requested, remote not attached yet
    BoundDisconnected,
    Connected,
    /// Remote handle known invalid, rebind in flight
    ConnectedStale,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Unbound => write!(f, "unbound"),
            LinkState::BoundDisconnected => write!(f, "bound-disconnected"),
            LinkState::Connected => write!(f, "connected"),
            LinkState::ConnectedStale => write!(f, "connected-stale"),
        }
    }
}

/// Liveness notifications delivered to the link's listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkNotice {
    Connected,
    Disconnected,
}

pub struct ServiceLink {
    binder: Box<dyn Binder>,
    state: LinkState,
    remote: Option<Box<dyn RemoteService>>,
    /// Bumped on every bind so late reports from older bindings are ignored
    generation: u64,
    events_tx: Sender<SubstrateEvent>,
    events_rx: Receiver<SubstrateEvent>,
    listener: Option<Sender<LinkNotice>>,
}

impl ServiceLink {
    pub fn new(binder: Box<dyn Binder>) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            binder,
            state: LinkState::Unbound,
            remote: None,
            generation: 0,
            events_tx,
            events_rx,
            listener: None,
        }
    }

    /// Subscribe to liveness notifications, replacing any previous listener
    pub fn subscribe(&mut self) -> Receiver<LinkNotice> {
        let (tx, rx) = mpsc::channel();
        self.listener = Some(tx);
        rx
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Request a binding. No-op while one is already held.
    pub fn connect(&mut self) {
        if self.state != LinkState::Unbound {
            debug!(state = %self.state, "connect ignored, binding already held");
            return;
        }

        match self.issue_bind() {
            Ok(()) => self.state = LinkState::BoundDisconnected,
            Err(e) => warn!(error = %e, "bind request failed, staying unbound"),
        }
    }

    /// Release the binding. No-op while unbound.
    pub fn disconnect(&mut self) {
        if self.state == LinkState::Unbound {
            return;
        }

        self.binder.unbind();
        self.generation += 1;
        self.remote = None;
        self.state = LinkState::Unbound;
        debug!("service binding released");
    }

    /// Probe whether the service is running; transport faults read as "not running"
    pub fn query_running(&mut self) -> bool {
        if self.state != LinkState::Connected {
            return false;
        }
        let Some(remote) = self.remote.as_mut() else {
            return false;
        };

        match remote.is_running() {
            Ok(running) => running,
            Err(e) => {
                warn!(error = %e, "liveness probe failed, treating service as stopped");
                self.mark_stale();
                false
            }
        }
    }

    /// Hot-apply parameters over the live binding
    pub fn reconfigure(&mut self, params: &LaunchParams) -> Result<(), TransportFault> {
        if self.state != LinkState::Connected {
            return Err(TransportFault::NotConnected);
        }
        let remote = self.remote.as_mut().ok_or(TransportFault::NotConnected)?;

        let result = remote.reconfigure(params);
        if let Err(e) = &result {
            warn!(error = %e, "reconfigure failed");
            self.mark_stale();
        }
        result
    }

    /// Apply all queued substrate reports; returns how many took effect
    pub fn dispatch(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if self.handle_event(event) {
                handled += 1;
            }
        }
        handled
    }

    /// Block until one substrate report takes effect or the timeout passes
    pub fn wait_event(&mut self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.events_rx.recv_timeout(remaining) {
                Ok(event) => {
                    if self.handle_event(event) {
                        return true;
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false
                }
            }
        }
    }

    /// Tear down: detach listener, release binding, drop remote handle
    pub fn shutdown(&mut self) {
        self.listener = None;
        if self.state != LinkState::Unbound {
            self.binder.unbind();
            self.generation += 1;
            self.state = LinkState::Unbound;
        }
        self.remote = None;
    }

    fn handle_event(&mut self, event: SubstrateEvent) -> bool {
        match event {
            SubstrateEvent::Attached { generation, remote } => {
                if generation != self.generation || self.state == LinkState::Unbound {
                    debug!(generation, current = self.generation, "dropping stale attach");
                    return false;
                }
                self.remote = Some(remote);
                self.state = LinkState::Connected;
                info!("service attached");
                self.notify(LinkNotice::Connected);
                true
            }
            SubstrateEvent::Detached { generation } => {
                if generation != self.generation || self.state == LinkState::Unbound {
                    debug!(generation, current = self.generation, "dropping stale detach");
                    return false;
                }
                self.remote = None;
                self.state = LinkState::BoundDisconnected;
                info!("service detached, rebinding");
                // Listener hears about the loss before recovery starts
                self.notify(LinkNotice::Disconnected);
                self.rebind();
                true
            }
        }
    }

    fn mark_stale(&mut self) {
        self.remote = None;
        self.state = LinkState::ConnectedStale;
        self.rebind();
    }

    fn rebind(&mut self) {
        self.binder.unbind();
        if let Err(e) = self.issue_bind() {
            warn!(error = %e, "rebind failed, link is now unbound");
            self.generation += 1;
            self.state = LinkState::Unbound;
        }
    }

    fn issue_bind(&mut self) -> Result<(), TransportFault> {
        self.generation += 1;
        let token = BindToken {
            generation: self.generation,
            events: self.events_tx.clone(),
        };
        self.binder.bind(token)
    }

    fn notify(&mut self, notice: LinkNotice) {
        if let Some(listener) = &self.listener {
            if listener.send(notice).is_err() {
                self.listener = None;
            }
        }
    }
}

impl Drop for ServiceLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::fakes::FakeWorld;

    fn link_with_world() -> (ServiceLink, FakeWorld) {
        let world = FakeWorld::new();
        let link = ServiceLink::new(Box::new(world.binder()));
        (link, world)
    }

    #[test]
    fn test_connect_attaches_when_service_runs() {
        let (mut link, world) = link_with_world();
        world.set_running(true);
        let notices = link.subscribe();

        link.connect();
        assert_eq!(link.state(), LinkState::BoundDisconnected);
        assert_eq!(world.bind_count(), 1);

        assert_eq!(link.dispatch(), 1);
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(notices.try_recv(), Ok(LinkNotice::Connected));
        assert!(link.query_running());
    }

    #[test]
    fn test_connect_is_idempotent() {
        let (mut link, world) = link_with_world();
        world.set_running(true);
        link.connect();
        link.dispatch();
        assert_eq!(link.state(), LinkState::Connected);

        link.connect();
        link.connect();
        assert_eq!(world.bind_count(), 1);
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(link.dispatch(), 0);
    }

    #[test]
    fn test_connect_while_waiting_does_not_rebind() {
        let (mut link, world) = link_with_world();
        link.connect();
        link.connect();
        assert_eq!(world.bind_count(), 1);
        assert_eq!(link.state(), LinkState::BoundDisconnected);
        assert!(!link.query_running());
    }

    #[test]
    fn test_detach_notifies_then_rebinds() {
        let (mut link, world) = link_with_world();
        world.set_running(true);
        let notices = link.subscribe();
        link.connect();
        link.dispatch();
        let _ = notices.try_recv();

        world.crash();
        assert_eq!(link.dispatch(), 1);
        assert_eq!(link.state(), LinkState::BoundDisconnected);
        assert_eq!(notices.try_recv(), Ok(LinkNotice::Disconnected));
        // Auto-recovery issued a fresh bind without the caller asking
        assert_eq!(world.bind_count(), 2);

        world.set_running(true);
        world.attach_live();
        assert_eq!(link.dispatch(), 1);
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(notices.try_recv(), Ok(LinkNotice::Connected));
    }

    #[test]
    fn test_probe_fault_reads_as_stopped_and_marks_stale() {
        let (mut link, world) = link_with_world();
        world.set_running(true);
        link.connect();
        link.dispatch();

        world.fail_next_probe();
        assert!(!link.query_running());
        assert_eq!(link.state(), LinkState::ConnectedStale);
        assert_eq!(world.bind_count(), 2);

        // The fresh binding attaches because the service is still up
        link.dispatch();
        assert_eq!(link.state(), LinkState::Connected);
        assert!(link.query_running());
    }

    #[test]
    fn test_disconnect_ignores_late_reports() {
        let (mut link, world) = link_with_world();
        link.connect();
        let stale = world.last_token().unwrap();

        link.disconnect();
        assert_eq!(link.state(), LinkState::Unbound);
        assert_eq!(world.unbind_count(), 1);

        world.set_running(true);
        stale.attached(world.remote());
        assert_eq!(link.dispatch(), 0);
        assert_eq!(link.state(), LinkState::Unbound);
    }

    #[test]
    fn test_disconnect_when_unbound_is_noop() {
        let (mut link, world) = link_with_world();
        link.disconnect();
        assert_eq!(world.unbind_count(), 0);
    }

    #[test]
    fn test_shutdown_detaches_listener_first() {
        let (mut link, world) = link_with_world();
        world.set_running(true);
        let notices = link.subscribe();
        link.connect();
        link.dispatch();
        let _ = notices.try_recv();

        link.shutdown();
        assert_eq!(world.unbind_count(), 1);
        assert_eq!(link.state(), LinkState::Unbound);
        // Listener sender is gone
        assert_eq!(
            notices.try_recv(),
            Err(std::sync::mpsc::TryRecvError::Disconnected)
        );
    }

    #[test]
    fn test_drop_releases_binding() {
        let (mut link, world) = link_with_world();
        link.connect();
        drop(link);
        assert_eq!(world.unbind_count(), 1);
    }

    #[test]
    fn test_reconfigure_requires_connection() {
        let (mut link, world) = link_with_world();
        let params = LaunchParams::from(&crate::session::settings::Snapshot::default());
        assert!(matches!(
            link.reconfigure(&params),
            Err(TransportFault::NotConnected)
        ));

        world.set_running(true);
        link.connect();
        link.dispatch();
        link.reconfigure(&params).unwrap();
        assert_eq!(world.reconfigures().len(), 1);
    }

    #[test]
    fn test_wait_event_times_out_quietly() {
        let (mut link, _world) = link_with_world();
        link.connect();
        assert!(!link.wait_event(Duration::from_millis(20)));
    }
}
