//! Session reconciliation between local settings and the running service.
//!
//! [`SessionController`] owns the pending snapshot, classifies each edit against
//! the last persisted snapshot, and decides what the single user-facing action
//! is. Liveness events from the [`ServiceLink`] override whatever an edit
//! decided; they are applied only from [`SessionController::pump`] and friends,
//! on the owner's thread.

use super::error::SettingError;
use super::launcher::ServiceLauncher;
use super::link::{LinkNotice, LinkState, ServiceLink};
use super::protocol::LaunchParams;
use super::settings::{ChangeClass, SettingEdit, SettingKey, Snapshot};
use super::store::ConfigStore;
use std::sync::mpsc::Receiver;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What activating the control does next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Apply,
    RestartApply,
}

impl ServiceAction {
    /// Escalate for an edit made while the service runs.
    /// `RestartApply` is never downgraded; an edit that changes nothing keeps the label.
    fn escalate(self, class: ChangeClass) -> ServiceAction {
        match (self, class) {
            (ServiceAction::RestartApply, _) => ServiceAction::RestartApply,
            (_, ChangeClass::RequiresRestart) => ServiceAction::RestartApply,
            (_, ChangeClass::HotApplicable) => ServiceAction::Apply,
            (current, ChangeClass::None) => current,
        }
    }
}

impl std::fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceAction::Start => write!(f, "Start"),
            ServiceAction::Stop => write!(f, "Stop"),
            ServiceAction::Apply => write!(f, "Apply"),
            ServiceAction::RestartApply => write!(f, "Restart & apply"),
        }
    }
}

/// The control whose label the controller drives
pub trait ActionSurface {
    fn show(&mut self, action: ServiceAction);
}

pub struct SessionController {
    store: Box<dyn ConfigStore>,
    launcher: Box<dyn ServiceLauncher>,
    link: ServiceLink,
    notices: Receiver<LinkNotice>,
    persisted: Snapshot,
    pending: Snapshot,
    action: ServiceAction,
    surface: Option<Box<dyn ActionSurface>>,
}

impl SessionController {
    /// Load settings, bind to the service and derive the initial action
    pub fn new(
        store: Box<dyn ConfigStore>,
        launcher: Box<dyn ServiceLauncher>,
        mut link: ServiceLink,
    ) -> Self {
        let persisted = store.load_snapshot();
        let notices = link.subscribe();
        link.connect();

        let mut controller = Self {
            store,
            launcher,
            link,
            notices,
            persisted,
            pending: persisted,
            action: ServiceAction::Start,
            surface: None,
        };
        // A substrate that attaches synchronously already produced a notice
        if controller.pump() == 0 {
            controller.refresh_from_liveness();
        }
        controller
    }

    /// Attach the control; it is shown the current action immediately
    pub fn set_surface(&mut self, mut surface: Box<dyn ActionSurface>) {
        surface.show(self.action);
        self.surface = Some(surface);
    }

    pub fn action(&self) -> ServiceAction {
        self.action
    }

    pub fn pending(&self) -> &Snapshot {
        &self.pending
    }

    pub fn persisted(&self) -> &Snapshot {
        &self.persisted
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Apply one setting edit and return the resulting action.
    ///
    /// Invalid edits are rejected without touching any state.
    pub fn edit(&mut self, edit: SettingEdit) -> Result<ServiceAction, SettingError> {
        edit.validate()?;

        let next = self.pending.with_edit(edit);
        if next == self.pending {
            return Ok(self.action);
        }
        self.pending = next;

        if !self.link.query_running() {
            debug!(?edit, "service not running, persisting edit");
            self.persist();
            self.set_action(ServiceAction::Start);
            return Ok(self.action);
        }

        let class = self.persisted.classify_change(&self.pending);
        debug!(?edit, ?class, "edit while running");
        self.set_action(self.action.escalate(class));
        Ok(self.action)
    }

    /// Parse `raw` for the named setting and apply it
    pub fn edit_raw(&mut self, key: &str, raw: &str) -> Result<ServiceAction, SettingError> {
        let key: SettingKey = key.parse()?;
        let edit = SettingEdit::parse(key, raw, &self.pending)?;
        self.edit(edit)
    }

    /// Perform the current action
    pub fn activate(&mut self) -> ServiceAction {
        info!(action = %self.action, "activating");
        match self.action {
            ServiceAction::Start => self.start(),
            ServiceAction::Stop => self.stop(),
            ServiceAction::Apply => self.apply(),
            ServiceAction::RestartApply => self.restart_apply(),
        }
        self.action
    }

    /// Handle queued link events; returns how many liveness notices arrived
    pub fn pump(&mut self) -> usize {
        self.link.dispatch();

        let mut notices = 0;
        while let Ok(notice) = self.notices.try_recv() {
            debug!(?notice, "link notice");
            notices += 1;
        }
        if notices > 0 {
            self.refresh_from_liveness();
        }
        notices
    }

    /// Block until a link event takes effect or `timeout` passes
    pub fn wait_for_event(&mut self, timeout: Duration) -> bool {
        if !self.link.wait_event(timeout) {
            return false;
        }
        self.pump();
        true
    }

    /// Handle events until none arrives for `quiet`; returns how many were handled
    pub fn settle(&mut self, quiet: Duration) -> usize {
        let mut handled = 0;
        while self.wait_for_event(quiet) {
            handled += 1;
        }
        handled
    }

    /// Detach the control and release the binding
    pub fn shutdown(&mut self) {
        self.surface = None;
        self.link.shutdown();
    }

    fn start(&mut self) {
        let params = LaunchParams::from(&self.persisted);
        match self.launcher.launch(&params) {
            Ok(()) => {
                self.link.connect();
                self.set_action(ServiceAction::Stop);
            }
            Err(e) => {
                warn!(error = %e, "failed to start service");
                self.set_action(ServiceAction::Start);
            }
        }
    }

    fn stop(&mut self) {
        if let Err(e) = self.launcher.terminate() {
            warn!(error = %e, "failed to stop service");
        }
        self.set_action(ServiceAction::Start);
    }

    fn apply(&mut self) {
        self.persist();
        let params = LaunchParams::from(&self.persisted);

        let applied = match self.link.reconfigure(&params) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "hot apply unavailable, re-launching with new parameters");
                match self.launcher.launch(&params) {
                    Ok(()) => {
                        self.link.connect();
                        true
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to apply settings");
                        false
                    }
                }
            }
        };

        self.set_action(if applied {
            ServiceAction::Stop
        } else {
            ServiceAction::Start
        });
    }

    fn restart_apply(&mut self) {
        self.link.disconnect();
        if let Err(e) = self.launcher.terminate() {
            warn!(error = %e, "failed to stop service before restart");
        }
        self.persist();
        self.start();
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.set(&self.pending) {
            error!(error = %e, "failed to persist settings");
        }
        self.persisted = self.pending;
    }

    fn refresh_from_liveness(&mut self) {
        let action = if self.link.query_running() {
            ServiceAction::Stop
        } else {
            ServiceAction::Start
        };
        self.set_action(action);
    }

    fn set_action(&mut self, action: ServiceAction) {
        if action != self.action {
            debug!(from = %self.action, to = %action, "action changed");
        }
        self.action = action;
        if let Some(surface) = self.surface.as_mut() {
            surface.show(action);
        }
    }
}
