// In-process stand-ins for the IPC substrate, the remote service and its launcher
// Only compiled for tests; all three share one FakeWorld

use super::error::{LaunchError, TransportFault};
use super::launcher::ServiceLauncher;
use super::link::{BindToken, Binder, RemoteService};
use super::protocol::{
    deserialize_message, serialize_message, LaunchParams, ServiceRequest, ServiceResponse,
    PROTOCOL_VERSION,
};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixListener;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct WorldState {
    running: bool,
    live_token: Option<BindToken>,
    bind_count: usize,
    unbind_count: usize,
    fail_next_probe: bool,
    probe_count: usize,
    launches: Vec<LaunchParams>,
    reconfigures: Vec<LaunchParams>,
    terminate_count: usize,
    fail_launch: bool,
}

/// Shared simulated world: one service process and one substrate
#[derive(Clone, Default)]
pub struct FakeWorld {
    state: Arc<Mutex<WorldState>>,
}

impl FakeWorld {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap()
    }

    pub fn binder(&self) -> FakeBinder {
        FakeBinder {
            world: self.clone(),
        }
    }

    pub fn launcher(&self) -> FakeLauncher {
        FakeLauncher {
            world: self.clone(),
        }
    }

    pub fn remote(&self) -> Box<dyn RemoteService> {
        Box::new(FakeRemote {
            world: self.clone(),
        })
    }

    pub fn set_running(&self, running: bool) {
        self.lock().running = running;
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Service dies on its own; the live binding sees a detach
    pub fn crash(&self) {
        let token = {
            let mut state = self.lock();
            state.running = false;
            state.live_token.clone()
        };
        if let Some(token) = token {
            token.detached();
        }
    }

    /// Substrate attaches the current binding
    pub fn attach_live(&self) {
        if let Some(token) = self.last_token() {
            token.attached(self.remote());
        }
    }

    pub fn last_token(&self) -> Option<BindToken> {
        self.lock().live_token.clone()
    }

    pub fn fail_next_probe(&self) {
        self.lock().fail_next_probe = true;
    }

    pub fn fail_launches(&self) {
        self.lock().fail_launch = true;
    }

    pub fn bind_count(&self) -> usize {
        self.lock().bind_count
    }

    pub fn unbind_count(&self) -> usize {
        self.lock().unbind_count
    }

    pub fn probe_count(&self) -> usize {
        self.lock().probe_count
    }

    pub fn launches(&self) -> Vec<LaunchParams> {
        self.lock().launches.clone()
    }

    pub fn reconfigures(&self) -> Vec<LaunchParams> {
        self.lock().reconfigures.clone()
    }

    pub fn terminate_count(&self) -> usize {
        self.lock().terminate_count
    }
}

pub struct FakeBinder {
    world: FakeWorld,
}

impl Binder for FakeBinder {
    fn bind(&mut self, token: BindToken) -> Result<(), TransportFault> {
        let running = {
            let mut state = self.world.lock();
            state.bind_count += 1;
            state.live_token = Some(token.clone());
            state.running
        };
        if running {
            token.attached(self.world.remote());
        }
        Ok(())
    }

    fn unbind(&mut self) {
        let mut state = self.world.lock();
        state.unbind_count += 1;
        state.live_token = None;
    }
}

pub struct FakeRemote {
    world: FakeWorld,
}

impl RemoteService for FakeRemote {
    fn is_running(&mut self) -> Result<bool, TransportFault> {
        let mut state = self.world.lock();
        state.probe_count += 1;
        if std::mem::take(&mut state.fail_next_probe) {
            return Err(TransportFault::Closed);
        }
        Ok(state.running)
    }

    fn reconfigure(&mut self, params: &LaunchParams) -> Result<(), TransportFault> {
        let mut state = self.world.lock();
        if !state.running {
            return Err(TransportFault::Closed);
        }
        state.reconfigures.push(params.clone());
        Ok(())
    }
}

pub struct FakeLauncher {
    world: FakeWorld,
}

impl ServiceLauncher for FakeLauncher {
    fn launch(&mut self, params: &LaunchParams) -> Result<(), LaunchError> {
        let token = {
            let mut state = self.world.lock();
            if state.fail_launch {
                return Err(LaunchError::BinaryNotFound);
            }
            state.launches.push(params.clone());
            if state.running {
                // Duplicate start coalesces into the running process
                state.reconfigures.push(params.clone());
                None
            } else {
                state.running = true;
                state.live_token.clone()
            }
        };
        if let Some(token) = token {
            token.attached(self.world.remote());
        }
        Ok(())
    }

    fn terminate(&mut self) -> Result<(), LaunchError> {
        let token = {
            let mut state = self.world.lock();
            state.terminate_count += 1;
            if !state.running {
                return Ok(());
            }
            state.running = false;
            state.live_token.clone()
        };
        if let Some(token) = token {
            token.detached();
        }
        Ok(())
    }
}

/// Minimal line-protocol server: answers each request with `reply`
pub fn spawn_server<F>(listener: UnixListener, reply: F) -> std::thread::JoinHandle<()>
where
    F: Fn(ServiceRequest) -> Option<ServiceResponse> + Send + 'static,
{
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { return };
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                let request: ServiceRequest = deserialize_message(line.as_bytes()).unwrap();
                let Some(response) = reply(request) else {
                    // Hang up
                    return;
                };
                writer
                    .write_all(&serialize_message(&response).unwrap())
                    .unwrap();
            }
        }
    })
}

pub fn standard_reply(request: ServiceRequest) -> Option<ServiceResponse> {
    Some(match request {
        ServiceRequest::Handshake { .. } => ServiceResponse::Handshake {
            protocol_version: PROTOCOL_VERSION,
        },
        ServiceRequest::IsRunning => ServiceResponse::Running { running: true },
        ServiceRequest::Reconfigure { .. } => ServiceResponse::Reconfigured,
        ServiceRequest::Watch => ServiceResponse::Watching,
        ServiceRequest::Shutdown => ServiceResponse::ShuttingDown,
    })
}
