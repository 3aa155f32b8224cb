//! X11 display-server supervisor
//!
//! Daemon-side half of the session: creates the credential and auth file,
//! spawns the helper process, listens for its handshake on a private Unix
//! socket, and drives bounded graceful-then-forced termination. Spontaneous
//! helper exits and explicit stops converge on the same exit-handler
//! cleanup.

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use tokio::net::{UnixListener, UnixStream};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{is_valid_display_name, Session, SessionRequest, SessionState, SupervisorEvent};
use crate::config::Config;
use crate::protocol::{self, HelperMessage};
use crate::utils;
use crate::xauth::{self, Cookie};

/// Bound on reading one handshake frame from an accepted connection.
const HANDSHAKE_READ_TIMEOUT: Duration = Duration::from_secs(1);

enum ControlMsg {
    Stop { ack: oneshot::Sender<()> },
}

/// Supervisor for one X11 display-server session on one seat.
///
/// Constructed idle; [`start`](Self::start) brings up the helper and a
/// reactor task, [`stop`](Self::stop) tears both down. State is observable
/// through [`session`](Self::session) and the event channel returned by
/// [`new`](Self::new).
pub struct X11DisplayServer {
    config: Arc<Config>,
    request: SessionRequest,
    session: Arc<Mutex<Session>>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    control: Option<mpsc::UnboundedSender<ControlMsg>>,
    reactor: Option<JoinHandle<()>>,
}

impl X11DisplayServer {
    /// Create an idle supervisor and the event channel it reports on.
    pub fn new(
        config: Arc<Config>,
        request: SessionRequest,
    ) -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Mutex::new(Session::new(
            &request.seat_name,
            request.terminal_id,
        )));

        (
            Self {
                config,
                request,
                session,
                events: events_tx,
                control: None,
                reactor: None,
            },
            events_rx,
        )
    }

    /// Snapshot of the current session record
    pub fn session(&self) -> Session {
        self.session.lock().clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.session.lock().state
    }

    /// Start the session: credentials, channel listener, helper process.
    ///
    /// Fails without side effects when the session is already started, and
    /// cleans up the auth file and endpoint when the helper cannot be
    /// spawned.
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != SessionState::Idle {
            bail!(
                "session for seat {} is already started",
                self.request.seat_name
            );
        }
        // A finished reactor from a previous run has nothing left to do
        if let Some(handle) = self.reactor.take() {
            let _ = handle.await;
        }
        self.control = None;

        let runtime_dir = &self.config.daemon.runtime_dir;
        std::fs::create_dir_all(runtime_dir).with_context(|| {
            format!("Failed to create runtime directory {}", runtime_dir.display())
        })?;

        let cookie = Cookie::generate();

        let auth_path = runtime_dir.join(Uuid::new_v4().to_string());
        std::fs::File::create(&auth_path)
            .with_context(|| format!("Failed to create auth file {}", auth_path.display()))?;
        xauth::change_owner(&auth_path, &self.config.daemon.service_user);

        // Fresh unpredictable endpoint per session
        let endpoint = runtime_dir.join(format!("x11-helper-{}", Uuid::new_v4()));
        let listener = match UnixListener::bind(&endpoint) {
            Ok(listener) => listener,
            Err(e) => {
                let _ = xauth::revoke(&auth_path);
                return Err(e).with_context(|| {
                    format!("Failed to bind helper channel at {}", endpoint.display())
                });
            }
        };
        xauth::change_owner(&endpoint, &self.config.daemon.service_user);

        {
            let mut session = self.session.lock();
            session.state = SessionState::Starting;
            session.display_name.clear();
            session.auth_file_path = auth_path.clone();
            session.channel_endpoint = endpoint.clone();
            session.cookie = Some(cookie.clone());
        }

        let mut cmd = Command::new(&self.config.daemon.helper_path);
        cmd.arg("--seat")
            .arg(&self.request.seat_name)
            .arg("--vt")
            .arg(self.request.terminal_id.to_string())
            .arg("--socket")
            .arg(&endpoint)
            .arg("--auth")
            .arg(&auth_path);
        if let Some(session_command) = &self.request.session_command {
            cmd.arg("--session").arg(session_command);
        }
        if self.request.test_mode {
            cmd.arg("--test-mode");
        }
        cmd.kill_on_drop(true);

        info!("Starting X11 server for seat {}", self.request.seat_name);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = xauth::revoke(&auth_path);
                let _ = std::fs::remove_file(&endpoint);
                self.session.lock().clear_runtime_fields();
                return Err(e).with_context(|| {
                    format!(
                        "Failed to start helper {}",
                        self.config.daemon.helper_path.display()
                    )
                });
            }
        };

        self.session.lock().state = SessionState::AwaitingHandshake;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let reactor = Reactor {
            config: Arc::clone(&self.config),
            session: Arc::clone(&self.session),
            cookie,
            listener: Some(listener),
            child: Some(child),
            events: self.events.clone(),
            control: control_rx,
        };
        self.control = Some(control_tx);
        self.reactor = Some(tokio::spawn(reactor.run()));

        Ok(())
    }

    /// Stop the session and wait for cleanup to finish.
    ///
    /// No-op on an idle session: no signaling, immediate return. Otherwise
    /// the reactor sends a graceful termination request and escalates to a
    /// forced kill after the configured bound; the exit handler performs the
    /// actual cleanup before this returns.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state() == SessionState::Idle {
            return Ok(());
        }
        let Some(control) = self.control.take() else {
            return Ok(());
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if control.send(ControlMsg::Stop { ack: ack_tx }).is_ok() {
            // The reactor replies once the exit handler has run; a dropped
            // sender means it finished on its own in the meantime
            let _ = ack_rx.await;
        }
        if let Some(handle) = self.reactor.take() {
            let _ = handle.await;
        }
        Ok(())
    }
}

/// Per-session reactor: single task dispatching on channel connections,
/// helper exit, and stop requests.
struct Reactor {
    config: Arc<Config>,
    session: Arc<Mutex<Session>>,
    cookie: Cookie,
    listener: Option<UnixListener>,
    child: Option<Child>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    control: mpsc::UnboundedReceiver<ControlMsg>,
}

impl Reactor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                conn = accept(self.listener.as_ref()) => {
                    match conn {
                        Ok(stream) => self.handle_connection(stream).await,
                        Err(e) => warn!("Helper channel accept failed: {}", e),
                    }
                }
                status = utils::wait_child(self.child.as_mut()) => {
                    self.handle_exited(status.ok());
                    break;
                }
                msg = self.control.recv() => {
                    match msg {
                        Some(ControlMsg::Stop { ack }) => {
                            self.handle_stop().await;
                            let _ = ack.send(());
                            break;
                        }
                        // Supervisor dropped without stopping; tear down
                        None => {
                            self.handle_stop().await;
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Decode exactly one frame from an accepted connection.
    async fn handle_connection(&mut self, mut stream: UnixStream) {
        let msg = match tokio::time::timeout(
            HANDSHAKE_READ_TIMEOUT,
            protocol::read_message(&mut stream),
        )
        .await
        {
            Ok(Ok(msg)) => msg,
            Ok(Err(e)) => {
                warn!("Discarding undecodable handshake frame: {}", e);
                return;
            }
            Err(_) => {
                warn!(
                    "Handshake peer sent no complete frame within {:?}",
                    HANDSHAKE_READ_TIMEOUT
                );
                return;
            }
        };

        match msg {
            HelperMessage::Started { display_name } => {
                if self.session.lock().state != SessionState::AwaitingHandshake {
                    debug!("Ignoring Started handshake outside AwaitingHandshake");
                    return;
                }
                if !is_valid_display_name(&display_name) {
                    warn!(
                        "Ignoring Started handshake with malformed display name {:?}",
                        display_name
                    );
                    return;
                }

                let auth_path = self.session.lock().auth_file_path.clone();

                // Deferred write: the cookie reaches the authority database
                // only now that the real display name is known
                if let Err(e) = xauth::install(
                    &self.config.x11.xauth_path,
                    &auth_path,
                    &display_name,
                    &self.cookie,
                )
                .await
                {
                    error!("Failed to install cookie for {}: {}", display_name, e);
                }

                {
                    let mut session = self.session.lock();
                    session.display_name = display_name.clone();
                    session.state = SessionState::Running;
                }

                info!("X11 server started on {}", display_name);
                let _ = self.events.send(SupervisorEvent::Started { display_name });
            }
            HelperMessage::Unknown => {
                debug!("Ignoring Unknown handshake frame");
            }
        }
    }

    /// Graceful termination, escalating to SIGKILL after the bound.
    async fn handle_stop(&mut self) {
        if self.session.lock().state == SessionState::Idle {
            return;
        }

        debug!("Stopping X11 server");
        self.session.lock().state = SessionState::Stopping;

        let status = match self.child.as_mut() {
            Some(child) => utils::terminate(child, self.config.stop_timeout())
                .await
                .ok(),
            None => None,
        };

        self.handle_exited(status);
    }

    /// Exit handler, shared by spontaneous exits and requested stops.
    fn handle_exited(&mut self, status: Option<ExitStatus>) {
        if self.session.lock().state == SessionState::Idle {
            return;
        }

        // Close the channel listener and remove its endpoint
        self.listener = None;
        let (endpoint, auth_path) = {
            let session = self.session.lock();
            (
                session.channel_endpoint.clone(),
                session.auth_file_path.clone(),
            )
        };
        if !endpoint.as_os_str().is_empty() {
            let _ = std::fs::remove_file(&endpoint);
        }

        self.child = None;

        if !auth_path.as_os_str().is_empty() {
            if let Err(e) = xauth::revoke(&auth_path) {
                warn!(
                    "Failed to remove auth file {}: {}",
                    auth_path.display(),
                    e
                );
            }
        }

        self.session.lock().clear_runtime_fields();

        info!("X11 server stopped");
        let _ = self.events.send(SupervisorEvent::ProcessExited { status });
        let _ = self.events.send(SupervisorEvent::Stopped);
    }
}

async fn accept(listener: Option<&UnixListener>) -> std::io::Result<UnixStream> {
    match listener {
        Some(listener) => listener.accept().await.map(|(stream, _)| stream),
        None => std::future::pending().await,
    }
}
