//! Interactive shell sessions
//!
//! Each session is driven by one task that owns the SSH channel. Writes and
//! resizes are queued to it and applied in call order; remote output flows
//! back through an event channel that a single subscriber drains.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::Transport;
use super::{SessionStatus, TerminalSize};
use crate::error::{Error, Result};

/// How long closing may take before the task is abandoned
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Output of a shell session, in the order the remote produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Raw bytes from stdout or stderr
    Data(Vec<u8>),
    ExitStatus(u32),
    Closed,
    Errored(String),
}

pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Messages arriving from the remote side of a shell channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Inbound {
    Data(Vec<u8>),
    ExitStatus(u32),
    Eof,
    /// The remote closed the channel
    Closed,
}

/// The remote end of a shell. `recv` returns `None` when the channel went away
/// without being closed, e.g. the connection dropped.
#[async_trait]
pub(crate) trait ShellChannel: Send + 'static {
    async fn recv(&mut self) -> Option<Inbound>;
    async fn send_data(&mut self, data: &[u8]) -> Result<()>;
    async fn window_change(&mut self, size: TerminalSize) -> Result<()>;
    async fn close(&mut self);
}

/// A pty shell channel on an SSH connection
struct RemoteShell {
    channel: Channel<Msg>,
    transport: Option<Transport>,
    /// Remote sent EOF or an exit status
    finished: bool,
}

#[async_trait]
impl ShellChannel for RemoteShell {
    async fn recv(&mut self) -> Option<Inbound> {
        loop {
            // russh drops the channel on CHANNEL_CLOSE without forwarding it,
            // so an orderly end shows up as the stream ending after EOF.
            let Some(msg) = self.channel.wait().await else {
                return self.finished.then_some(Inbound::Closed);
            };
            match msg {
                ChannelMsg::Data { data } => return Some(Inbound::Data(data.to_vec())),
                ChannelMsg::ExtendedData { data, .. } => return Some(Inbound::Data(data.to_vec())),
                ChannelMsg::ExitStatus { exit_status } => {
                    self.finished = true;
                    return Some(Inbound::ExitStatus(exit_status));
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    self.finished = true;
                    debug!(signal = ?signal_name, "remote process killed by signal");
                }
                ChannelMsg::Eof => {
                    self.finished = true;
                    return Some(Inbound::Eof);
                }
                ChannelMsg::Close => return Some(Inbound::Closed),
                _ => {}
            }
        }
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<()> {
        Ok(self.channel.data(data).await?)
    }

    async fn window_change(&mut self, size: TerminalSize) -> Result<()> {
        Ok(self.channel.window_change(size.cols, size.rows, 0, 0).await?)
    }

    async fn close(&mut self) {
        self.channel.eof().await.ok();
        self.channel.close().await.ok();
        if let Some(transport) = self.transport.take() {
            transport.disconnect().await;
        }
    }
}

/// Last size sent to the remote pty; repeated sizes are not re-sent
#[derive(Debug, Clone, Copy)]
pub(crate) struct PtySize {
    current: TerminalSize,
}

impl PtySize {
    pub(crate) fn new(initial: TerminalSize) -> Self {
        Self { current: initial }
    }

    /// Record `size`, returning whether it differs from the last one sent
    pub(crate) fn update(&mut self, size: TerminalSize) -> bool {
        if size == self.current {
            return false;
        }
        self.current = size;
        true
    }
}

enum Command {
    Write {
        data: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    Resize {
        size: TerminalSize,
        reply: oneshot::Sender<Result<bool>>,
    },
}

enum Ending {
    Cancelled,
    RemoteClosed,
    Failed(String),
}

pub struct ShellSession {
    id: String,
    profile_id: String,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SessionStatus>,
    events: Mutex<Option<EventReceiver>>,
    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ShellSession {
    /// Request a pty and a shell on `transport` and start the session task
    pub async fn open(
        id: String,
        profile_id: String,
        transport: Transport,
        size: TerminalSize,
        term: &str,
    ) -> Result<Self> {
        let channel = transport.open_session_channel().await?;
        channel
            .request_pty(false, term, size.cols, size.rows, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;

        info!(session = %id, target = %transport.target(), cols = size.cols, rows = size.rows, "shell opened");

        let remote = RemoteShell {
            channel,
            transport: Some(transport),
            finished: false,
        };
        Ok(Self::spawn(id, profile_id, remote, size))
    }

    pub(crate) fn spawn(
        id: String,
        profile_id: String,
        channel: impl ShellChannel,
        size: TerminalSize,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::Connected);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(
            id.clone(),
            channel,
            command_rx,
            event_tx,
            status_tx,
            cancel.clone(),
            PtySize::new(size),
        ));

        Self {
            id,
            profile_id,
            commands: command_tx,
            status: status_rx,
            events: Mutex::new(Some(event_rx)),
            cancel,
            task: tokio::sync::Mutex::new(Some(task)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Take the event stream. Only one subscriber is allowed; events produced
    /// before subscribing are buffered.
    pub fn subscribe(&self) -> Result<EventReceiver> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| Error::SessionState(format!("'{}' already has a subscriber", self.id)))
    }

    pub async fn write(&self, data: &[u8]) -> Result<()> {
        self.ensure_connected()?;
        if data.is_empty() {
            return Ok(());
        }

        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Write {
                data: data.to_vec(),
                reply,
            })
            .map_err(|_| Error::not_connected(&self.id))?;
        rx.await.map_err(|_| Error::not_connected(&self.id))?
    }

    /// Returns `true` when a window-change request was sent, `false` when the
    /// size matched the last one and nothing was sent
    pub async fn resize(&self, size: TerminalSize) -> Result<bool> {
        if size.cols == 0 || size.rows == 0 {
            return Err(Error::Validation("terminal size must be at least 1x1".into()));
        }
        self.ensure_connected()?;

        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Resize { size, reply })
            .map_err(|_| Error::not_connected(&self.id))?;
        rx.await.map_err(|_| Error::not_connected(&self.id))?
    }

    /// Close the channel and wait for the session task to finish
    pub async fn close(&self) {
        self.cancel.cancel();

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if timeout(CLOSE_GRACE, task).await.is_err() {
                warn!(session = %self.id, "shell did not close in time");
            }
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.status.borrow().is_connected() {
            Ok(())
        } else {
            Err(Error::not_connected(&self.id))
        }
    }
}

async fn run(
    id: String,
    mut channel: impl ShellChannel,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
    status: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
    mut pty: PtySize,
) {
    let ending = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break Ending::Cancelled,

            msg = channel.recv() => match msg {
                Some(Inbound::Data(data)) => {
                    let _ = events.send(SessionEvent::Data(data));
                }
                Some(Inbound::ExitStatus(code)) => {
                    debug!(session = %id, code, "remote shell exited");
                    let _ = events.send(SessionEvent::ExitStatus(code));
                }
                Some(Inbound::Eof) => {
                    debug!(session = %id, "remote sent EOF");
                }
                Some(Inbound::Closed) => break Ending::RemoteClosed,
                None => break Ending::Failed("connection lost".into()),
            },

            cmd = commands.recv() => match cmd {
                Some(Command::Write { data, reply }) => {
                    let sent = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        result = channel.send_data(&data) => Some(result),
                    };
                    match sent {
                        Some(Ok(())) => {
                            let _ = reply.send(Ok(()));
                        }
                        Some(Err(e)) => {
                            let reason = e.to_string();
                            let _ = reply.send(Err(e));
                            break Ending::Failed(reason);
                        }
                        None => {
                            let _ = reply.send(Err(Error::not_connected(&id)));
                            break Ending::Cancelled;
                        }
                    }
                }
                Some(Command::Resize { size, reply }) => {
                    if !pty.update(size) {
                        let _ = reply.send(Ok(false));
                        continue;
                    }
                    match channel.window_change(size).await {
                        Ok(()) => {
                            debug!(session = %id, cols = size.cols, rows = size.rows, "window changed");
                            let _ = reply.send(Ok(true));
                        }
                        Err(e) => {
                            let reason = e.to_string();
                            let _ = reply.send(Err(e));
                            break Ending::Failed(reason);
                        }
                    }
                }
                None => break Ending::Cancelled,
            },
        }
    };

    if timeout(CLOSE_GRACE, channel.close()).await.is_err() {
        warn!(session = %id, "timed out closing shell channel");
    }

    match ending {
        Ending::Cancelled | Ending::RemoteClosed => {
            info!(session = %id, "shell closed");
            status.send_replace(SessionStatus::Closed);
            let _ = events.send(SessionEvent::Closed);
        }
        Ending::Failed(reason) => {
            warn!(session = %id, %reason, "shell failed");
            status.send_replace(SessionStatus::Errored(reason.clone()));
            let _ = events.send(SessionEvent::Errored(reason));
        }
    }
}
