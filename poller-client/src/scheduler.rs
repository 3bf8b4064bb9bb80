//! Poll loop scheduling
//!
//! The loop runs one cycle at a time: request, dispatch, state transition,
//! then wait for the delay the cycle's outcome calls for. Success reissues the
//! request immediately; failure waits the configured backoff. Nothing but an
//! explicit stop ends the loop.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::PollerConfig;
use crate::connection::{ConnectionState, StateCallback, Transition};
use crate::dispatch::DispatchReport;
use crate::error::{PollerError, Result, TransportError};
use crate::poller::Poller;
use crate::registry::{typed_handler, MessageHandler};

/// What happened during one poll cycle
#[derive(Debug)]
pub enum CycleOutcome {
    /// The server answered and the batch was dispatched
    Delivered(DispatchReport),
    /// The request failed or timed out
    Failed(TransportError),
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Delivered(_))
    }
}

/// Result of a single poll cycle
#[derive(Debug)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    /// State edge caused by this cycle, if any
    pub transition: Option<Transition>,
    /// How long to wait before the next cycle
    pub next_delay: Duration,
}

/// Delay before the cycle following `outcome`.
pub fn next_delay(outcome: &CycleOutcome, config: &PollerConfig) -> Duration {
    match outcome {
        CycleOutcome::Delivered(_) => Duration::ZERO,
        CycleOutcome::Failed(_) => config.backoff,
    }
}

/// Registrations forwarded to a running loop
pub(crate) enum Command {
    Subscribe {
        name: String,
        handler: MessageHandler,
    },
    OnConnect(StateCallback),
    OnDisconnect(StateCallback),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Subscribe { name, .. } => {
                f.debug_struct("Subscribe").field("name", name).finish_non_exhaustive()
            }
            Command::OnConnect(_) => f.write_str("OnConnect"),
            Command::OnDisconnect(_) => f.write_str("OnDisconnect"),
        }
    }
}

fn apply(poller: &mut Poller, command: Command) {
    tracing::debug!("Applying {:?}", command);
    match command {
        Command::Subscribe { name, handler } => {
            poller.register(name, handler);
        }
        Command::OnConnect(callback) => {
            poller.connection_mut().set_on_connect(callback);
        }
        Command::OnDisconnect(callback) => {
            poller.connection_mut().set_on_disconnect(callback);
        }
    }
}

async fn next_command(commands: &mut Option<mpsc::UnboundedReceiver<Command>>) -> Option<Command> {
    match commands {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Drive `poller` until `shutdown` resolves.
///
/// Shutdown is honoured while a request is in flight and while waiting for
/// the next cycle; an interrupted request is dropped without dispatching.
pub(crate) async fn drive<S>(
    poller: &mut Poller,
    mut commands: Option<mpsc::UnboundedReceiver<Command>>,
    shutdown: S,
) where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    tracing::info!("Starting poll loop for {}", poller.endpoint());

    'cycles: loop {
        if let Some(rx) = commands.as_mut() {
            while let Ok(command) = rx.try_recv() {
                apply(poller, command);
            }
        }

        let report = tokio::select! {
            biased;
            _ = &mut shutdown => break 'cycles,
            report = poller.poll_once() => report,
        };

        if report.next_delay.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }

        tracing::debug!("Next poll in {:?}", report.next_delay);
        let sleep = tokio::time::sleep(report.next_delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break 'cycles,
                _ = &mut sleep => break,
                Some(command) = next_command(&mut commands) => apply(poller, command),
            }
        }
    }

    tracing::info!("Poll loop for {} stopped", poller.endpoint());
}

/// Spawn the poll loop for `poller` on the current tokio runtime.
pub(crate) fn spawn(mut poller: Poller) -> PollerHandle {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let state = poller.state_receiver();

    let task = tokio::spawn(async move {
        let shutdown = async move {
            // A dropped handle stops the loop as well
            let _ = shutdown_rx.await;
        };
        drive(&mut poller, Some(command_rx), shutdown).await;
        poller
    });

    PollerHandle {
        commands: command_tx,
        shutdown: Some(shutdown_tx),
        state,
        task,
    }
}

/// Handle to a running poll loop
///
/// This is the single handle to the loop's task. Registrations made through
/// it are applied before the next request goes out. Dropping the handle stops
/// the loop.
#[derive(Debug)]
pub struct PollerHandle {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: Option<oneshot::Sender<()>>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<Poller>,
}

impl PollerHandle {
    /// Register or replace the handler for `name` on the running loop
    pub fn on_message<F>(&self, name: impl Into<String>, handler: F) -> Result<&Self>
    where
        F: FnMut(Value) + Send + 'static,
    {
        self.send(Command::Subscribe {
            name: name.into(),
            handler: Box::new(handler),
        })
    }

    /// Register a handler that receives the payload decoded as `T`
    pub fn on_message_as<T, F>(&self, name: &str, handler: F) -> Result<&Self>
    where
        T: DeserializeOwned,
        F: FnMut(T) + Send + 'static,
    {
        self.send(Command::Subscribe {
            name: name.to_string(),
            handler: typed_handler(name, handler),
        })
    }

    pub fn on_connect<F>(&self, callback: F) -> Result<&Self>
    where
        F: FnMut() + Send + 'static,
    {
        self.send(Command::OnConnect(Box::new(callback)))
    }

    pub fn on_disconnect<F>(&self, callback: F) -> Result<&Self>
    where
        F: FnMut() + Send + 'static,
    {
        self.send(Command::OnDisconnect(Box::new(callback)))
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every connection state edge
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Check if the loop task is still running
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the loop to stop without waiting for it.
    ///
    /// The next scheduled cycle never runs and an in-flight request is
    /// abandoned.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    /// Stop the loop and wait for it, handing the poller back.
    ///
    /// The returned poller keeps its subscriptions and versions and can be
    /// started again.
    pub async fn shutdown(mut self) -> Result<Poller> {
        self.stop();
        self.task
            .await
            .map_err(|e| PollerError::Join(e.to_string()))
    }

    fn send(&self, command: Command) -> Result<&Self> {
        self.commands
            .send(command)
            .map_err(|_| PollerError::Stopped)?;
        Ok(self)
    }
}
