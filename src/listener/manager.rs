//! Listener lifecycle driver
//!
//! One tokio task per watched account owns the transport, the state machine,
//! and the caller notification channel. Commands from the handle cross over
//! an mpsc channel, so no state is shared behind locks.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::error::{BalanceFeedError, Result};
use crate::listener::machine::{Action, ListenerEvent, ListenerMachine};
use crate::listener::transport::{TransportEvent, WsTransport};
use crate::listener::{BalanceHandler, CloseInfo};
use crate::protocol::{ClientRequest, InboundMessage};

/// Probe the connection when nothing has arrived for this long
const RECV_TIMEOUT: Duration = Duration::from_secs(45);

/// Commands from the handle to the run task
#[derive(Debug)]
enum ListenerCommand {
    Send(ClientRequest),
    Close { permanent: bool },
}

/// What the run loop does after applying a batch of machine actions
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Reconnect,
    Shutdown,
}

/// Handle to a running per-account balance listener.
///
/// Connection starts as soon as the handle is created. Dropping the handle
/// without calling [`close`](Self::close) still shuts the task down.
pub struct BalanceListener {
    cmd_tx: mpsc::UnboundedSender<ListenerCommand>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BalanceListener {
    /// Validate configuration and start the listener task
    pub fn spawn(
        config: FeedConfig,
        credential: impl Into<String>,
        account_id: impl Into<String>,
        handler: Arc<dyn BalanceHandler>,
    ) -> Result<Self> {
        config.validate()?;

        let machine = ListenerMachine::new(credential, account_id, config.max_reconnect_attempts);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(config, machine, handler, cmd_rx));

        Ok(Self {
            cmd_tx,
            task: tokio::sync::Mutex::new(Some(task)),
        })
    }

    /// Queue or dispatch an outbound request, subject to the handshake
    /// preconditions. Requests issued before the handshake completes are
    /// buffered and flushed in arrival order once the venue confirms the
    /// account context.
    pub fn send(&self, request: ClientRequest) -> Result<()> {
        self.cmd_tx
            .send(ListenerCommand::Send(request))
            .map_err(|_| BalanceFeedError::WebSocketConnection("listener is closed".to_string()))
    }

    /// Close the listener and wait for its task to finish.
    ///
    /// Safe to call more than once. `permanent` pins the reconnect counter
    /// at its bound so nothing can revive the instance afterwards.
    pub async fn close(&self, permanent: bool) {
        let _ = self.cmd_tx.send(ListenerCommand::Close { permanent });
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Listener task ended abnormally");
            }
        }
    }
}

impl Drop for BalanceListener {
    fn drop(&mut self) {
        // Best effort: the task winds down on its own once it sees the command
        let _ = self.cmd_tx.send(ListenerCommand::Close { permanent: true });
    }
}

/// Outer connection loop: dial, drive, and honor the machine's reconnect
/// or shutdown decisions
async fn run(
    config: FeedConfig,
    mut machine: ListenerMachine,
    handler: Arc<dyn BalanceHandler>,
    mut cmd_rx: mpsc::UnboundedReceiver<ListenerCommand>,
) {
    let url = config.stream_url();
    let reconnect_delay = Duration::from_millis(config.reconnect_delay_ms);

    info!(
        account_id = %machine.target_account(),
        "Starting balance listener"
    );

    loop {
        apply(machine.handle(ListenerEvent::ConnectStarted), None, &handler).await;

        match dial(&url, &mut machine, &handler, &mut cmd_rx).await {
            Dial::Connected(mut transport) => {
                apply(
                    machine.handle(ListenerEvent::Opened),
                    Some(&mut transport),
                    &handler,
                )
                .await;
                let flow = drive(&mut transport, &mut machine, &handler, &mut cmd_rx).await;

                // Exactly one transport is live at a time: tear this one
                // down before any new dial
                transport.close().await;

                if !wait_reconnect(flow, reconnect_delay, &mut machine, &handler, &mut cmd_rx).await
                {
                    break;
                }
            }
            Dial::Failed => {
                // A failed dial produces no close frame; synthesize the
                // unclean closure that drives the retry policy
                handler.on_close(&CloseInfo {
                    code: None,
                    reason: None,
                    clean: false,
                });
                let flow = apply(
                    machine.handle(ListenerEvent::Closed { clean: false }),
                    None,
                    &handler,
                )
                .await;
                if !wait_reconnect(flow, reconnect_delay, &mut machine, &handler, &mut cmd_rx).await
                {
                    break;
                }
            }
            Dial::Stopped => break,
        }
    }

    info!(
        account_id = %machine.target_account(),
        "Balance listener stopped"
    );
}

enum Dial {
    Connected(WsTransport),
    Failed,
    Stopped,
}

/// Open a connection while staying responsive to caller commands
async fn dial(
    url: &str,
    machine: &mut ListenerMachine,
    handler: &Arc<dyn BalanceHandler>,
    cmd_rx: &mut mpsc::UnboundedReceiver<ListenerCommand>,
) -> Dial {
    let connect = WsTransport::connect(url);
    tokio::pin!(connect);

    loop {
        tokio::select! {
            result = &mut connect => {
                return match result {
                    Ok(transport) => Dial::Connected(transport),
                    Err(e) => {
                        warn!(error = %e, "Venue connection failed");
                        apply(
                            machine.handle(ListenerEvent::TransportError(e.to_string())),
                            None,
                            handler,
                        )
                        .await;
                        Dial::Failed
                    }
                };
            }
            cmd = cmd_rx.recv() => {
                if on_offline_command(cmd, machine, handler).await {
                    return Dial::Stopped;
                }
            }
        }
    }
}

/// Sit out the fixed reconnect delay; returns false when the listener
/// should stop instead of dialing again
async fn wait_reconnect(
    flow: Flow,
    delay: Duration,
    machine: &mut ListenerMachine,
    handler: &Arc<dyn BalanceHandler>,
    cmd_rx: &mut mpsc::UnboundedReceiver<ListenerCommand>,
) -> bool {
    if flow != Flow::Reconnect {
        return false;
    }

    debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
    let wait = sleep(delay);
    tokio::pin!(wait);

    loop {
        tokio::select! {
            _ = &mut wait => return true,
            cmd = cmd_rx.recv() => {
                if on_offline_command(cmd, machine, handler).await {
                    return false;
                }
            }
        }
    }
}

/// Handle a command that arrived with no live transport. Outbound requests
/// buffer in the machine; returns true when the listener must stop.
async fn on_offline_command(
    cmd: Option<ListenerCommand>,
    machine: &mut ListenerMachine,
    handler: &Arc<dyn BalanceHandler>,
) -> bool {
    match cmd {
        Some(ListenerCommand::Send(request)) => {
            apply(
                machine.handle(ListenerEvent::OutboundRequested(request)),
                None,
                handler,
            )
            .await;
            false
        }
        Some(ListenerCommand::Close { permanent }) => {
            apply(
                machine.handle(ListenerEvent::CloseRequested { permanent }),
                None,
                handler,
            )
            .await;
            true
        }
        // Handle dropped with no close command; nothing left to serve
        None => {
            apply(
                machine.handle(ListenerEvent::CloseRequested { permanent: true }),
                None,
                handler,
            )
            .await;
            true
        }
    }
}

/// Pump one live connection until it closes or the caller shuts us down
async fn drive(
    transport: &mut WsTransport,
    machine: &mut ListenerMachine,
    handler: &Arc<dyn BalanceHandler>,
    cmd_rx: &mut mpsc::UnboundedReceiver<ListenerCommand>,
) -> Flow {
    loop {
        tokio::select! {
            event = timeout(RECV_TIMEOUT, transport.next()) => {
                let event = match event {
                    Ok(event) => event,
                    Err(_) => {
                        // Quiet for too long: probe, and treat a failed
                        // probe as a dead link
                        warn!("No message received within timeout, sending keepalive");
                        if let Err(e) = transport.ping().await {
                            warn!(error = %e, "Failed to send keepalive ping, reconnecting");
                            apply(
                                machine.handle(ListenerEvent::TransportError(
                                    BalanceFeedError::ConnectionTimeout.to_string(),
                                )),
                                Some(&mut *transport),
                                handler,
                            )
                            .await;
                            handler.on_close(&CloseInfo { code: None, reason: None, clean: false });
                            return apply(
                                machine.handle(ListenerEvent::Closed { clean: false }),
                                Some(&mut *transport),
                                handler,
                            )
                            .await;
                        }
                        continue;
                    }
                };

                match event {
                    TransportEvent::Text(text) => match InboundMessage::parse(&text) {
                        Ok(message) => {
                            let flow = apply(
                                machine.handle(ListenerEvent::Inbound(message)),
                                Some(&mut *transport),
                                handler,
                            )
                            .await;
                            if flow == Flow::Shutdown {
                                // Fatal protocol failures tear the link down
                                // without a close frame of their own
                                handler.on_close(&CloseInfo {
                                    code: None,
                                    reason: None,
                                    clean: false,
                                });
                            }
                            if flow != Flow::Continue {
                                return flow;
                            }
                        }
                        Err(e) => {
                            // Malformed payloads never tear the connection down
                            warn!(error = %e, "Failed to parse venue message");
                            handler.on_error(&BalanceFeedError::Parse(e.to_string()));
                        }
                    },
                    TransportEvent::Error(detail) => {
                        apply(
                            machine.handle(ListenerEvent::TransportError(detail)),
                            Some(&mut *transport),
                            handler,
                        )
                        .await;
                        handler.on_close(&CloseInfo { code: None, reason: None, clean: false });
                        return apply(
                            machine.handle(ListenerEvent::Closed { clean: false }),
                            Some(&mut *transport),
                            handler,
                        )
                        .await;
                    }
                    TransportEvent::Closed { code, reason } => {
                        handler.on_close(&CloseInfo { code, reason, clean: false });
                        return apply(
                            machine.handle(ListenerEvent::Closed { clean: false }),
                            Some(&mut *transport),
                            handler,
                        )
                        .await;
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ListenerCommand::Send(request)) => {
                        apply(
                            machine.handle(ListenerEvent::OutboundRequested(request)),
                            Some(&mut *transport),
                            handler,
                        )
                        .await;
                    }
                    Some(ListenerCommand::Close { permanent }) => {
                        transport.close().await;
                        handler.on_close(&CloseInfo { code: None, reason: None, clean: true });
                        return apply(
                            machine.handle(ListenerEvent::CloseRequested { permanent }),
                            None,
                            handler,
                        )
                        .await;
                    }
                    None => {
                        transport.close().await;
                        return apply(
                            machine.handle(ListenerEvent::CloseRequested { permanent: true }),
                            None,
                            handler,
                        )
                        .await;
                    }
                }
            }
        }
    }
}

/// Apply machine actions in order, returning the resulting control flow
async fn apply(
    actions: Vec<Action>,
    mut transport: Option<&mut WsTransport>,
    handler: &Arc<dyn BalanceHandler>,
) -> Flow {
    let mut flow = Flow::Continue;
    for action in actions {
        match action {
            Action::Dispatch(request) => match transport.as_mut() {
                Some(transport) => {
                    if let Err(e) = transport.send_json(&request).await {
                        // The closure that follows a dead link drives recovery
                        warn!(error = %e, "Failed to send request");
                        handler.on_error(&e);
                    }
                }
                None => {
                    warn!(request = ?request, "Dropping outbound request with no live transport");
                }
            },
            Action::Balance(update) => handler.on_balance(&update),
            Action::Error(error) => handler.on_error(&error),
            Action::Status(status, detail) => {
                debug!(status = ?status, detail = ?detail, "Status change");
                handler.on_status(status, detail.as_deref());
            }
            Action::ScheduleReconnect { attempt } => {
                debug!(attempt, "Reconnect scheduled");
                flow = Flow::Reconnect;
            }
            Action::Shutdown => {
                flow = Flow::Shutdown;
            }
        }
    }
    flow
}
