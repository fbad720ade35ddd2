//! Connection state machine for a single account listener
//!
//! Every transport and caller event funnels through [`ListenerMachine::handle`],
//! which returns the side effects for the owning task to apply. Keeping the
//! transitions free of I/O makes the handshake sequencing directly testable.

use tracing::{debug, warn};

use crate::error::BalanceFeedError;
use crate::listener::queue::PendingQueue;
use crate::listener::{BalanceUpdate, ConnectionState};
use crate::protocol::{
    AuthResult, BalanceEvent, ClientRequest, ErrorEnvelope, InboundMessage, SwitchResult,
};

/// Handshake progress over one transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeStage {
    /// Authentication request in flight
    AwaitingAuth,
    /// Authenticated against another account; switch request in flight
    AwaitingSwitch,
    /// Account context confirmed; subscribe request in flight
    AwaitingSubscription,
    /// Subscription confirmed; balance updates flowing
    Live,
}

/// Events fed into the machine by the owning task
#[derive(Debug)]
pub enum ListenerEvent {
    /// A dial is about to start
    ConnectStarted,
    /// Transport opened
    Opened,
    /// Parsed venue frame
    Inbound(InboundMessage),
    /// Transport-level failure; the closure that follows drives recovery
    TransportError(String),
    /// Transport closed; `clean` marks a closure this instance requested
    Closed { clean: bool },
    /// Caller asked to shut the instance down
    CloseRequested { permanent: bool },
    /// Caller issued an outbound request
    OutboundRequested(ClientRequest),
}

/// Side effects for the owning task to apply, in order
#[derive(Debug)]
pub enum Action {
    /// Put a request on the wire
    Dispatch(ClientRequest),
    /// Forward a confirmed balance update to the caller
    Balance(BalanceUpdate),
    /// Report an error to the caller
    Error(BalanceFeedError),
    /// Report a lifecycle status to the caller
    Status(ConnectionState, Option<String>),
    /// Wait the fixed delay, then dial again
    ScheduleReconnect { attempt: u32 },
    /// Tear down the transport and stop the instance
    Shutdown,
}

/// Per-account connection state machine
#[derive(Debug)]
pub struct ListenerMachine {
    credential: String,
    target_account: String,
    stage: HandshakeStage,
    pending: PendingQueue,
    reconnect_attempts: u32,
    max_reconnect_attempts: u32,
    /// Latched on permanent failure or caller close; no event revives the instance
    terminal: bool,
}

impl ListenerMachine {
    pub fn new(
        credential: impl Into<String>,
        target_account: impl Into<String>,
        max_reconnect_attempts: u32,
    ) -> Self {
        Self {
            credential: credential.into(),
            target_account: target_account.into(),
            stage: HandshakeStage::AwaitingAuth,
            pending: PendingQueue::new(),
            reconnect_attempts: 0,
            max_reconnect_attempts,
            terminal: false,
        }
    }

    /// Account this instance must end up authenticated against
    pub fn target_account(&self) -> &str {
        &self.target_account
    }

    /// True once the venue has confirmed the target account context
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.stage,
            HandshakeStage::AwaitingSubscription | HandshakeStage::Live
        )
    }

    pub fn is_subscribed(&self) -> bool {
        self.stage == HandshakeStage::Live
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Single dispatch entry point: one event in, side effects out
    pub fn handle(&mut self, event: ListenerEvent) -> Vec<Action> {
        if self.terminal {
            debug!(event = ?event, "Event ignored after terminal state");
            return Vec::new();
        }

        let mut actions = Vec::new();
        match event {
            ListenerEvent::ConnectStarted => {
                self.stage = HandshakeStage::AwaitingAuth;
                actions.push(Action::Status(ConnectionState::Connecting, None));
            }
            ListenerEvent::Opened => {
                // Authentication has no precondition and never queues
                actions.push(Action::Dispatch(ClientRequest::authenticate(
                    self.credential.clone(),
                )));
            }
            ListenerEvent::Inbound(message) => self.on_inbound(message, &mut actions),
            ListenerEvent::TransportError(detail) => {
                actions.push(Action::Error(BalanceFeedError::WebSocketConnection(detail)));
            }
            ListenerEvent::Closed { clean } => self.on_closed(clean, &mut actions),
            ListenerEvent::CloseRequested { permanent } => {
                self.terminal = true;
                if permanent {
                    self.reconnect_attempts = self.max_reconnect_attempts;
                }
                self.stage = HandshakeStage::AwaitingAuth;
                self.pending.clear();
                actions.push(Action::Status(ConnectionState::Idle, None));
                actions.push(Action::Shutdown);
            }
            ListenerEvent::OutboundRequested(request) => {
                self.send_or_queue(request, &mut actions)
            }
        }
        actions
    }

    fn on_inbound(&mut self, message: InboundMessage, actions: &mut Vec<Action>) {
        match message {
            InboundMessage::Authenticated(result) => self.on_auth_result(result, actions),
            InboundMessage::AccountSwitched(result) => self.on_switch_result(result, actions),
            InboundMessage::Balance(event) => self.on_balance(event, actions),
            InboundMessage::Error(envelope) => self.on_error_envelope(envelope, actions),
            InboundMessage::Unknown(raw) => {
                debug!(raw = %raw, "Ignoring unrecognized venue message");
            }
        }
    }

    fn on_auth_result(&mut self, result: AuthResult, actions: &mut Vec<Action>) {
        if self.stage != HandshakeStage::AwaitingAuth {
            debug!(stage = ?self.stage, "Ignoring authentication response outside handshake");
            return;
        }
        if let Some(envelope) = result.error {
            self.fail_permanently(BalanceFeedError::Authentication(envelope.message), actions);
            return;
        }
        match result.account_id {
            Some(account_id) if self.is_target(&account_id) => {
                // Already on the right account: skip the switch entirely
                self.advance_to_subscribe(actions);
            }
            Some(account_id) => {
                debug!(
                    active = %account_id,
                    target = %self.target_account,
                    "Authenticated on another account, requesting switch"
                );
                self.stage = HandshakeStage::AwaitingSwitch;
                actions.push(Action::Dispatch(ClientRequest::switch_account(
                    self.target_account.clone(),
                )));
            }
            None => {
                self.fail_permanently(
                    BalanceFeedError::Authentication(
                        "authentication response carried no account identity".to_string(),
                    ),
                    actions,
                );
            }
        }
    }

    fn on_switch_result(&mut self, result: SwitchResult, actions: &mut Vec<Action>) {
        if self.stage != HandshakeStage::AwaitingSwitch {
            debug!(stage = ?self.stage, "Ignoring account switch response outside handshake");
            return;
        }
        if let Some(envelope) = result.error {
            self.fail_permanently(BalanceFeedError::AccountSwitch(envelope.message), actions);
            return;
        }
        match result.account_id {
            Some(account_id) if self.is_target(&account_id) => {
                self.advance_to_subscribe(actions);
            }
            other => {
                self.fail_permanently(
                    BalanceFeedError::AccountSwitch(format!(
                        "switch confirmed account {:?}, expected {}",
                        other, self.target_account
                    )),
                    actions,
                );
            }
        }
    }

    /// Account context is confirmed: flush queued requests, then subscribe.
    /// Queued requests go onto the wire ahead of the subscribe request.
    fn advance_to_subscribe(&mut self, actions: &mut Vec<Action>) {
        self.stage = HandshakeStage::AwaitingSubscription;
        self.flush(actions);
        actions.push(Action::Dispatch(ClientRequest::subscribe_balance()));
    }

    fn on_balance(&mut self, event: BalanceEvent, actions: &mut Vec<Action>) {
        if !self.is_target(&event.account_id) {
            warn!(
                account_id = %event.account_id,
                target = %self.target_account,
                "Dropping balance message for another account"
            );
            return;
        }
        match self.stage {
            HandshakeStage::AwaitingSubscription => {
                if event.subscription_id.is_none() {
                    warn!(
                        account_id = %event.account_id,
                        "Dropping balance message received before subscription confirmation"
                    );
                    return;
                }
                // First confirmed delivery: the feed is live
                self.stage = HandshakeStage::Live;
                self.reconnect_attempts = 0;
                actions.push(Action::Status(ConnectionState::Connected, None));
                actions.push(Action::Balance(BalanceUpdate::from(event)));
            }
            HandshakeStage::Live => {
                actions.push(Action::Balance(BalanceUpdate::from(event)));
            }
            _ => {
                warn!(
                    stage = ?self.stage,
                    "Dropping balance message received before authentication completed"
                );
            }
        }
    }

    fn on_error_envelope(&mut self, envelope: ErrorEnvelope, actions: &mut Vec<Action>) {
        let error = BalanceFeedError::Venue {
            code: envelope.code,
            message: envelope.message,
        };
        if envelope.code.is_fatal() {
            self.fail_permanently(error, actions);
        } else {
            actions.push(Action::Error(error));
        }
    }

    fn on_closed(&mut self, clean: bool, actions: &mut Vec<Action>) {
        self.stage = HandshakeStage::AwaitingAuth;
        if clean {
            self.terminal = true;
            actions.push(Action::Status(ConnectionState::Disconnected, None));
            actions.push(Action::Shutdown);
            return;
        }
        self.reconnect_attempts += 1;
        if self.reconnect_attempts < self.max_reconnect_attempts {
            actions.push(Action::Status(
                ConnectionState::Reconnecting,
                Some(format!(
                    "attempt {} of {}",
                    self.reconnect_attempts, self.max_reconnect_attempts
                )),
            ));
            actions.push(Action::ScheduleReconnect {
                attempt: self.reconnect_attempts,
            });
        } else {
            self.terminal = true;
            actions.push(Action::Error(BalanceFeedError::MaxReconnectAttemptsExceeded));
            actions.push(Action::Status(
                ConnectionState::Disconnected,
                Some("balance updates stopped: max reconnect attempts reached".to_string()),
            ));
            actions.push(Action::Shutdown);
        }
    }

    /// Dispatch immediately when the request's precondition holds, queue otherwise
    fn send_or_queue(&mut self, request: ClientRequest, actions: &mut Vec<Action>) {
        if request.is_authenticate() || self.is_authenticated() {
            actions.push(Action::Dispatch(request));
        } else {
            debug!(queued = self.pending.len() + 1, "Buffering outbound request until handshake completes");
            self.pending.push(request);
        }
    }

    /// Re-attempt every queued request in arrival order; runs once per
    /// successful handshake stage transition
    fn flush(&mut self, actions: &mut Vec<Action>) {
        for request in self.pending.take_all() {
            self.send_or_queue(request, actions);
        }
    }

    fn is_target(&self, account_id: &str) -> bool {
        account_id == self.target_account
    }

    /// Permanent protocol failure: report, disable reconnection by pinning
    /// the attempt counter at its bound, and latch terminal
    fn fail_permanently(&mut self, error: BalanceFeedError, actions: &mut Vec<Action>) {
        self.terminal = true;
        self.reconnect_attempts = self.max_reconnect_attempts;
        let detail = error.to_string();
        actions.push(Action::Error(error));
        actions.push(Action::Status(ConnectionState::Error, Some(detail)));
        actions.push(Action::Status(ConnectionState::Disconnected, None));
        actions.push(Action::Shutdown);
    }
}
