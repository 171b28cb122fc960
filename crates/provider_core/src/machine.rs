use shared::{
    domain::{ConnectionState, HostIdentity},
    protocol::{ConnectionPhase, ConnectionUpdate},
};

use crate::ProviderEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write the QR string to the image artifact.
    RenderQr(String),
    Emit(ProviderEvent),
    MarkOpen(HostIdentity),
    AttachNormalizer,
    /// Delete the persisted session. Always followed by `Restart`.
    PurgeSession,
    Restart,
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    pairing_code_mode: bool,
    state: ConnectionState,
}

impl ConnectionMachine {
    pub fn new(pairing_code_mode: bool) -> Self {
        Self {
            pairing_code_mode,
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Starts a new epoch.
    pub fn reset(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub fn on_update(&mut self, update: &ConnectionUpdate) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.is_terminal() {
            return actions;
        }

        if let Some(qr) = update.qr.as_deref().filter(|qr| !qr.is_empty()) {
            if !self.pairing_code_mode {
                actions.push(Action::Emit(ProviderEvent::scan_qr(qr)));
                actions.push(Action::RenderQr(qr.to_string()));
            }
        }

        match update.connection {
            Some(ConnectionPhase::Connecting) => {
                self.state = ConnectionState::Connecting;
            }
            Some(ConnectionPhase::Open) => {
                if self.state.is_open() {
                    return actions;
                }
                self.state = ConnectionState::Open;
                let host = update
                    .me
                    .as_ref()
                    .map(|me| HostIdentity::from_user_id(me.id.clone(), me.name.clone()))
                    .unwrap_or_default();
                actions.push(Action::MarkOpen(host.clone()));
                actions.push(Action::Emit(ProviderEvent::Ready(true)));
                actions.push(Action::Emit(ProviderEvent::Host(host)));
                actions.push(Action::AttachNormalizer);
            }
            Some(ConnectionPhase::Close) => {
                let reason = update.disconnect_reason();
                if reason.is_logged_out() {
                    self.state = ConnectionState::LoggedOut;
                    actions.push(Action::PurgeSession);
                } else {
                    self.state = ConnectionState::Closed(reason);
                }
                actions.push(Action::Restart);
            }
            None => {}
        }

        actions
    }

    /// A closed epoch accepts no further transitions.
    fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Closed(_) | ConnectionState::LoggedOut
        )
    }
}

#[cfg(test)]
#[path = "tests/machine_tests.rs"]
mod tests;
