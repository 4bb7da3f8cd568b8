//! Share-side transfer session state machine.
//!
//! Exactly one transition fires per named event. The phase lives inside a
//! watch channel so the HTTP handlers mutate it and the runtime loop observes
//! it without any ad-hoc flags.

use tokio::sync::watch;

/// Phase of the single transfer a share session serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Listener bound, waiting for the first (or a retried) download.
    Listening,
    /// Archive response stream in flight.
    Sending,
    /// Response finished; waiting for `/confirm` or the timeout.
    AwaitingConfirmation,
    /// Transfer complete. `assumed` is true when the confirmation window
    /// elapsed without an explicit `/confirm`.
    Confirmed { assumed: bool },
    /// Archive build or stream I/O failed; the session is unusable.
    Failed,
    /// Terminal: listener and tunnel torn down (or about to be).
    Closed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Confirmed { .. } | Phase::Failed | Phase::Closed)
    }
}

/// Response to a `/confirm` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmAck {
    /// First confirmation; teardown should follow.
    Confirmed,
    /// Confirmation was already recorded; nothing else happens.
    AlreadyConfirmed,
}

/// Returned when a download request arrives while another transfer is
/// already awaiting confirmation.
#[derive(Debug, thiserror::Error)]
#[error("a transfer is already awaiting confirmation")]
pub struct SessionBusy;

pub struct TransferSession {
    phase: watch::Sender<Phase>,
}

impl Default for TransferSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferSession {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(Phase::Listening);
        Self { phase }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// A client opened `GET /`. Only one archive stream may be in flight, and
    /// a session already awaiting confirmation rejects new downloads.
    pub fn connection_received(&self) -> Result<(), SessionBusy> {
        let mut accepted = false;
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Listening {
                tracing::info!("connection established, streaming archive");
                *phase = Phase::Sending;
                accepted = true;
                true
            } else {
                false
            }
        });
        if accepted {
            Ok(())
        } else {
            Err(SessionBusy)
        }
    }

    /// The response body was fully written to the socket. This only proves
    /// the bytes left the server, so the session now waits for `/confirm`.
    pub fn stream_finished(&self) {
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Sending {
                tracing::info!("archive stream finished, awaiting confirmation");
                *phase = Phase::AwaitingConfirmation;
                true
            } else {
                false
            }
        });
    }

    /// The client dropped the connection before the stream finished.
    ///
    /// Policy: the interruption is reported and the session returns to
    /// `Listening` so the receiver can retry; the operator decides when to
    /// give up with Ctrl-C.
    pub fn client_disconnected(&self) {
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Sending {
                tracing::warn!("client disconnected before transfer completed, listening for retry");
                *phase = Phase::Listening;
                true
            } else {
                false
            }
        });
    }

    /// Archive build or local stream I/O failed. Partial output may already
    /// be on the wire, so the transfer is not retryable.
    pub fn transfer_failed(&self) {
        self.phase.send_if_modified(|phase| {
            if matches!(phase, Phase::Sending | Phase::Listening) {
                tracing::error!("transfer failed");
                *phase = Phase::Failed;
                true
            } else {
                false
            }
        });
    }

    /// `GET /confirm` arrived. Idempotent: only the first call transitions.
    pub fn confirm_received(&self) -> ConfirmAck {
        let mut ack = ConfirmAck::AlreadyConfirmed;
        self.phase.send_if_modified(|phase| match *phase {
            // Confirmation can race the server-side stream-finished event, so
            // it is also accepted while still nominally sending or listening.
            Phase::AwaitingConfirmation | Phase::Sending | Phase::Listening => {
                tracing::info!("transfer confirmed by receiver");
                *phase = Phase::Confirmed { assumed: false };
                ack = ConfirmAck::Confirmed;
                true
            }
            _ => false,
        });
        ack
    }

    /// The confirmation window elapsed. Treated as an assumed success so an
    /// older client that never calls `/confirm` cannot hang the session.
    /// Returns true when the transition fired.
    pub fn timeout_fired(&self) -> bool {
        let mut fired = false;
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::AwaitingConfirmation {
                tracing::info!("no confirmation within the window, assuming success");
                *phase = Phase::Confirmed { assumed: true };
                fired = true;
                true
            } else {
                false
            }
        });
        fired
    }

    /// Operator interrupt: close regardless of transfer phase.
    pub fn interrupt_requested(&self) {
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Closed {
                false
            } else {
                tracing::info!("interrupt requested, closing session");
                *phase = Phase::Closed;
                true
            }
        });
    }

    /// Final transition after teardown completes.
    pub fn close(&self) {
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Closed {
                false
            } else {
                *phase = Phase::Closed;
                true
            }
        });
    }
}
