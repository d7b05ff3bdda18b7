//! Conversation Driver
//!
//! Runs a `Controller` against a real relay and a view. The driver owns all the
//! asynchronous effects:
//!
//! - each relay call runs in its own task, raced against the request timeout,
//!   and reports back tagged with its exchange id;
//! - replies are revealed by a `RevealHandle`, and a new bot message cancels any
//!   reveal still in progress;
//! - input is handed back by a timer scheduled for the reveal duration plus buffer.

use crate::{
    controller::{Controller, Session, Submission},
    reveal::{RevealHandle, spawn_reveal},
    wire::{CompletionRequest, CompletionResponse},
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info};

/// Failures of a controller-side relay call. All of them end in the fallback message.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Relay request timed out after {0:?}")]
    TimedOut(Duration),
    #[error("Relay returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Relay request failed: {0}")]
    Transport(String),
    #[error("Relay reply had no assistant text")]
    EmptyReply,
}

/// One completion call to the relay.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, RelayError>;
}

/// Everything the conversation renders.
pub trait ChatView: Send + Sync {
    /// Shows a participant message in full, with no animation.
    fn show_user_message(&self, text: &str);
    fn begin_bot_message(&self);
    fn append_bot_text(&self, text: &str);
    fn end_bot_message(&self);
    fn show_thinking(&self);
    fn hide_thinking(&self);
    /// A user-visible notice outside the transcript, such as a rate warning.
    fn notice(&self, text: &str);
    fn set_input_enabled(&self, enabled: bool);
}

#[derive(Debug)]
enum DriverEvent {
    Reply {
        exchange_id: u64,
        result: Result<String, RelayError>,
    },
    Release {
        exchange_id: u64,
    },
}

struct DriverState {
    controller: Controller,
    relay: Arc<dyn RelayClient>,
    view: Arc<dyn ChatView>,
    reveal: Option<RevealHandle>,
    events_tx: mpsc::Sender<DriverEvent>,
}

pub struct ConversationDriver {
    state: DriverState,
    events_rx: mpsc::Receiver<DriverEvent>,
}

impl ConversationDriver {
    pub fn new(controller: Controller, relay: Arc<dyn RelayClient>, view: Arc<dyn ChatView>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(16);
        Self {
            state: DriverState {
                controller,
                relay,
                view,
                reveal: None,
                events_tx,
            },
            events_rx,
        }
    }

    /// Activates the widget and processes input lines until `input` closes.
    ///
    /// After `input` closes, any pending exchange is still settled and its reveal
    /// finished before the final session is returned.
    pub async fn run(self, mut input: mpsc::Receiver<String>) -> Session {
        let Self {
            mut state,
            mut events_rx,
        } = self;

        state.activate().await;
        let mut input_open = true;

        loop {
            tokio::select! {
                line = input.recv(), if input_open => match line {
                    Some(text) => state.submit(&text).await,
                    None => {
                        debug!("Input closed");
                        input_open = false;
                    }
                },
                Some(event) = events_rx.recv() => state.handle_event(event).await,
            }

            if !input_open && !state.controller.session().locked {
                break;
            }
        }

        if let Some(reveal) = state.reveal.take() {
            reveal.finished().await;
        }
        state.controller.into_session()
    }
}

impl DriverState {
    async fn activate(&mut self) {
        info!(
            scenario_id = %self.controller.attributes().scenario_id,
            track = %self.controller.attributes().track,
            "Conversation activated"
        );
        let initial = self.controller.attributes().initial_message.clone();
        self.show_bot_message(initial).await;
        self.view.set_input_enabled(true);
    }

    async fn submit(&mut self, text: &str) {
        match self.controller.submit(text, Instant::now()) {
            Err(rejection) => match rejection.notice() {
                Some(notice) => self.view.notice(notice),
                None => debug!(?rejection, "Submission ignored"),
            },
            Ok(Submission::Closing { user_text, message }) => {
                self.view.show_user_message(&user_text);
                self.show_bot_message(message).await;
            }
            Ok(Submission::Relay(pending)) => {
                self.view.show_user_message(&pending.user_text);
                self.view.set_input_enabled(false);
                self.view.show_thinking();
                self.dispatch(pending.exchange_id, pending.request);
            }
        }
    }

    fn dispatch(&self, exchange_id: u64, request: CompletionRequest) {
        let relay = self.relay.clone();
        let events_tx = self.events_tx.clone();
        let timeout = self.controller.timing().request_timeout;

        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, relay.complete(request)).await {
                Ok(Ok(response)) => response
                    .reply_text()
                    .filter(|text| !text.is_empty())
                    .map(str::to_string)
                    .ok_or(RelayError::EmptyReply),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(RelayError::TimedOut(timeout)),
            };
            if events_tx
                .send(DriverEvent::Reply {
                    exchange_id,
                    result,
                })
                .await
                .is_err()
            {
                debug!(exchange_id, "Driver gone before reply arrived");
            }
        });
    }

    async fn handle_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Reply {
                exchange_id,
                result,
            } => {
                let Some(resolution) = self.controller.resolve(exchange_id, result) else {
                    return;
                };
                self.view.hide_thinking();
                self.show_bot_message(resolution.text).await;
                self.schedule_release(exchange_id, resolution.release_after);
            }
            DriverEvent::Release { exchange_id } => {
                if self.controller.release(exchange_id) {
                    self.view.set_input_enabled(true);
                }
            }
        }
    }

    fn schedule_release(&self, exchange_id: u64, after: Duration) {
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events_tx.send(DriverEvent::Release { exchange_id }).await;
        });
    }

    async fn show_bot_message(&mut self, text: String) {
        if let Some(previous) = self.reveal.take() {
            previous.cancel().await;
        }
        let per_char = self.controller.timing().reveal_char_delay;
        self.reveal = Some(spawn_reveal(self.view.clone(), text, per_char));
    }
}
