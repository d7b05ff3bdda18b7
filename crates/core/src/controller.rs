//! Conversation Controller
//!
//! A synchronous state machine owning one participant session. Each transition
//! takes the current instant explicitly, so every guard can be exercised without
//! real timers. Side effects (rendering, network, timers) are carried out by the
//! `ConversationDriver`; this module only decides what they should be.
//!
//! ```text
//!            submit (accepted)              reply / failure
//!   Idle ────────────────────▶ AwaitingReply ──────────────▶ (reveal) ──release──▶ Idle
//!    │
//!    └── submit with turn_count ≥ limit ──▶ closing message, stays unlocked (Closed)
//! ```

use crate::{
    driver::RelayError,
    prompt::render_system_prompt,
    scenario::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE},
    track::{ExchangePolicy, Track},
    turn::Turn,
    wire::CompletionRequest,
};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const FALLBACK_MESSAGE: &str = "Sorry, the study is experiencing high traffic right now. Please refresh this page and try again in a few minutes. Your input matters! Thanks!";
pub const TOO_SOON_NOTICE: &str = "Please wait a moment before sending another message.";
pub const DEFAULT_INITIAL_MESSAGE: &str = "What are your thoughts on the image above?";

pub const ATTR_INITIAL_MESSAGE: &str = "data-initial-message";
pub const ATTR_SYSTEM_PROMPT: &str = "data-system-prompt";
pub const ATTR_BOT_TYPE: &str = "data-bot-type";
pub const ATTR_CLOSING_INDEX: &str = "data-closing-message-index";
pub const ATTR_SCENARIO_ID: &str = "data-scenario-id";

/// Fixed timings of the widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub min_interval: Duration,
    pub request_timeout: Duration,
    pub reveal_char_delay: Duration,
    pub unlock_buffer: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(20),
            reveal_char_delay: Duration::from_millis(15),
            unlock_buffer: Duration::from_millis(300),
        }
    }
}

impl Timing {
    /// Time the reveal of `text` takes, plus the buffer before input returns.
    pub fn release_delay(&self, text: &str) -> Duration {
        let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
        self.reveal_char_delay
            .saturating_mul(chars)
            .saturating_add(self.unlock_buffer)
    }
}

/// Page-level configuration supplied by the host. Opaque apart from defaulting.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayAttributes {
    pub initial_message: String,
    pub system_prompt: String,
    pub track: Track,
    pub closing_index: usize,
    pub scenario_id: String,
}

impl Default for DisplayAttributes {
    fn default() -> Self {
        Self {
            initial_message: DEFAULT_INITIAL_MESSAGE.to_string(),
            system_prompt: String::new(),
            track: Track::Standard,
            closing_index: 1,
            scenario_id: String::new(),
        }
    }
}

impl DisplayAttributes {
    /// Reads the `data-*` attributes through `lookup`, defaulting any that are absent.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            initial_message: present(ATTR_INITIAL_MESSAGE).unwrap_or(defaults.initial_message),
            system_prompt: present(ATTR_SYSTEM_PROMPT).unwrap_or(defaults.system_prompt),
            track: present(ATTR_BOT_TYPE)
                .map(|label| Track::from_label(&label))
                .unwrap_or(defaults.track),
            closing_index: present(ATTR_CLOSING_INDEX)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.closing_index),
            scenario_id: present(ATTR_SCENARIO_ID).unwrap_or(defaults.scenario_id),
        }
    }
}

/// Per-page conversation state. Lives only as long as the page.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub turn_count: u32,
    pub history: Vec<Turn>,
    pub locked: bool,
    pub last_send: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingReply,
    Closed,
}

/// Why a submission was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// A reply is pending or still being revealed.
    Locked,
    Empty,
    TooSoon,
}

impl Rejection {
    /// The message to show the participant, if this rejection is user-visible.
    pub fn notice(self) -> Option<&'static str> {
        match self {
            Rejection::TooSoon => Some(TOO_SOON_NOTICE),
            Rejection::Locked | Rejection::Empty => None,
        }
    }
}

/// An accepted submission that needs a relay call.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingExchange {
    pub exchange_id: u64,
    pub user_text: String,
    pub request: CompletionRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Relay(PendingExchange),
    /// The exchange budget is spent; answer locally with no network call.
    Closing { user_text: String, message: String },
}

/// What to show once a relay call settles, and when to hand input back.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub exchange_id: u64,
    pub text: String,
    pub fallback: bool,
    pub release_after: Duration,
}

pub struct Controller {
    attributes: DisplayAttributes,
    policy: ExchangePolicy,
    timing: Timing,
    session: Session,
    next_exchange_id: u64,
    awaiting: Option<u64>,
    revealing: Option<u64>,
}

impl Controller {
    pub fn new(attributes: DisplayAttributes, timing: Timing) -> Self {
        let policy = attributes.track.policy();
        Self {
            attributes,
            policy,
            timing,
            session: Session::default(),
            next_exchange_id: 1,
            awaiting: None,
            revealing: None,
        }
    }

    /// Replaces the track-derived exchange policy.
    pub fn with_policy(mut self, policy: ExchangePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &ExchangePolicy {
        &self.policy
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    pub fn attributes(&self) -> &DisplayAttributes {
        &self.attributes
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn phase(&self) -> Phase {
        if self.session.locked {
            Phase::AwaitingReply
        } else if self.session.turn_count >= self.policy.exchange_limit {
            Phase::Closed
        } else {
            Phase::Idle
        }
    }

    /// Applies the submission guards and, if accepted, records the user turn.
    pub fn submit(&mut self, text: &str, now: Instant) -> Result<Submission, Rejection> {
        if self.session.locked {
            return Err(Rejection::Locked);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(Rejection::Empty);
        }
        if let Some(last) = self.session.last_send {
            if now.saturating_duration_since(last) < self.timing.min_interval {
                return Err(Rejection::TooSoon);
            }
        }

        self.session.last_send = Some(now);
        self.session.history.push(Turn::user(text));

        if self.session.turn_count >= self.policy.exchange_limit {
            info!(
                turn_count = self.session.turn_count,
                exchange_limit = self.policy.exchange_limit,
                "Exchange limit reached, answering with closing message"
            );
            return Ok(Submission::Closing {
                user_text: text.to_string(),
                message: self
                    .policy
                    .closing_message(self.attributes.closing_index)
                    .to_string(),
            });
        }

        let exchange_index = self.session.turn_count;
        self.session.turn_count += 1;
        self.session.locked = true;

        let exchange_id = self.next_exchange_id;
        self.next_exchange_id += 1;
        self.awaiting = Some(exchange_id);

        let mut messages = Vec::with_capacity(self.session.history.len() + 1);
        if !self.attributes.system_prompt.trim().is_empty() {
            messages.push(Turn::system(render_system_prompt(
                &self.attributes.system_prompt,
                exchange_index,
            )));
        }
        messages.extend(self.session.history.iter().cloned());

        debug!(exchange_id, exchange_index, "Submission accepted");
        Ok(Submission::Relay(PendingExchange {
            exchange_id,
            user_text: text.to_string(),
            request: CompletionRequest {
                messages,
                scenario_id: self.attributes.scenario_id.clone(),
                temperature: Some(DEFAULT_TEMPERATURE),
                max_tokens: Some(DEFAULT_MAX_TOKENS),
            },
        }))
    }

    /// Settles the pending exchange. Returns `None` for a stale or unknown exchange,
    /// whose result must be dropped.
    pub fn resolve(
        &mut self,
        exchange_id: u64,
        result: Result<String, RelayError>,
    ) -> Option<Resolution> {
        if self.awaiting != Some(exchange_id) {
            debug!(exchange_id, "Discarding reply for an exchange that is no longer pending");
            return None;
        }
        self.awaiting = None;
        self.revealing = Some(exchange_id);

        let (text, fallback) = match result {
            Ok(reply) => {
                self.session.history.push(Turn::assistant(reply.clone()));
                (reply, false)
            }
            Err(e) => {
                warn!(exchange_id, error = %e, "Relay call failed, showing fallback message");
                (FALLBACK_MESSAGE.to_string(), true)
            }
        };

        Some(Resolution {
            exchange_id,
            release_after: self.timing.release_delay(&text),
            text,
            fallback,
        })
    }

    /// Unlocks input once the reveal of `exchange_id` has had time to finish.
    pub fn release(&mut self, exchange_id: u64) -> bool {
        if self.revealing != Some(exchange_id) {
            return false;
        }
        self.revealing = None;
        self.session.locked = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::Role;

    fn attributes(track: Track) -> DisplayAttributes {
        DisplayAttributes {
            system_prompt: "You are on exchange {exchange}.".to_string(),
            track,
            scenario_id: "a-consumerism-efl".to_string(),
            ..DisplayAttributes::default()
        }
    }

    fn controller(track: Track) -> Controller {
        Controller::new(attributes(track), Timing::default())
    }

    fn expect_relay(submission: Result<Submission, Rejection>) -> PendingExchange {
        match submission {
            Ok(Submission::Relay(pending)) => pending,
            other => panic!("Expected relay submission, got {:?}", other),
        }
    }

    /// Runs one accepted exchange sent at `at` through to release.
    fn complete_exchange(c: &mut Controller, at: Instant, reply: &str) {
        let pending = expect_relay(c.submit("answer", at));
        let resolution = c.resolve(pending.exchange_id, Ok(reply.to_string())).unwrap();
        assert!(c.release(resolution.exchange_id));
    }

    #[test]
    fn test_accepted_submission_locks_and_counts() {
        let mut c = controller(Track::Efl);
        let now = Instant::now();

        let pending = expect_relay(c.submit("  What is this?  ", now));

        assert_eq!(pending.user_text, "What is this?");
        assert_eq!(c.session().turn_count, 1);
        assert!(c.session().locked);
        assert_eq!(c.phase(), Phase::AwaitingReply);
        assert_eq!(c.session().history, vec![Turn::user("What is this?")]);
        assert_eq!(pending.request.scenario_id, "a-consumerism-efl");
        assert_eq!(
            pending.request.messages,
            vec![
                Turn::system("You are on exchange 0."),
                Turn::user("What is this?")
            ]
        );
    }

    #[test]
    fn test_locked_submission_is_noop() {
        let mut c = controller(Track::Efl);
        let now = Instant::now();
        expect_relay(c.submit("first", now));

        let later = now + Duration::from_secs(5);
        assert_eq!(c.submit("second", later), Err(Rejection::Locked));
        assert_eq!(c.session().history.len(), 1);
        assert_eq!(c.session().turn_count, 1);
    }

    #[test]
    fn test_empty_submission_is_ignored() {
        let mut c = controller(Track::Standard);
        assert_eq!(c.submit("   \n", Instant::now()), Err(Rejection::Empty));
        assert!(c.session().history.is_empty());
        assert_eq!(Rejection::Empty.notice(), None);
    }

    #[test]
    fn test_too_soon_submission_is_rejected_with_notice() {
        let mut c = controller(Track::Standard);
        let start = Instant::now();
        complete_exchange(&mut c, start, "ok");

        let result = c.submit("again", start + Duration::from_millis(1999));
        assert_eq!(result, Err(Rejection::TooSoon));
        assert_eq!(Rejection::TooSoon.notice(), Some(TOO_SOON_NOTICE));
        assert_eq!(c.session().turn_count, 1);
        assert_eq!(c.session().history.len(), 2);

        expect_relay(c.submit("again", start + Duration::from_millis(2000)));
    }

    #[test]
    fn test_exchange_index_in_prompt_is_pre_increment() {
        let mut c = controller(Track::Efl);
        let mut now = Instant::now();
        complete_exchange(&mut c, now, "one");
        now += Duration::from_secs(3);
        complete_exchange(&mut c, now, "two");
        now += Duration::from_secs(3);

        let pending = expect_relay(c.submit("third", now));
        assert_eq!(
            pending.request.messages[0],
            Turn::system("You are on exchange 2.")
        );
        assert_eq!(pending.request.messages.len(), 6);
    }

    #[test]
    fn test_limit_reached_yields_closing_without_relay() {
        let mut c = controller(Track::Standard);
        let mut now = Instant::now();
        for _ in 0..5 {
            complete_exchange(&mut c, now, "ok");
            now += Duration::from_secs(3);
        }
        assert_eq!(c.phase(), Phase::Closed);

        match c.submit("one more", now) {
            Ok(Submission::Closing { user_text, message }) => {
                assert_eq!(user_text, "one more");
                assert_eq!(message, Track::Standard.closing_messages()[0]);
            }
            other => panic!("Expected closing message, got {:?}", other),
        }
        assert_eq!(c.session().turn_count, 5);
        assert!(!c.session().locked);
        assert_eq!(c.phase(), Phase::Closed);
    }

    #[test]
    fn test_closing_message_uses_configured_index() {
        let attributes = DisplayAttributes {
            closing_index: 3,
            ..attributes(Track::Efl)
        };
        let policy = ExchangePolicy {
            exchange_limit: 1,
            closing_messages: vec!["a".into(), "b".into(), "c".into()],
        };
        let mut c = Controller::new(attributes, Timing::default()).with_policy(policy);
        let now = Instant::now();
        complete_exchange(&mut c, now, "ok");

        match c.submit("more", now + Duration::from_secs(3)) {
            Ok(Submission::Closing { message, .. }) => assert_eq!(message, "c"),
            other => panic!("Expected closing message, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_resolves_to_fallback_without_history() {
        let mut c = controller(Track::Efl);
        let pending = expect_relay(c.submit("hello", Instant::now()));

        let resolution = c
            .resolve(
                pending.exchange_id,
                Err(RelayError::TimedOut(Duration::from_secs(20))),
            )
            .unwrap();

        assert!(resolution.fallback);
        assert_eq!(resolution.text, FALLBACK_MESSAGE);
        assert_eq!(c.session().history.len(), 1);
        assert!(c.session().locked);
        assert!(c.release(pending.exchange_id));
        assert!(!c.session().locked);
    }

    #[test]
    fn test_stale_reply_is_discarded() {
        let mut c = controller(Track::Efl);
        let pending = expect_relay(c.submit("hello", Instant::now()));
        c.resolve(pending.exchange_id, Err(RelayError::EmptyReply))
            .unwrap();

        assert!(c.resolve(pending.exchange_id, Ok("late".into())).is_none());
        assert!(c.resolve(999, Ok("unknown".into())).is_none());
        assert!(
            c.session()
                .history
                .iter()
                .all(|t| t.role != Role::Assistant)
        );
    }

    #[test]
    fn test_release_requires_matching_exchange() {
        let mut c = controller(Track::Efl);
        let pending = expect_relay(c.submit("hello", Instant::now()));
        assert!(!c.release(pending.exchange_id));
        c.resolve(pending.exchange_id, Ok("hi".into())).unwrap();
        assert!(!c.release(pending.exchange_id + 1));
        assert!(c.release(pending.exchange_id));
        assert_eq!(c.phase(), Phase::Idle);
    }

    #[test]
    fn test_release_delay_matches_reveal() {
        let timing = Timing::default();
        assert_eq!(timing.release_delay(""), Duration::from_millis(300));
        assert_eq!(timing.release_delay("hello"), Duration::from_millis(375));
        assert_eq!(timing.release_delay("héllo"), Duration::from_millis(375));
    }

    #[test]
    fn test_empty_system_prompt_is_omitted() {
        let attributes = DisplayAttributes {
            scenario_id: "a-x-std".into(),
            ..DisplayAttributes::default()
        };
        let mut c = Controller::new(attributes, Timing::default());
        let pending = expect_relay(c.submit("hi", Instant::now()));
        assert_eq!(pending.request.messages, vec![Turn::user("hi")]);
        assert_eq!(pending.request.temperature, Some(DEFAULT_TEMPERATURE));
        assert_eq!(pending.request.max_tokens, Some(DEFAULT_MAX_TOKENS));
    }

    #[test]
    fn test_display_attributes_default_when_absent() {
        let attributes = DisplayAttributes::from_lookup(|_| None);
        assert_eq!(attributes, DisplayAttributes::default());
        assert_eq!(attributes.initial_message, DEFAULT_INITIAL_MESSAGE);
        assert_eq!(attributes.closing_index, 1);
    }

    #[test]
    fn test_display_attributes_from_lookup() {
        let attributes = DisplayAttributes::from_lookup(|key| match key {
            ATTR_INITIAL_MESSAGE => Some("Look at the ad.".to_string()),
            ATTR_BOT_TYPE => Some("efl".to_string()),
            ATTR_CLOSING_INDEX => Some("not-a-number".to_string()),
            ATTR_SCENARIO_ID => Some("b-consumerism-efl".to_string()),
            ATTR_SYSTEM_PROMPT => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(attributes.initial_message, "Look at the ad.");
        assert_eq!(attributes.track, Track::Efl);
        assert_eq!(attributes.closing_index, 1);
        assert_eq!(attributes.scenario_id, "b-consumerism-efl");
        assert_eq!(attributes.system_prompt, "");
    }
}
