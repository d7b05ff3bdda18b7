//! Experimental tracks and their exchange policy.
//!
//! A track decides how many exchanges a participant gets and which closing
//! messages are shown once that budget is spent.

use std::fmt;

const EFL_CLOSING_MESSAGES: [&str; 4] = [
    "This part of the study is now complete. Before you move on, take a moment to reflect. Think about whether this conversation shifted your perspective or helped you see the issue in a new light.",
    "We've completed this scenario. As you continue with the study, consider how this discussion may have influenced your thinking about the ethical dimensions of this situation.",
    "That concludes our conversation on this topic. Before continuing, reflect on whether exploring these questions has offered you a different perspective on the situation.",
    "Our discussion on this scenario is now complete. Take a moment to consider how this exploration might affect your approach to similar content in the future.",
];

const STANDARD_CLOSING_MESSAGES: [&str; 4] = [
    "Thanks for sharing your thoughts! This part of the study is now complete. Please proceed to the next section.",
    "Great chatting with you! This scenario is now complete. Time to move on to the next part.",
    "That's all for this scenario! Thanks for your responses. Please continue to the next section.",
    "We've finished this part of the study. Your input is appreciated! Please proceed to the next scenario.",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Track {
    Efl,
    #[default]
    Standard,
}

impl Track {
    /// Parses a bot-type label. Anything other than `efl` is the standard track.
    pub fn from_label(label: &str) -> Self {
        if label.trim().eq_ignore_ascii_case("efl") {
            Track::Efl
        } else {
            Track::Standard
        }
    }

    pub fn exchange_limit(self) -> u32 {
        match self {
            Track::Efl => 6,
            Track::Standard => 5,
        }
    }

    pub fn closing_messages(self) -> &'static [&'static str] {
        match self {
            Track::Efl => &EFL_CLOSING_MESSAGES,
            Track::Standard => &STANDARD_CLOSING_MESSAGES,
        }
    }

    pub fn policy(self) -> ExchangePolicy {
        ExchangePolicy {
            exchange_limit: self.exchange_limit(),
            closing_messages: self
                .closing_messages()
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Track::Efl => write!(f, "efl"),
            Track::Standard => write!(f, "standard"),
        }
    }
}

/// How many relayed exchanges a session may have, and what to say afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangePolicy {
    pub exchange_limit: u32,
    pub closing_messages: Vec<String>,
}

impl ExchangePolicy {
    /// Selects a closing message by its 1-based index, falling back to the first.
    pub fn closing_message(&self, index: usize) -> &str {
        index
            .checked_sub(1)
            .and_then(|i| self.closing_messages.get(i))
            .or_else(|| self.closing_messages.first())
            .map(String::as_str)
            .unwrap_or_default()
    }
}
