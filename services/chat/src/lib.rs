//! Terminal front end for the survey chatbot.
//!
//! Hosts the conversation controller in a terminal: participant lines come from
//! stdin, the transcript goes to stdout, and every turn is relayed over HTTP.

pub mod relay_client;
pub mod terminal;
