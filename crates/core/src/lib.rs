//! Core of the survey chatbot: the participant-side conversation controller and
//! the pieces of the relay that do not depend on HTTP serving.

pub mod controller;
pub mod driver;
pub mod llm_client;
pub mod prompt;
pub mod retry;
pub mod reveal;
pub mod scenario;
pub mod track;
pub mod turn;
pub mod wire;
