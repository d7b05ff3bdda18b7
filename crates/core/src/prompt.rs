//! Prompt assembly for upstream calls.
//!
//! Handles the exchange-index template, the scenario's policy prompt, and the
//! flattening of a conversation into a single text-completion prompt.

use crate::{
    llm_client::{ChatBody, TextBody, UpstreamRequest},
    scenario::{CompletionParameters, EndpointKind, ScenarioConfig},
    turn::{Role, Turn},
};

/// Placeholder replaced with the zero-based exchange index.
pub const EXCHANGE_PLACEHOLDER: &str = "{exchange}";

/// Cue that ends a flattened transcript so the model answers as the bot.
pub const BOT_CUE: &str = "Assistant:";

/// Stop sequence keeping a text completion from writing the participant's next line.
pub const USER_STOP: &str = "\nUser:";

pub fn render_system_prompt(template: &str, exchange_index: u32) -> String {
    template.replace(EXCHANGE_PLACEHOLDER, &exchange_index.to_string())
}

/// Number of exchanges completed before the latest user turn.
pub fn prior_exchanges(messages: &[Turn]) -> u32 {
    let users = messages.iter().filter(|t| t.role == Role::User).count();
    u32::try_from(users.saturating_sub(1)).unwrap_or(u32::MAX)
}

/// Applies the scenario's prompt policy to a client message list.
///
/// When the scenario defines a prompt, client-supplied system messages are dropped and
/// the scenario prompt (rendered with the exchange index) leads the list.
pub fn policy_messages(scenario: &ScenarioConfig, messages: &[Turn]) -> Vec<Turn> {
    match &scenario.prompt_variant {
        Some(template) => {
            let system = render_system_prompt(template, prior_exchanges(messages));
            std::iter::once(Turn::system(system))
                .chain(messages.iter().filter(|t| t.role != Role::System).cloned())
                .collect()
        }
        None => messages.to_vec(),
    }
}

/// Flattens a conversation into one text block ending with the bot cue.
pub fn flatten_transcript(messages: &[Turn]) -> String {
    let mut prompt = String::new();
    for turn in messages {
        match turn.role {
            Role::System => {
                prompt.push_str(turn.content.trim());
                prompt.push_str("\n\n");
            }
            Role::User => {
                prompt.push_str("User: ");
                prompt.push_str(turn.content.trim());
                prompt.push('\n');
            }
            Role::Assistant => {
                prompt.push_str("Assistant: ");
                prompt.push_str(turn.content.trim());
                prompt.push('\n');
            }
        }
    }
    prompt.push_str(BOT_CUE);
    prompt
}

/// Builds the upstream body for a scenario in its configured endpoint form.
pub fn build_upstream_request(
    scenario: &ScenarioConfig,
    messages: &[Turn],
    params: CompletionParameters,
) -> UpstreamRequest {
    let messages = policy_messages(scenario, messages);
    match scenario.endpoint {
        EndpointKind::Chat => UpstreamRequest::Chat(ChatBody {
            model: scenario.model.clone(),
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        }),
        EndpointKind::Text => UpstreamRequest::Text(TextBody {
            model: scenario.model.clone(),
            prompt: flatten_transcript(&messages),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stop: Some(vec![USER_STOP.to_string()]),
        }),
    }
}
