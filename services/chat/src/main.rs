//! Entrypoint for the terminal chat front end.

use anyhow::Result;
use clap::Parser;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use survey_chat::{relay_client::HttpRelay, terminal::TerminalView};
use survey_core::{
    controller::{
        ATTR_BOT_TYPE, ATTR_CLOSING_INDEX, ATTR_INITIAL_MESSAGE, ATTR_SCENARIO_ID,
        ATTR_SYSTEM_PROMPT, Controller, DisplayAttributes, Timing,
    },
    driver::ConversationDriver,
    scenario::ScenarioFile,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "survey-chat")]
#[command(about = "Chat with a survey scenario through the completion relay", long_about = None)]
struct Cli {
    /// Full URL of the relay's chat endpoint
    #[arg(long, env = "RELAY_URL", default_value = "http://127.0.0.1:3000/chat")]
    relay_url: String,

    /// Scenario id, e.g. a-consumerism-efl
    #[arg(long, env = "SCENARIO_ID")]
    scenario: Option<String>,

    /// First bot message, shown as soon as the chat activates
    #[arg(long)]
    initial_message: Option<String>,

    /// System prompt template; `{exchange}` is replaced with the exchange index
    #[arg(long)]
    system_prompt: Option<String>,

    /// Track label: `efl` or anything else for the standard track
    #[arg(long)]
    bot_type: Option<String>,

    /// 1-based index of the closing message
    #[arg(long)]
    closing_index: Option<String>,

    /// Scenario file whose exchange limit and closing messages override the track defaults
    #[arg(long, env = "SCENARIOS_PATH")]
    scenarios: Option<PathBuf>,

    /// Wait a random 1-5 s before activating
    #[arg(long)]
    stagger: bool,
}

impl Cli {
    fn display_attributes(&self) -> DisplayAttributes {
        DisplayAttributes::from_lookup(|key| {
            match key {
                ATTR_INITIAL_MESSAGE => &self.initial_message,
                ATTR_SYSTEM_PROMPT => &self.system_prompt,
                ATTR_BOT_TYPE => &self.bot_type,
                ATTR_CLOSING_INDEX => &self.closing_index,
                ATTR_SCENARIO_ID => &self.scenario,
                _ => &None,
            }
            .clone()
        })
    }

    fn build_controller(&self) -> Result<Controller> {
        let attributes = self.display_attributes();
        let scenario_id = attributes.scenario_id.clone();
        let controller = Controller::new(attributes, Timing::default());

        let Some(path) = &self.scenarios else {
            return Ok(controller);
        };
        let file = ScenarioFile::load(path)?;
        match file.policy_for(&scenario_id) {
            Some(policy) => {
                debug!(%scenario_id, exchange_limit = policy.exchange_limit, "Using scenario exchange policy");
                Ok(controller.with_policy(policy))
            }
            None => {
                warn!(%scenario_id, path = %path.display(), "Scenario not in file, using track policy");
                Ok(controller)
            }
        }
    }
}

fn stagger_delay() -> Duration {
    Duration::from_millis(rand::rng().random_range(1000..=5000))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // The transcript owns stdout, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    let controller = cli.build_controller()?;
    let relay = Arc::new(HttpRelay::new(cli.relay_url.clone())?);
    let view = Arc::new(TerminalView::new(std::io::stdout()));

    if cli.stagger {
        let delay = stagger_delay();
        debug!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Staggering activation"
        );
        tokio::time::sleep(delay).await;
    }

    let (input_tx, input_rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if input_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let session = ConversationDriver::new(controller, relay, view).run(input_rx).await;

    info!(
        exchanges = session.turn_count,
        turns = session.history.len(),
        "Conversation ended"
    );
    Ok(())
}
