use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use reqwest::Client as HttpClient;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tryon_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use tryon_contracts::outfits::outfit_by_number;
use tryon_engine::{GenerativeService, ImageSlot, Session, SessionState};

use crate::library::{fetch_outfit, print_outfits};
use crate::render::render_events;

pub type CliSession = Session<Box<dyn GenerativeService>>;

const BUSY_NOTICE: &str = "The stylist is still working. Please wait.";

/// Interactive loop: slash commands drive uploads and session control,
/// everything else is a chat turn. Output comes from the event renderer.
pub async fn run_chat(session: CliSession, out_dir: PathBuf) -> Result<()> {
    let renderer = tokio::spawn(render_events(session.subscribe()));
    let http = HttpClient::new();

    println!("Virtual try-on stylist. Type /help for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let intent = parse_intent(&line);
        match intent.action.as_str() {
            "noop" => {}
            "help" => println!("Commands: {}", CHAT_HELP_COMMANDS.join(" ")),
            "quit" => break,
            "set_person" => upload(&session, ImageSlot::Person, &intent).await,
            "set_garment" => upload(&session, ImageSlot::Garment, &intent).await,
            "list_outfits" => print_outfits(),
            "select_outfit" => select_outfit(&session, &http, &intent).await,
            "status" => print_status(&session.snapshot()),
            "reset" => session.reset(),
            "save_result" => {
                let target = arg_str(&intent, "path")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| out_dir.clone());
                save(&session, &target).await;
            }
            "try_on" => {
                if session.snapshot().loading().any() {
                    println!("{BUSY_NOTICE}");
                    continue;
                }
                let flow = session.clone();
                tokio::spawn(async move {
                    match flow.try_on().await {
                        Ok(outcome) => debug!(?outcome, "try-on finished"),
                        Err(err) => debug!(error = %err, "try-on rejected"),
                    }
                });
            }
            "chat" => {
                let Some(prompt) = intent.prompt.clone() else {
                    continue;
                };
                if session.snapshot().loading().any() {
                    println!("{BUSY_NOTICE}");
                    continue;
                }
                println!("you: {prompt}");
                let flow = session.clone();
                tokio::spawn(async move {
                    match flow.send_message(&prompt).await {
                        Ok(outcome) => debug!(?outcome, "chat turn finished"),
                        Err(err) => debug!(error = %err, "chat turn rejected"),
                    }
                });
            }
            "unknown" => {
                let command = arg_str(&intent, "command").unwrap_or_default();
                println!("Unknown command: /{command}. Type /help for commands.");
            }
            other => debug!(action = other, "unhandled intent"),
        }
    }

    if let Err(err) = session.flush_log().await {
        warn!(error = %err, "failed to flush session event log");
    }
    drop(session);
    renderer.abort();
    info!("chat session ended");
    Ok(())
}

fn arg_str<'a>(intent: &'a Intent, key: &str) -> Option<&'a str> {
    intent
        .command_args
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

async fn upload(session: &CliSession, slot: ImageSlot, intent: &Intent) {
    let Some(path) = arg_str(intent, "path") else {
        println!("Usage: /{} <path>", slot.label());
        return;
    };
    // The session reports rejections on the banner; the renderer prints it.
    if let Err(err) = session.upload(slot, Path::new(path)).await {
        debug!(error = %err, path, "upload rejected");
    }
}

async fn select_outfit(session: &CliSession, http: &HttpClient, intent: &Intent) {
    let outfit = intent
        .command_args
        .get("index")
        .and_then(Value::as_u64)
        .and_then(outfit_by_number);
    let Some(outfit) = outfit else {
        println!("Usage: /outfit <number>. Type /outfits to list them.");
        return;
    };
    match fetch_outfit(http, outfit).await {
        Ok(image) => {
            println!("Using {} as the garment.", outfit.description);
            session.set_image(ImageSlot::Garment, image);
        }
        Err(err) => println!("Could not load {}: {err:#}", outfit.description),
    }
}

async fn save(session: &CliSession, target: &Path) {
    match session.save_result(target).await {
        Ok(Some(path)) => println!("Saved {}", path.display()),
        Ok(None) => println!("Nothing to save yet."),
        Err(err) => println!("Could not save: {err}"),
    }
}

fn print_status(state: &SessionState) {
    let ready = |present: bool| if present { "ready" } else { "missing" };
    println!("person:  {}", ready(state.person_image().is_some()));
    println!("garment: {}", ready(state.garment_image().is_some()));
    println!("result:  {}", ready(state.result_image().is_some()));
    let loading = state.loading();
    println!(
        "busy:    composite={} chat={} advice={}",
        loading.composite, loading.chat_turn, loading.advice
    );
    if let Some(error) = state.error() {
        println!("error:   {error}");
    }
    println!("messages: {}", state.transcript().len());
}
