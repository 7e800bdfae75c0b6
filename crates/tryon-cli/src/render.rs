use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tracing::warn;
use tryon_contracts::chat::Sender;
use tryon_engine::{LoadingFlags, SessionEvent};

const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Turns session events into terminal lines: transcript, result pane,
/// error banner and the "thinking" indicator.
#[derive(Debug, Default)]
pub struct Renderer {
    last: LoadingFlags,
}

impl Renderer {
    pub fn lines_for(&mut self, event: &SessionEvent) -> Vec<String> {
        match event {
            SessionEvent::InputLoaded(slot) => vec![format!("[{} image ready]", slot.label())],
            SessionEvent::LoadingChanged(flags) => self.loading_lines(*flags),
            SessionEvent::ResultImage(image) => vec![format!(
                "[result image ready ({}); /save to download]",
                image.mime_type()
            )],
            SessionEvent::ResultText(text) => vec![format!("result: {}", format_bold(text))],
            SessionEvent::MessageAppended(message) => match message.sender {
                // The user already sees what they typed.
                Sender::User => Vec::new(),
                Sender::Assistant => vec![format!("stylist: {}", format_bold(&message.text))],
            },
            SessionEvent::ErrorChanged(Some(error)) => vec![format!("Error: {error}")],
            SessionEvent::Reset => {
                self.last = LoadingFlags::default();
                vec!["Session reset.".to_string()]
            }
            SessionEvent::ErrorChanged(None)
            | SessionEvent::ResultCleared
            | SessionEvent::TranscriptCleared => Vec::new(),
        }
    }

    fn loading_lines(&mut self, flags: LoadingFlags) -> Vec<String> {
        let mut lines = Vec::new();
        if flags.composite && !self.last.composite {
            lines.push("Generating your look...".to_string());
        }
        let thinking = flags.chat_turn || flags.advice;
        let was_thinking = self.last.chat_turn || self.last.advice;
        if thinking && !was_thinking {
            lines.push("stylist: . . .".to_string());
        }
        self.last = flags;
        lines
    }
}

pub async fn render_events(mut events: Receiver<SessionEvent>) {
    let mut renderer = Renderer::default();
    loop {
        match events.recv().await {
            Ok(event) => {
                for line in renderer.lines_for(&event) {
                    println!("{line}");
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "renderer fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Renders `**text**` spans in bold. An unmatched marker is left as is.
pub fn format_bold(text: &str) -> String {
    let segments: Vec<&str> = text.split("**").collect();
    if segments.len() < 3 {
        return text.to_string();
    }
    let closed = if segments.len() % 2 == 1 {
        segments.len()
    } else {
        segments.len() - 1
    };
    let mut out = String::with_capacity(text.len() + 16);
    for (idx, segment) in segments[..closed].iter().enumerate() {
        if idx % 2 == 1 {
            out.push_str(BOLD);
            out.push_str(segment);
            out.push_str(RESET);
        } else {
            out.push_str(segment);
        }
    }
    if closed < segments.len() {
        out.push_str("**");
        out.push_str(segments[closed]);
    }
    out
}
