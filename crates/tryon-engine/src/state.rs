use serde_json::{json, Value};
use tryon_contracts::chat::ChatMessage;
use tryon_contracts::config::PromptTemplates;
use tryon_contracts::events::EventPayload;
use tryon_contracts::{EncodedImage, TryOnError, TryOnResult};

use crate::client::Generation;

pub const COMPOSITE_GREETING: &str =
    "Voilà! Here is your new look. Let me give you some style tips...";
pub const EDIT_ACKNOWLEDGEMENT: &str =
    "Here's the updated image! One moment while I gather some style tips for you...";
pub const MISSING_INPUTS: &str = "Please upload both a person and a clothing item.";
pub const MISSING_PHOTO: &str = "Please upload your photo first.";
pub const EMPTY_MESSAGE: &str = "Please type a message for the stylist.";
pub const PRIMARY_BUSY: &str = "Another request is already in progress.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSlot {
    Person,
    Garment,
}

impl ImageSlot {
    pub fn label(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Garment => "garment",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadingFlags {
    pub composite: bool,
    pub chat_turn: bool,
    pub advice: bool,
}

impl LoadingFlags {
    pub fn primary(&self) -> bool {
        self.composite || self.chat_turn
    }

    pub fn any(&self) -> bool {
        self.primary() || self.advice
    }
}

/// Identifies the session generation a flow was started in. Completions
/// from an older generation are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowTicket {
    epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    InputLoaded(ImageSlot),
    LoadingChanged(LoadingFlags),
    ResultImage(EncodedImage),
    ResultText(String),
    ResultCleared,
    TranscriptCleared,
    MessageAppended(ChatMessage),
    ErrorChanged(Option<String>),
    Reset,
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputLoaded(_) => "input_loaded",
            Self::LoadingChanged(_) => "loading_changed",
            Self::ResultImage(_) => "result_image",
            Self::ResultText(_) => "result_text",
            Self::ResultCleared => "result_cleared",
            Self::TranscriptCleared => "transcript_cleared",
            Self::MessageAppended(_) => "message_appended",
            Self::ErrorChanged(_) => "error_changed",
            Self::Reset => "reset",
        }
    }

    /// Log payload. Image payloads are summarised, never copied.
    pub fn payload(&self) -> EventPayload {
        let value = match self {
            Self::InputLoaded(slot) => json!({ "slot": slot.label() }),
            Self::LoadingChanged(flags) => json!({
                "composite": flags.composite,
                "chat_turn": flags.chat_turn,
                "advice": flags.advice,
            }),
            Self::ResultImage(image) => json!({
                "mime_type": image.mime_type(),
                "base64_len": image.base64().len(),
            }),
            Self::ResultText(text) => json!({ "text": text }),
            Self::MessageAppended(message) => json!({
                "sender": message.sender,
                "text": message.text,
            }),
            Self::ErrorChanged(error) => json!({ "error": error }),
            Self::ResultCleared | Self::TranscriptCleared | Self::Reset => json!({}),
        };
        match value {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        }
    }
}

pub struct CompositeStart {
    pub ticket: FlowTicket,
    pub person: EncodedImage,
    pub garment: EncodedImage,
}

pub struct ChatTurnStart {
    pub ticket: FlowTicket,
    pub base: EncodedImage,
    pub instruction: String,
}

pub type Events = Vec<SessionEvent>;

/// Single source of truth for one try-on session.
///
/// All mutation goes through the transition methods below; each returns
/// the events it produced. `finish_*` transitions return `None` when the
/// ticket is stale, in which case nothing changed.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    person_image: Option<EncodedImage>,
    garment_image: Option<EncodedImage>,
    result_image: Option<EncodedImage>,
    result_text: Option<String>,
    transcript: Vec<ChatMessage>,
    loading: LoadingFlags,
    advice_in_flight: u32,
    error: Option<String>,
    epoch: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn person_image(&self) -> Option<&EncodedImage> {
        self.person_image.as_ref()
    }

    pub fn garment_image(&self) -> Option<&EncodedImage> {
        self.garment_image.as_ref()
    }

    pub fn result_image(&self) -> Option<&EncodedImage> {
        self.result_image.as_ref()
    }

    pub fn result_text(&self) -> Option<&str> {
        self.result_text.as_deref()
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn loading(&self) -> LoadingFlags {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_current(&self, ticket: FlowTicket) -> bool {
        ticket.epoch == self.epoch
    }

    pub fn load_image(&mut self, slot: ImageSlot, image: EncodedImage) -> Events {
        match slot {
            ImageSlot::Person => self.person_image = Some(image),
            ImageSlot::Garment => self.garment_image = Some(image),
        }
        vec![SessionEvent::InputLoaded(slot)]
    }

    /// Surfaces a rejected request as the error banner. Always emits, so a
    /// repeated rejection is shown again.
    pub fn reject(&mut self, err: &TryOnError) -> Events {
        self.error = Some(err.to_string());
        vec![SessionEvent::ErrorChanged(self.error.clone())]
    }

    pub fn begin_composite(&mut self) -> TryOnResult<(CompositeStart, Events)> {
        if self.loading.primary() {
            return Err(TryOnError::validation(PRIMARY_BUSY));
        }
        let (Some(person), Some(garment)) = (self.person_image.clone(), self.garment_image.clone())
        else {
            return Err(TryOnError::validation(MISSING_INPUTS));
        };

        // A new composite starts a new conversation.
        self.epoch += 1;
        self.advice_in_flight = 0;
        self.loading.advice = false;
        let mut events = self.set_error(None);
        self.result_image = None;
        self.result_text = None;
        self.transcript.clear();
        events.push(SessionEvent::ResultCleared);
        events.push(SessionEvent::TranscriptCleared);
        self.loading.composite = true;
        events.push(SessionEvent::LoadingChanged(self.loading));

        Ok((
            CompositeStart {
                ticket: self.ticket(),
                person,
                garment,
            },
            events,
        ))
    }

    pub fn finish_composite(&mut self, ticket: FlowTicket, generation: &Generation) -> Option<Events> {
        if !self.is_current(ticket) {
            return None;
        }
        let mut events = Vec::new();
        if let Some(image) = generation.image.clone() {
            self.result_image = Some(image.clone());
            events.push(SessionEvent::ResultImage(image));
            self.transcript.clear();
            events.push(SessionEvent::TranscriptCleared);
            let greeting = generation
                .text
                .clone()
                .unwrap_or_else(|| COMPOSITE_GREETING.to_string());
            events.push(self.append(ChatMessage::assistant(greeting)));
        } else if let Some(text) = generation.text.clone() {
            self.result_text = Some(text.clone());
            events.push(SessionEvent::ResultText(text));
        }
        self.loading.composite = false;
        events.push(SessionEvent::LoadingChanged(self.loading));
        Some(events)
    }

    pub fn fail_composite(&mut self, ticket: FlowTicket, err: &TryOnError) -> Option<Events> {
        if !self.is_current(ticket) {
            return None;
        }
        let mut events = self.set_error(Some(format!(
            "An error occurred during virtual try-on: {err}"
        )));
        self.loading.composite = false;
        events.push(SessionEvent::LoadingChanged(self.loading));
        Some(events)
    }

    /// Starts an edit turn. The base is the latest result, else the
    /// uploaded photo; without a result the text is wrapped as a full
    /// outfit description.
    pub fn begin_chat_turn(
        &mut self,
        text: &str,
        prompts: &PromptTemplates,
    ) -> TryOnResult<(ChatTurnStart, Events)> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TryOnError::validation(EMPTY_MESSAGE));
        }
        if self.loading.primary() {
            return Err(TryOnError::validation(PRIMARY_BUSY));
        }
        let (base, instruction) = match (&self.result_image, &self.person_image) {
            (Some(result), _) => (result.clone(), text.to_string()),
            (None, Some(person)) => (person.clone(), prompts.described_outfit_for(text)),
            (None, None) => return Err(TryOnError::validation(MISSING_PHOTO)),
        };

        let mut events = self.set_error(None);
        events.push(self.append(ChatMessage::user(text)));
        self.loading.chat_turn = true;
        events.push(SessionEvent::LoadingChanged(self.loading));
        Ok((
            ChatTurnStart {
                ticket: self.ticket(),
                base,
                instruction,
            },
            events,
        ))
    }

    pub fn finish_chat_turn(&mut self, ticket: FlowTicket, generation: &Generation) -> Option<Events> {
        if !self.is_current(ticket) {
            return None;
        }
        let mut events = Vec::new();
        if let Some(image) = generation.image.clone() {
            self.result_image = Some(image.clone());
            self.result_text = None;
            events.push(SessionEvent::ResultImage(image));
        }
        let reply = generation
            .text
            .clone()
            .unwrap_or_else(|| EDIT_ACKNOWLEDGEMENT.to_string());
        events.push(self.append(ChatMessage::assistant(reply)));
        self.loading.chat_turn = false;
        events.push(SessionEvent::LoadingChanged(self.loading));
        Some(events)
    }

    pub fn fail_chat_turn(&mut self, ticket: FlowTicket, err: &TryOnError) -> Option<Events> {
        if !self.is_current(ticket) {
            return None;
        }
        let events = vec![
            self.append(ChatMessage::assistant(format!(
                "Sorry, I couldn't process that. {err}"
            ))),
            self.stop_chat_turn(),
        ];
        Some(events)
    }

    pub fn begin_advice(&mut self, ticket: FlowTicket) -> Option<Events> {
        if !self.is_current(ticket) {
            return None;
        }
        self.advice_in_flight += 1;
        self.loading.advice = true;
        Some(vec![SessionEvent::LoadingChanged(self.loading)])
    }

    /// Appends exactly one assistant message: the advice or an apology.
    pub fn finish_advice(&mut self, ticket: FlowTicket, advice: &TryOnResult<String>) -> Option<Events> {
        if !self.is_current(ticket) {
            return None;
        }
        let text = match advice {
            Ok(text) => text.clone(),
            Err(err) => format!("Sorry, I couldn't get fashion advice right now. {err}"),
        };
        let mut events = vec![self.append(ChatMessage::assistant(text))];
        self.advice_in_flight = self.advice_in_flight.saturating_sub(1);
        self.loading.advice = self.advice_in_flight > 0;
        events.push(SessionEvent::LoadingChanged(self.loading));
        Some(events)
    }

    /// Back to the empty session. In-flight flows keep running but their
    /// tickets are now stale.
    pub fn reset(&mut self) -> Events {
        let epoch = self.epoch + 1;
        *self = Self {
            epoch,
            ..Self::default()
        };
        vec![
            SessionEvent::Reset,
            SessionEvent::LoadingChanged(self.loading),
        ]
    }

    fn ticket(&self) -> FlowTicket {
        FlowTicket { epoch: self.epoch }
    }

    fn append(&mut self, message: ChatMessage) -> SessionEvent {
        self.transcript.push(message.clone());
        SessionEvent::MessageAppended(message)
    }

    fn stop_chat_turn(&mut self) -> SessionEvent {
        self.loading.chat_turn = false;
        SessionEvent::LoadingChanged(self.loading)
    }

    fn set_error(&mut self, error: Option<String>) -> Events {
        if self.error == error {
            return Vec::new();
        }
        self.error = error.clone();
        vec![SessionEvent::ErrorChanged(error)]
    }
}
