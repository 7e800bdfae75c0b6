mod client;
mod dryrun;
mod gemini;
mod gemini_types;
mod service;
mod session;
mod state;
#[cfg(test)]
mod testing;

pub use client::{parse_generation, Generation, StylistClient};
pub use dryrun::DryrunService;
pub use gemini::{GeminiService, API_KEY_VARS, DEFAULT_API_BASE};
pub use service::{
    Candidate, ContentPart, GenerateRequest, GenerateResponse, GenerativeService, Modality,
};
pub use session::{FlowOutcome, Session};
pub use state::{
    FlowTicket, ImageSlot, LoadingFlags, SessionEvent, SessionState, COMPOSITE_GREETING,
    EDIT_ACKNOWLEDGEMENT,
};
