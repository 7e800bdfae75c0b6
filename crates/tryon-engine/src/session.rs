use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tryon_contracts::events::EventLog;
use tryon_contracts::{image, EncodedImage, TryOnResult};

use crate::client::StylistClient;
use crate::service::GenerativeService;
use crate::state::{Events, FlowTicket, ImageSlot, SessionEvent, SessionState};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How a flow ended once it got past validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    Completed,
    /// The service call failed; the message was shown to the user.
    Failed(String),
    /// A reset or newer composite superseded the flow; its result was
    /// dropped.
    Stale,
}

/// Runs the composite, chat-turn and advisory flows against one
/// [`SessionState`].
///
/// Cheap to clone; clones share the state, the client and the event
/// channel, so flows can be spawned as independent tasks.
pub struct Session<S> {
    client: Arc<StylistClient<S>>,
    state: Arc<Mutex<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
    log: Option<EventLog>,
}

impl<S> Clone for Session<S> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            state: Arc::clone(&self.state),
            events: self.events.clone(),
            log: self.log.clone(),
        }
    }
}

impl<S: GenerativeService> Session<S> {
    pub fn new(client: StylistClient<S>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client: Arc::new(client),
            state: Arc::new(Mutex::new(SessionState::new())),
            events,
            log: None,
        }
    }

    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.lock().clone()
    }

    /// Reads an image file into the person or garment slot. A rejected file
    /// leaves the slot untouched and sets the error banner.
    pub async fn upload(&self, slot: ImageSlot, path: &Path) -> TryOnResult<()> {
        match image::encode(path).await {
            Ok(image) => {
                info!(slot = slot.label(), path = %path.display(), "image loaded");
                self.set_image(slot, image);
                Ok(())
            }
            Err(err) => {
                warn!(slot = slot.label(), path = %path.display(), error = %err, "upload rejected");
                self.transition(|state| ((), state.reject(&err)));
                Err(err)
            }
        }
    }

    pub fn set_image(&self, slot: ImageSlot, image: EncodedImage) {
        self.transition(|state| ((), state.load_image(slot, image)));
    }

    /// Composite flow: garment onto person, then advice for the result.
    pub async fn try_on(&self) -> TryOnResult<FlowOutcome> {
        let start = self.transition(|state| match state.begin_composite() {
            Ok((start, events)) => (Ok(start), events),
            Err(err) => {
                let events = state.reject(&err);
                (Err(err), events)
            }
        })?;
        info!(provider = self.client.service().name(), "composite started");

        match self.client.composite(&start.person, &start.garment).await {
            Ok(generation) => {
                if !self.transition_current(|state| state.finish_composite(start.ticket, &generation)) {
                    return Ok(self.stale("composite"));
                }
                if let Some(image) = generation.image {
                    let context = self.client.prompts().composite_advice_context.clone();
                    self.fetch_advice(start.ticket, &image, &context).await;
                } else {
                    debug!("composite returned text only; skipping advice");
                }
                Ok(FlowOutcome::Completed)
            }
            Err(err) => {
                warn!(error = %err, "composite failed");
                if !self.transition_current(|state| state.fail_composite(start.ticket, &err)) {
                    return Ok(self.stale("composite"));
                }
                Ok(FlowOutcome::Failed(err.to_string()))
            }
        }
    }

    /// Chat-turn flow: edit the current image by instruction, then advice
    /// if a new image came back.
    pub async fn send_message(&self, text: &str) -> TryOnResult<FlowOutcome> {
        let prompts = self.client.prompts();
        let start = self.transition(|state| match state.begin_chat_turn(text, prompts) {
            Ok((start, events)) => (Ok(start), events),
            Err(err) => {
                let events = state.reject(&err);
                (Err(err), events)
            }
        })?;
        info!("chat turn started");

        match self.client.edit(&start.base, &start.instruction).await {
            Ok(generation) => {
                if !self.transition_current(|state| state.finish_chat_turn(start.ticket, &generation)) {
                    return Ok(self.stale("chat turn"));
                }
                if let Some(image) = generation.image {
                    self.fetch_advice(start.ticket, &image, text.trim()).await;
                }
                Ok(FlowOutcome::Completed)
            }
            Err(err) => {
                warn!(error = %err, "chat turn failed");
                if !self.transition_current(|state| state.fail_chat_turn(start.ticket, &err)) {
                    return Ok(self.stale("chat turn"));
                }
                Ok(FlowOutcome::Failed(err.to_string()))
            }
        }
    }

    pub fn reset(&self) {
        self.transition(|state| ((), state.reset()));
        info!("session reset");
    }

    /// Writes the current result image; `None` when there is no result.
    pub async fn save_result(&self, target: &Path) -> TryOnResult<Option<PathBuf>> {
        let current = self.lock().result_image().cloned();
        let Some(image) = current else {
            return Ok(None);
        };
        image.save(target).await.map(Some)
    }

    /// Waits for the event log, if any, to reach disk.
    pub async fn flush_log(&self) -> TryOnResult<()> {
        match &self.log {
            Some(log) => log.flush().await,
            None => Ok(()),
        }
    }

    /// Advisory flow. Failures become an apology in the transcript and are
    /// never raised.
    async fn fetch_advice(&self, ticket: FlowTicket, image: &EncodedImage, context: &str) {
        if !self.transition_current(|state| state.begin_advice(ticket)) {
            self.stale("advice");
            return;
        }

        let advice = self.client.advice(image, context).await;
        if let Err(err) = &advice {
            warn!(error = %err, "advice failed");
        }
        if !self.transition_current(|state| state.finish_advice(ticket, &advice)) {
            self.stale("advice");
        }
    }

    /// Applies one transition and publishes its events before the lock is
    /// released, so subscribers and the log see changes in state order.
    fn transition<T>(&self, apply: impl FnOnce(&mut SessionState) -> (T, Events)) -> T {
        let mut state = self.lock();
        let (value, events) = apply(&mut state);
        self.publish(events);
        value
    }

    /// Like [`Session::transition`] for ticketed completions; `false` when
    /// the ticket was stale and nothing changed.
    fn transition_current(&self, apply: impl FnOnce(&mut SessionState) -> Option<Events>) -> bool {
        self.transition(|state| match apply(state) {
            Some(events) => (true, events),
            None => (false, Events::new()),
        })
    }

    fn stale(&self, flow: &str) -> FlowOutcome {
        warn!(flow, "discarding stale completion");
        FlowOutcome::Stale
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, events: Events) {
        for event in events {
            if let Some(log) = &self.log {
                if let Err(err) = log.record(event.kind(), event.payload()) {
                    warn!(error = %err, "failed to record session event");
                }
            }
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::Value;
    use tryon_contracts::chat::{ChatMessage, Sender};
    use tryon_contracts::config::StylistConfig;
    use tryon_contracts::TryOnError;

    use super::*;
    use crate::service::ContentPart;
    use crate::state::{COMPOSITE_GREETING, EDIT_ACKNOWLEDGEMENT, MISSING_INPUTS};
    use crate::testing::{image_part, ScriptedService};

    fn session(service: &ScriptedService) -> Session<ScriptedService> {
        Session::new(StylistClient::new(service.clone(), StylistConfig::default()))
    }

    fn loaded(service: &ScriptedService) -> Session<ScriptedService> {
        let session = session(service);
        session.set_image(
            ImageSlot::Person,
            EncodedImage::from_inline("image/jpeg", "UEVSU09O"),
        );
        session.set_image(
            ImageSlot::Garment,
            EncodedImage::from_inline("image/png", "R0FSTUVOVA=="),
        );
        session
    }

    fn advice_requests(service: &ScriptedService) -> Vec<String> {
        service
            .requests()
            .into_iter()
            .filter(|request| request.system_instruction.is_some())
            .filter_map(|request| request.parts.get(1).and_then(ContentPart::as_text).map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn composite_without_garment_never_calls_the_service() {
        let service = ScriptedService::new();
        let session = session(&service);
        session.set_image(
            ImageSlot::Person,
            EncodedImage::from_inline("image/jpeg", "UEVSU09O"),
        );

        let err = session.try_on().await.expect_err("missing garment accepted");
        assert!(err.is_validation());
        assert!(service.requests().is_empty());
        assert_eq!(session.snapshot().error(), Some(MISSING_INPUTS));
    }

    #[tokio::test]
    async fn composite_without_person_never_calls_the_service() {
        let service = ScriptedService::new();
        let session = session(&service);
        session.set_image(
            ImageSlot::Garment,
            EncodedImage::from_inline("image/png", "R0FSTUVOVA=="),
        );

        let err = session.try_on().await.expect_err("missing person accepted");
        assert!(err.is_validation());
        assert!(service.requests().is_empty());
        assert_eq!(session.snapshot().error(), Some(MISSING_INPUTS));
        assert!(session.snapshot().result_image().is_none());
    }

    #[tokio::test]
    async fn composite_scenario_sets_result_and_fetches_advice() -> anyhow::Result<()> {
        let service = ScriptedService::new();
        service.push_ok(vec![image_part("UkVTVUxU"), ContentPart::text("Voilà!")]);
        service.push_ok(vec![ContentPart::text("Pair it with **white sneakers**.")]);
        let session = loaded(&service);

        assert_eq!(session.try_on().await?, FlowOutcome::Completed);

        let state = session.snapshot();
        assert_eq!(
            state.result_image(),
            Some(&EncodedImage::from_inline("image/png", "UkVTVUxU"))
        );
        let voila: Vec<&ChatMessage> = state
            .transcript()
            .iter()
            .filter(|message| message.text == "Voilà!")
            .collect();
        assert_eq!(voila, vec![&ChatMessage::assistant("Voilà!")]);
        assert_eq!(
            advice_requests(&service),
            vec!["A new outfit from an uploaded garment.".to_string()]
        );
        assert_eq!(state.transcript().len(), 2);
        assert_eq!(state.transcript()[1].text, "Pair it with **white sneakers**.");
        assert!(!state.loading().any());
        Ok(())
    }

    #[tokio::test]
    async fn composite_greets_with_default_text_when_none_returned() -> anyhow::Result<()> {
        let service = ScriptedService::new();
        service.push_ok(vec![image_part("UkVTVUxU")]);
        service.push_ok(vec![ContentPart::text("Roll the sleeves.")]);
        let session = loaded(&service);

        session.try_on().await?;
        assert_eq!(
            session.snapshot().transcript()[0],
            ChatMessage::assistant(COMPOSITE_GREETING)
        );
        assert_eq!(advice_requests(&service).len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn text_only_composite_shows_caption_and_skips_advice() -> anyhow::Result<()> {
        let service = ScriptedService::new();
        service.push_ok(vec![ContentPart::text("I could not find a garment.")]);
        let session = loaded(&service);

        assert_eq!(session.try_on().await?, FlowOutcome::Completed);
        let state = session.snapshot();
        assert!(state.result_image().is_none());
        assert_eq!(state.result_text(), Some("I could not find a garment."));
        assert!(advice_requests(&service).is_empty());
        assert_eq!(service.requests().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn composite_failure_is_surfaced_as_banner() -> anyhow::Result<()> {
        let service = ScriptedService::new();
        service.push(Err(TryOnError::RateLimited));
        let session = loaded(&service);

        let outcome = session.try_on().await?;
        assert!(matches!(outcome, FlowOutcome::Failed(_)));
        let state = session.snapshot();
        assert_eq!(
            state.error(),
            Some("An error occurred during virtual try-on: Rate limit exceeded. Please try again later.")
        );
        assert!(state.transcript().is_empty());
        assert!(!state.loading().any());
        Ok(())
    }

    #[tokio::test]
    async fn chat_edit_scenario_updates_result_and_fires_advice() -> anyhow::Result<()> {
        let service = ScriptedService::new();
        service.push_ok(vec![image_part("UkVTVUxU"), ContentPart::text("Voilà!")]);
        service.push_ok(vec![ContentPart::text("Nice.")]);
        service.push_ok(vec![image_part("Qkx1ZQ==")]);
        service.push_ok(vec![ContentPart::text("Blue suits you.")]);
        let session = loaded(&service);
        session.try_on().await?;
        let before = session.snapshot().transcript().len();

        assert_eq!(
            session.send_message("make the jacket blue").await?,
            FlowOutcome::Completed
        );

        let state = session.snapshot();
        assert_eq!(
            state.result_image(),
            Some(&EncodedImage::from_inline("image/png", "Qkx1ZQ=="))
        );
        let added = &state.transcript()[before..];
        assert_eq!(added[0], ChatMessage::user("make the jacket blue"));
        assert_eq!(added[1], ChatMessage::assistant(EDIT_ACKNOWLEDGEMENT));
        assert_eq!(added[2], ChatMessage::assistant("Blue suits you."));
        assert_eq!(added.len(), 3);

        let requests = service.requests();
        let edit = &requests[2];
        assert_eq!(edit.parts[1].as_text(), Some("make the jacket blue"));
        assert_eq!(
            advice_requests(&service).last().map(String::as_str),
            Some("make the jacket blue")
        );
        Ok(())
    }

    #[tokio::test]
    async fn chat_failure_is_a_transcript_entry_not_a_banner() -> anyhow::Result<()> {
        let service = ScriptedService::new();
        service.push(Err(TryOnError::Transport("boom".to_string())));
        let session = loaded(&service);

        let outcome = session.send_message("a red dress").await?;
        assert!(matches!(outcome, FlowOutcome::Failed(_)));
        let state = session.snapshot();
        assert_eq!(state.error(), None);
        let last = state.transcript().last().cloned().expect("reply");
        assert_eq!(last.sender, Sender::Assistant);
        assert!(last.text.contains("boom"));
        assert_eq!(service.requests().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn advice_failure_is_downgraded_to_apology() -> anyhow::Result<()> {
        let service = ScriptedService::new();
        service.push_ok(vec![image_part("UkVTVUxU")]);
        service.push_ok(vec![image_part("SU1H")]);
        let session = loaded(&service);

        assert_eq!(session.try_on().await?, FlowOutcome::Completed);
        let state = session.snapshot();
        assert_eq!(state.error(), None);
        let last = state.transcript().last().cloned().expect("apology");
        assert!(last
            .text
            .starts_with("Sorry, I couldn't get fashion advice right now."));
        Ok(())
    }

    #[tokio::test]
    async fn every_flow_reports_empty_responses_distinctly() -> anyhow::Result<()> {
        let service = ScriptedService::new();
        service.push_ok(Vec::new());
        service.push_ok(Vec::new());
        let session = loaded(&service);

        let composite = session.try_on().await?;
        let chat = session.send_message("a red dress").await?;
        for outcome in [composite, chat] {
            let FlowOutcome::Failed(message) = outcome else {
                panic!("empty response accepted");
            };
            assert!(!message.is_empty());
            assert_ne!(message, MISSING_INPUTS);
        }
        Ok(())
    }

    #[tokio::test]
    async fn reset_during_chat_turn_drops_the_late_result() -> anyhow::Result<()> {
        let service = ScriptedService::new();
        let gate = service.push_gated(vec![image_part("U1RBTEU="), ContentPart::text("late")]);
        let session = loaded(&service);

        let flow = tokio::spawn({
            let session = session.clone();
            async move { session.send_message("make it leather").await }
        });
        service.wait_entered().await;
        session.reset();
        gate.notify_one();

        assert_eq!(flow.await??, FlowOutcome::Stale);
        let state = session.snapshot();
        assert!(state.transcript().is_empty());
        assert!(state.result_image().is_none());
        assert!(!state.loading().any());
        assert!(advice_requests(&service).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn events_are_broadcast_and_logged() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log_path = temp.path().join("events.jsonl");
        let service = ScriptedService::new();
        let session = session(&service).with_event_log(EventLog::open(&log_path, "s-1").await?);
        let mut events = session.subscribe();

        session.set_image(
            ImageSlot::Person,
            EncodedImage::from_inline("image/jpeg", "UEVSU09O"),
        );
        session.reset();

        assert_eq!(events.recv().await?, SessionEvent::InputLoaded(ImageSlot::Person));
        assert_eq!(events.recv().await?, SessionEvent::Reset);

        session.flush_log().await?;
        let rows: Vec<Value> = fs::read_to_string(&log_path)?
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .collect();
        let types: Vec<&str> = rows
            .iter()
            .filter_map(|row| row.get("type").and_then(Value::as_str))
            .collect();
        assert_eq!(types, vec!["input_loaded", "reset", "loading_changed"]);
        let seqs: Vec<Option<u64>> = rows.iter().map(|row| row["seq"].as_u64()).collect();
        assert_eq!(seqs, vec![Some(0), Some(1), Some(2)]);
        assert!(rows.iter().all(|row| row["session_id"] == Value::from("s-1")));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_transitions_publish_in_state_order() -> anyhow::Result<()> {
        let service = ScriptedService::new();
        let session = session(&service);
        let mut events = session.subscribe();

        let mut tasks = Vec::new();
        for idx in 0..48 {
            let session = session.clone();
            tasks.push(tokio::spawn(async move {
                if idx % 2 == 0 {
                    session.reset();
                } else {
                    session.set_image(
                        ImageSlot::Person,
                        EncodedImage::from_inline("image/jpeg", "UEVSU09O"),
                    );
                }
            }));
        }
        for task in tasks {
            task.await?;
        }

        // Replaying the stream must land on the same state the session holds.
        let mut person_loaded = false;
        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::InputLoaded(ImageSlot::Person) => person_loaded = true,
                SessionEvent::Reset => person_loaded = false,
                _ => {}
            }
        }
        assert_eq!(person_loaded, session.snapshot().person_image().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn rejected_upload_sets_the_error_banner() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let notes = temp.path().join("notes.txt");
        fs::write(&notes, "hello")?;
        let service = ScriptedService::new();
        let session = session(&service);
        let mut events = session.subscribe();

        let err = session
            .upload(ImageSlot::Person, &notes)
            .await
            .expect_err("text upload accepted");
        assert!(matches!(err, TryOnError::InvalidInput(_)));
        assert_eq!(
            events.try_recv()?,
            SessionEvent::ErrorChanged(Some(err.to_string()))
        );
        let state = session.snapshot();
        assert_eq!(state.error(), Some(err.to_string().as_str()));
        assert!(state.person_image().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn upload_rejects_non_images_and_save_writes_result() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let notes = temp.path().join("notes.txt");
        fs::write(&notes, "hello")?;
        let service = ScriptedService::new();
        service.push_ok(vec![image_part("UkVTVUxU")]);
        service.push_ok(vec![ContentPart::text("ok")]);
        let session = loaded(&service);

        let err = session
            .upload(ImageSlot::Garment, &notes)
            .await
            .expect_err("text upload accepted");
        assert!(matches!(err, TryOnError::InvalidInput(_)));

        assert_eq!(session.save_result(temp.path()).await?, None);
        session.try_on().await?;
        let saved = session.save_result(temp.path()).await?.expect("result saved");
        assert_eq!(fs::read(saved)?, b"RESULT".to_vec());
        Ok(())
    }
}
