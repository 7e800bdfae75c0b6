use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;
use tryon_contracts::{TryOnError, TryOnResult};

use crate::service::{ContentPart, GenerateRequest, GenerateResponse, GenerativeService};

pub(crate) fn image_part(data: &str) -> ContentPart {
    ContentPart::InlineData {
        mime_type: "image/png".to_string(),
        data: data.to_string(),
    }
}

enum Step {
    Reply(TryOnResult<GenerateResponse>),
    Gated(Arc<Notify>, TryOnResult<GenerateResponse>),
}

#[derive(Default)]
struct Inner {
    script: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<GenerateRequest>>,
    entered: Notify,
}

/// Replays queued responses in order and records every request.
#[derive(Clone, Default)]
pub(crate) struct ScriptedService {
    inner: Arc<Inner>,
}

impl ScriptedService {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, reply: TryOnResult<GenerateResponse>) {
        self.script().push_back(Step::Reply(reply));
    }

    pub(crate) fn push_ok(&self, parts: Vec<ContentPart>) {
        self.push(Ok(GenerateResponse::single(parts)));
    }

    /// Queues a reply that is held until the returned gate is notified.
    pub(crate) fn push_gated(&self, parts: Vec<ContentPart>) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.script().push_back(Step::Gated(
            Arc::clone(&gate),
            Ok(GenerateResponse::single(parts)),
        ));
        gate
    }

    /// Resolves once a gated request has been received.
    pub(crate) async fn wait_entered(&self) {
        self.inner.entered.notified().await;
    }

    pub(crate) fn requests(&self) -> Vec<GenerateRequest> {
        self.inner
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, VecDeque<Step>> {
        self.inner
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl GenerativeService for ScriptedService {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerateRequest) -> TryOnResult<GenerateResponse> {
        self.inner
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let step = self.script().pop_front();
        match step {
            Some(Step::Reply(reply)) => reply,
            Some(Step::Gated(gate, reply)) => {
                self.inner.entered.notify_one();
                gate.notified().await;
                reply
            }
            None => Err(TryOnError::Transport("script exhausted".to_string())),
        }
    }
}
