use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::error::{TryOnError, TryOnResult};

pub type EventPayload = Map<String, Value>;

enum LogCommand {
    Line(String),
    Flush(oneshot::Sender<io::Result<()>>),
}

/// JSONL log of one try-on session.
///
/// Each line carries `type`, `session_id`, `seq` and `ts`, then the event
/// payload. `record` never blocks: lines are queued to a writer task that
/// owns the file, so it is safe to call with the session state locked.
/// `seq` follows call order.
#[derive(Debug, Clone)]
pub struct EventLog {
    session_id: Arc<str>,
    seq: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<LogCommand>,
}

impl EventLog {
    /// Opens `path` for appending and starts the writer task on the current
    /// runtime.
    pub async fn open(path: &Path, session_id: impl Into<String>) -> TryOnResult<Self> {
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_lines(BufWriter::new(file), rx));
        Ok(Self {
            session_id: Arc::from(session_id.into()),
            seq: Arc::new(AtomicU64::new(0)),
            tx,
        })
    }

    /// Same as [`EventLog::open`] with a fresh random session id.
    pub async fn open_new_session(path: &Path) -> TryOnResult<Self> {
        Self::open(path, uuid::Uuid::new_v4().to_string()).await
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Stamps one event and queues it for writing. Returns the stamped
    /// object.
    pub fn record(&self, kind: &str, payload: EventPayload) -> TryOnResult<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(kind.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.session_id.to_string()),
        );
        event.insert(
            "seq".to_string(),
            Value::from(self.seq.fetch_add(1, Ordering::SeqCst)),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        event.extend(payload);

        let event = Value::Object(event);
        self.tx
            .send(LogCommand::Line(format!("{event}\n")))
            .map_err(|_| writer_stopped())?;
        Ok(event)
    }

    /// Resolves once every event recorded so far is written out.
    pub async fn flush(&self) -> TryOnResult<()> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(LogCommand::Flush(reply))
            .map_err(|_| writer_stopped())?;
        done.await.map_err(|_| writer_stopped())??;
        Ok(())
    }
}

async fn write_lines(mut out: BufWriter<File>, mut rx: mpsc::UnboundedReceiver<LogCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            LogCommand::Line(line) => {
                if let Err(err) = out.write_all(line.as_bytes()).await {
                    warn!(error = %err, "failed to append session event");
                }
            }
            LogCommand::Flush(reply) => {
                let _ = reply.send(out.flush().await);
            }
        }
    }
    if let Err(err) = out.flush().await {
        warn!(error = %err, "failed to flush session event log");
    }
}

fn writer_stopped() -> TryOnError {
    TryOnError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "session event log writer stopped",
    ))
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
