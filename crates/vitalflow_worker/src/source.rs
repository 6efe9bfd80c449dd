//! Message sources feeding the intake loop.
//!
//! A source hands out [`Delivery`] values and is told exactly once per
//! delivery how it ended: `ack`, `nack` (redeliver later with
//! `retry_count + 1`), `defer` (redeliver later unchanged) or `dead_letter`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vitalflow_protocol::InboundMessage;

pub type SourceResult<T> = std::result::Result<T, SourceError>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown delivery: {0}")]
    UnknownDelivery(String),
}

impl SourceError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// One message handed to the intake loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Source-specific handle used to settle the delivery
    pub id: String,
    pub message: InboundMessage,
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Next delivery. `None` means the source is exhausted.
    async fn recv(&self) -> SourceResult<Option<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> SourceResult<()>;

    /// Redeliver no earlier than `delay` from now, with `retry_count + 1`.
    async fn nack(&self, delivery: &Delivery, delay: Duration) -> SourceResult<()>;

    /// Redeliver no earlier than `delay` from now without touching
    /// `retry_count`. Used when another worker holds the claim.
    async fn defer(&self, delivery: &Delivery, delay: Duration) -> SourceResult<()>;

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> SourceResult<()>;

    async fn ping(&self) -> SourceResult<()>;
}

// ============================================================================
// In-memory source
// ============================================================================

#[derive(Debug)]
struct Queued {
    message: InboundMessage,
    not_before: Instant,
}

#[derive(Debug, Default)]
struct MemoryState {
    queue: VecDeque<Queued>,
    in_flight: HashSet<String>,
    closed: bool,
    acked: Vec<InboundMessage>,
    nacked: Vec<(InboundMessage, Duration)>,
    deferred: Vec<(InboundMessage, Duration)>,
    dead_lettered: Vec<(InboundMessage, String)>,
}

/// In-process queue. Exhausted once closed, empty and with nothing in flight.
#[derive(Debug, Default)]
pub struct MemoryMessageSource {
    state: Mutex<MemoryState>,
    notify: Notify,
    next_id: AtomicU64,
}

impl MemoryMessageSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source pre-loaded with `messages` and already closed.
    pub async fn with_messages(messages: impl IntoIterator<Item = InboundMessage>) -> Self {
        let source = Self::new();
        for message in messages {
            source.push(message).await;
        }
        source.close().await;
        source
    }

    pub async fn push(&self, message: InboundMessage) {
        self.state.lock().await.queue.push_back(Queued {
            message,
            not_before: Instant::now(),
        });
        self.notify.notify_one();
    }

    /// No more pushes; `recv` returns `None` once everything settled.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_one();
    }

    pub async fn acked(&self) -> Vec<InboundMessage> {
        self.state.lock().await.acked.clone()
    }

    pub async fn nacked(&self) -> Vec<(InboundMessage, Duration)> {
        self.state.lock().await.nacked.clone()
    }

    pub async fn deferred(&self) -> Vec<(InboundMessage, Duration)> {
        self.state.lock().await.deferred.clone()
    }

    pub async fn dead_lettered(&self) -> Vec<(InboundMessage, String)> {
        self.state.lock().await.dead_lettered.clone()
    }

    async fn settle(&self, delivery: &Delivery) -> SourceResult<MutexGuard<'_, MemoryState>> {
        let mut state = self.state.lock().await;
        if !state.in_flight.remove(&delivery.id) {
            return Err(SourceError::UnknownDelivery(delivery.id.clone()));
        }
        Ok(state)
    }

    async fn requeue(
        &self,
        delivery: &Delivery,
        message: InboundMessage,
        delay: Duration,
        nack: bool,
    ) -> SourceResult<()> {
        let mut state = self.settle(delivery).await?;
        let record = (delivery.message.clone(), delay);
        if nack {
            state.nacked.push(record);
        } else {
            state.deferred.push(record);
        }
        state.queue.push_back(Queued {
            message,
            not_before: Instant::now() + delay,
        });
        drop(state);
        self.notify.notify_one();
        Ok(())
    }
}

#[async_trait]
impl MessageSource for MemoryMessageSource {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn recv(&self) -> SourceResult<Option<Delivery>> {
        loop {
            let wait_until = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                if let Some(pos) = state.queue.iter().position(|q| q.not_before <= now) {
                    if let Some(queued) = state.queue.remove(pos) {
                        let id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
                        state.in_flight.insert(id.clone());
                        return Ok(Some(Delivery {
                            id,
                            message: queued.message,
                        }));
                    }
                }
                if state.closed && state.queue.is_empty() && state.in_flight.is_empty() {
                    return Ok(None);
                }
                state.queue.iter().map(|q| q.not_before).min()
            };

            match wait_until {
                Some(deadline) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> SourceResult<()> {
        let mut state = self.settle(delivery).await?;
        state.acked.push(delivery.message.clone());
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, delay: Duration) -> SourceResult<()> {
        self.requeue(delivery, delivery.message.redelivered(), delay, true).await
    }

    async fn defer(&self, delivery: &Delivery, delay: Duration) -> SourceResult<()> {
        self.requeue(delivery, delivery.message.clone(), delay, false).await
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> SourceResult<()> {
        let mut state = self.settle(delivery).await?;
        state
            .dead_lettered
            .push((delivery.message.clone(), reason.to_string()));
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn ping(&self) -> SourceResult<()> {
        Ok(())
    }
}

// ============================================================================
// Spool directory source
// ============================================================================

/// On-disk form of a spooled message.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpoolEnvelope {
    #[serde(flatten)]
    message: InboundMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    not_before: Option<DateTime<Utc>>,
}

/// Written next to every dead-lettered message file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterNote {
    pub reason: String,
    pub correlation_id: Option<String>,
    pub retry_count: Option<u32>,
    pub dead_lettered_at: DateTime<Utc>,
}

pub const INBOX_DIR: &str = "inbox";
pub const DEAD_LETTER_DIR: &str = "dead_letter";
pub const DEAD_LETTER_NOTE_SUFFIX: &str = ".reason.json";

/// JSON message files in `<root>/inbox/`.
///
/// Files are claimed in name order. Ack deletes the file; nack rewrites it
/// with `retry_count + 1` and a `not_before` time, defer only sets
/// `not_before`; dead-letter moves it to
/// `<root>/dead_letter/` next to a `.reason.json` note. Unparseable files are
/// dead-lettered as soon as they are seen.
#[derive(Debug)]
pub struct SpoolDirectorySource {
    inbox: PathBuf,
    dead_letter: PathBuf,
    poll_interval: Duration,
    exit_when_empty: bool,
    in_flight: Mutex<HashSet<String>>,
}

impl SpoolDirectorySource {
    pub async fn open(root: impl AsRef<Path>, poll_interval: Duration) -> SourceResult<Self> {
        let root = root.as_ref();
        let inbox = root.join(INBOX_DIR);
        let dead_letter = root.join(DEAD_LETTER_DIR);
        for dir in [&inbox, &dead_letter] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| SourceError::io(dir, e))?;
        }
        info!(inbox = %inbox.display(), "Spool directory source ready");
        Ok(Self {
            inbox,
            dead_letter,
            poll_interval,
            exit_when_empty: false,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Return `None` from `recv` once the inbox is empty and nothing is in flight.
    pub fn exit_when_empty(mut self, exit: bool) -> Self {
        self.exit_when_empty = exit;
        self
    }

    pub fn inbox(&self) -> &Path {
        &self.inbox
    }

    pub fn dead_letter_dir(&self) -> &Path {
        &self.dead_letter
    }

    /// Drop a message into the inbox (used by producers and tests).
    pub async fn enqueue(&self, message: &InboundMessage) -> SourceResult<PathBuf> {
        let name = format!(
            "{}-{}.json",
            Utc::now().format("%Y%m%dT%H%M%S%.6f"),
            uuid::Uuid::new_v4().simple()
        );
        let envelope = SpoolEnvelope {
            message: message.clone(),
            not_before: None,
        };
        let path = self.inbox.join(name);
        write_atomic(&path, &serde_json::to_vec_pretty(&envelope)?).await?;
        Ok(path)
    }

    async fn inbox_files(&self) -> SourceResult<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.inbox)
            .await
            .map_err(|e| SourceError::io(&self.inbox, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SourceError::io(&self.inbox, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".json") && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Try to claim one ready file. `Ok(None)` when nothing is ready.
    ///
    /// The in-flight set stays locked for the whole scan, so concurrent
    /// callers never hand out the same file twice.
    async fn try_claim(&self) -> SourceResult<Option<Delivery>> {
        let now = Utc::now();
        let mut in_flight = self.in_flight.lock().await;
        for name in self.inbox_files().await? {
            if in_flight.contains(&name) {
                continue;
            }
            let path = self.inbox.join(&name);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                // Raced with another consumer
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(SourceError::io(path, e)),
            };
            let envelope: SpoolEnvelope = match serde_json::from_slice(&bytes) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(file = %name, error = %e, "Unparseable spool message; dead-lettering");
                    self.move_to_dead_letter(
                        &name,
                        DeadLetterNote {
                            reason: format!("{}: {}", crate::retry::reasons::MALFORMED_MESSAGE, e),
                            correlation_id: None,
                            retry_count: None,
                            dead_lettered_at: now,
                        },
                    )
                    .await?;
                    continue;
                }
            };
            if envelope.not_before.is_some_and(|t| t > now) {
                continue;
            }
            in_flight.insert(name.clone());
            debug!(
                file = %name,
                correlation_id = %envelope.message.correlation_id,
                "Claimed spool message"
            );
            return Ok(Some(Delivery {
                id: name,
                message: envelope.message,
            }));
        }
        Ok(None)
    }

    async fn release(&self, delivery: &Delivery) -> SourceResult<PathBuf> {
        if !self.in_flight.lock().await.remove(&delivery.id) {
            return Err(SourceError::UnknownDelivery(delivery.id.clone()));
        }
        Ok(self.inbox.join(&delivery.id))
    }

    /// Release the file and rewrite it to become ready after `delay`.
    async fn rewrite(
        &self,
        delivery: &Delivery,
        message: InboundMessage,
        delay: Duration,
    ) -> SourceResult<()> {
        let path = self.release(delivery).await?;
        let not_before = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let envelope = SpoolEnvelope {
            message,
            not_before: Some(not_before),
        };
        write_atomic(&path, &serde_json::to_vec_pretty(&envelope)?).await
    }

    async fn move_to_dead_letter(&self, name: &str, note: DeadLetterNote) -> SourceResult<()> {
        let from = self.inbox.join(name);
        let to = self.dead_letter.join(name);
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| SourceError::io(&from, e))?;
        let note_path = self
            .dead_letter
            .join(format!("{}{}", name, DEAD_LETTER_NOTE_SUFFIX));
        write_atomic(&note_path, &serde_json::to_vec_pretty(&note)?).await
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> SourceResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{}.tmp", file_name));
    tokio::fs::write(&temp, bytes)
        .await
        .map_err(|e| SourceError::io(&temp, e))?;
    tokio::fs::rename(&temp, path)
        .await
        .map_err(|e| SourceError::io(path, e))
}

#[async_trait]
impl MessageSource for SpoolDirectorySource {
    fn name(&self) -> &'static str {
        "spool"
    }

    async fn recv(&self) -> SourceResult<Option<Delivery>> {
        loop {
            if let Some(delivery) = self.try_claim().await? {
                return Ok(Some(delivery));
            }
            if self.exit_when_empty
                && self.in_flight.lock().await.is_empty()
                && self.inbox_files().await?.is_empty()
            {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> SourceResult<()> {
        let path = self.release(delivery).await?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SourceError::io(path, e)),
        }
    }

    async fn nack(&self, delivery: &Delivery, delay: Duration) -> SourceResult<()> {
        self.rewrite(delivery, delivery.message.redelivered(), delay).await
    }

    async fn defer(&self, delivery: &Delivery, delay: Duration) -> SourceResult<()> {
        self.rewrite(delivery, delivery.message.clone(), delay).await
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> SourceResult<()> {
        self.release(delivery).await?;
        self.move_to_dead_letter(
            &delivery.id,
            DeadLetterNote {
                reason: reason.to_string(),
                correlation_id: Some(delivery.message.correlation_id.clone()),
                retry_count: Some(delivery.message.retry_count),
                dead_lettered_at: Utc::now(),
            },
        )
        .await
    }

    async fn ping(&self) -> SourceResult<()> {
        tokio::fs::metadata(&self.inbox)
            .await
            .map(|_| ())
            .map_err(|e| SourceError::io(&self.inbox, e))
    }
}
