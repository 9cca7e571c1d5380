use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, ChatRef, MessageId, MessageRef, TransferTarget},
    messaging::{
        port::{ClientResult, MessagingClient, ProgressFn},
        types::{ClientCapabilities, CopyOptions, DeliveryReceipt, RemoteMessage, SendRequest},
    },
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* outbound calls (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between calls per chat (Telegram 1 msg/sec style limits).
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40), // ~25/sec
            per_chat_min_interval: Duration::from_millis(1050), // ~0.95/sec
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// MessagingClient decorator that spaces outbound sends and edits.
///
/// Reads (`get_message`, `download`, `get_chat`) pass straight through; only
/// calls that post into a chat are throttled. Locks are released before
/// sleeping so no lock is held across the inner call.
pub struct ThrottledClient {
    inner: Arc<dyn MessagingClient>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<HashMap<i64, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledClient {
    pub fn new(inner: Arc<dyn MessagingClient>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for_chat(&self, chat_id: i64) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_chat.lock().await;
        map.entry(chat_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_chat_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle_chat(&self, chat_id: ChatId) {
        let global_wait = { self.global.lock().await.reserve() };
        let chat_wait = {
            let lim = self.limiter_for_chat(chat_id.0).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(chat_wait);
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingClient for ThrottledClient {
    fn capabilities(&self) -> ClientCapabilities {
        self.inner.capabilities()
    }

    async fn get_message(
        &self,
        chat: &ChatRef,
        id: MessageId,
    ) -> ClientResult<Option<RemoteMessage>> {
        self.inner.get_message(chat, id).await
    }

    async fn get_story(&self, chat: &ChatRef, id: i32) -> ClientResult<Option<RemoteMessage>> {
        self.inner.get_story(chat, id).await
    }

    async fn download(
        &self,
        msg: &RemoteMessage,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> ClientResult<PathBuf> {
        self.inner.download(msg, dest, progress).await
    }

    async fn send(
        &self,
        target: TransferTarget,
        req: SendRequest,
        progress: ProgressFn<'_>,
    ) -> ClientResult<DeliveryReceipt> {
        self.throttle_chat(target.chat_id).await;
        self.inner.send(target, req, progress).await
    }

    async fn copy(
        &self,
        receipt: &DeliveryReceipt,
        to: TransferTarget,
        opts: CopyOptions,
    ) -> ClientResult<DeliveryReceipt> {
        self.throttle_chat(to.chat_id).await;
        self.inner.copy(receipt, to, opts).await
    }

    async fn join(&self, chat: &ChatRef) -> ClientResult<()> {
        self.inner.join(chat).await
    }

    async fn get_chat(&self, handle: &str) -> ClientResult<ChatId> {
        self.inner.get_chat(handle).await
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> ClientResult<MessageRef> {
        self.throttle_chat(chat_id).await;
        self.inner.send_html(chat_id, html).await
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> ClientResult<()> {
        self.throttle_chat(msg.chat_id).await;
        self.inner.edit_html(msg, html).await
    }

    async fn delete_message(&self, msg: MessageRef) -> ClientResult<()> {
        self.throttle_chat(msg.chat_id).await;
        self.inner.delete_message(msg).await
    }
}
