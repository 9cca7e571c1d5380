//! Fake collaborators shared by unit tests.

use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, ChatRef, MessageId, MessageRef, TransferTarget},
    errors::ClientError,
    messaging::{
        port::{ClientResult, MessagingClient, ProgressFn},
        types::{
            ClientCapabilities, CopyOptions, DeliveryReceipt, MediaSource, Payload, RemoteMessage,
            SendRequest, VideoMeta,
        },
    },
    ops::OpsEvent,
    ports::{MediaProber, OpsLog},
};

pub const FIXED_META: VideoMeta = VideoMeta {
    duration: 30,
    width: 1280,
    height: 720,
};

pub struct FixedProber;

#[async_trait]
impl MediaProber for FixedProber {
    async fn probe(&self, _path: &Path) -> Option<VideoMeta> {
        Some(FIXED_META)
    }
}

#[derive(Default)]
pub struct RecordingOps {
    events: Mutex<Vec<OpsEvent>>,
}

impl RecordingOps {
    pub fn events(&self) -> Vec<OpsEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl OpsLog for RecordingOps {
    fn record(&self, event: OpsEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// A send as observed by the fake, with the size of the local file (if any)
/// at the time of the call.
#[derive(Clone, Debug)]
pub struct SentItem(pub TransferTarget, pub SendRequest, pub Option<u64>);

struct FakeState {
    caps: ClientCapabilities,
    messages: HashMap<(String, i32), RemoteMessage>,
    stories: HashMap<(String, i32), RemoteMessage>,
    fetch_error: Option<ClientError>,
    chats: HashMap<String, ChatId>,
    file_sizes: HashMap<String, u64>,
    send_error: Option<ClientError>,
    rate_limits: VecDeque<Duration>,
    next_id: i32,

    sends: Vec<SentItem>,
    copies: Vec<(MessageId, ChatId, CopyOptions)>,
    fetches: Vec<(String, i32)>,
    downloads: Vec<PathBuf>,
    joins: Vec<String>,
    html: Vec<(ChatId, String)>,
    edits: Vec<String>,
    deletes: Vec<MessageRef>,
}

/// In-memory messaging client recording every call.
pub struct FakeClient {
    state: Mutex<FakeState>,
}

impl Default for FakeClient {
    fn default() -> Self {
        Self::with_caps(ClientCapabilities {
            max_upload_bytes: 2 * 1024 * 1024 * 1024,
            supports_join: false,
            supports_stories: false,
        })
    }
}

impl FakeClient {
    pub fn with_caps(caps: ClientCapabilities) -> Self {
        Self {
            state: Mutex::new(FakeState {
                caps,
                messages: HashMap::new(),
                stories: HashMap::new(),
                fetch_error: None,
                chats: HashMap::new(),
                file_sizes: HashMap::new(),
                send_error: None,
                rate_limits: VecDeque::new(),
                next_id: 0,
                sends: Vec::new(),
                copies: Vec::new(),
                fetches: Vec::new(),
                downloads: Vec::new(),
                joins: Vec::new(),
                html: Vec::new(),
                edits: Vec::new(),
                deletes: Vec::new(),
            }),
        }
    }

    /// A user-identity session that can join chats and read stories.
    pub fn user_session() -> Self {
        Self::with_caps(ClientCapabilities {
            max_upload_bytes: 2 * 1024 * 1024 * 1024,
            supports_join: true,
            supports_stories: true,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn next_id(&self) -> MessageId {
        let mut s = self.lock();
        s.next_id += 1;
        MessageId(s.next_id)
    }

    pub fn add_message(&self, chat: &ChatRef, id: i32, msg: RemoteMessage) {
        self.lock().messages.insert((chat.to_string(), id), msg);
    }

    pub fn add_story(&self, chat: &ChatRef, id: i32, msg: RemoteMessage) {
        self.lock().stories.insert((chat.to_string(), id), msg);
    }

    pub fn add_chat(&self, handle: &str, id: ChatId) {
        self.lock().chats.insert(handle.to_string(), id);
    }

    /// Bytes written when `file_id` is downloaded.
    pub fn set_file_size(&self, file_id: &str, size: u64) {
        self.lock().file_sizes.insert(file_id.to_string(), size);
    }

    pub fn fail_fetches(&self, e: ClientError) {
        self.lock().fetch_error = Some(e);
    }

    pub fn fail_sends(&self, e: ClientError) {
        self.lock().send_error = Some(e);
    }

    pub fn rate_limit_once(&self, retry_after: Duration) {
        self.lock().rate_limits.push_back(retry_after);
    }

    pub fn sends(&self) -> Vec<SentItem> {
        self.lock().sends.clone()
    }

    pub fn copies(&self) -> Vec<(MessageId, ChatId, CopyOptions)> {
        self.lock().copies.clone()
    }

    pub fn fetches(&self) -> Vec<(String, i32)> {
        self.lock().fetches.clone()
    }

    pub fn downloads(&self) -> Vec<PathBuf> {
        self.lock().downloads.clone()
    }

    pub fn joins(&self) -> Vec<String> {
        self.lock().joins.clone()
    }

    pub fn html(&self) -> Vec<(ChatId, String)> {
        self.lock().html.clone()
    }

    pub fn edits(&self) -> Vec<String> {
        self.lock().edits.clone()
    }

    pub fn deletes(&self) -> Vec<MessageRef> {
        self.lock().deletes.clone()
    }
}

#[async_trait]
impl MessagingClient for FakeClient {
    fn capabilities(&self) -> ClientCapabilities {
        self.lock().caps
    }

    async fn get_message(
        &self,
        chat: &ChatRef,
        id: MessageId,
    ) -> ClientResult<Option<RemoteMessage>> {
        let mut s = self.lock();
        s.fetches.push((chat.to_string(), id.0));
        if let Some(e) = &s.fetch_error {
            return Err(e.clone());
        }
        Ok(s.messages.get(&(chat.to_string(), id.0)).cloned())
    }

    async fn get_story(&self, chat: &ChatRef, id: i32) -> ClientResult<Option<RemoteMessage>> {
        Ok(self.lock().stories.get(&(chat.to_string(), id)).cloned())
    }

    async fn download(
        &self,
        msg: &RemoteMessage,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> ClientResult<PathBuf> {
        let file_id = msg
            .media
            .as_ref()
            .map(|m| m.file_id.clone())
            .ok_or_else(|| ClientError::NotFound("no media".into()))?;
        let size = self.lock().file_sizes.get(&file_id).copied().unwrap_or(16);
        tokio::fs::write(dest, vec![b'x'; size as usize])
            .await
            .map_err(|e| ClientError::Transient(e.to_string()))?;
        progress(size, size);
        self.lock().downloads.push(dest.to_path_buf());
        Ok(dest.to_path_buf())
    }

    async fn send(
        &self,
        target: TransferTarget,
        req: SendRequest,
        _progress: ProgressFn<'_>,
    ) -> ClientResult<DeliveryReceipt> {
        let local_size = match &req.payload {
            Payload::Media {
                source: MediaSource::Local(p),
                ..
            } => std::fs::metadata(p).ok().map(|m| m.len()),
            _ => None,
        };
        {
            let mut s = self.lock();
            s.sends.push(SentItem(target, req, local_size));
            if let Some(retry_after) = s.rate_limits.pop_front() {
                return Err(ClientError::RateLimited { retry_after });
            }
            if let Some(e) = &s.send_error {
                return Err(e.clone());
            }
        }
        Ok(DeliveryReceipt {
            chat_id: target.chat_id,
            message_id: self.next_id(),
        })
    }

    async fn copy(
        &self,
        receipt: &DeliveryReceipt,
        to: TransferTarget,
        opts: CopyOptions,
    ) -> ClientResult<DeliveryReceipt> {
        self.lock()
            .copies
            .push((receipt.message_id, to.chat_id, opts));
        Ok(DeliveryReceipt {
            chat_id: to.chat_id,
            message_id: self.next_id(),
        })
    }

    async fn join(&self, chat: &ChatRef) -> ClientResult<()> {
        self.lock().joins.push(chat.to_string());
        Ok(())
    }

    async fn get_chat(&self, handle: &str) -> ClientResult<ChatId> {
        self.lock()
            .chats
            .get(handle)
            .copied()
            .ok_or_else(|| ClientError::NotFound(handle.to_string()))
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> ClientResult<MessageRef> {
        self.lock().html.push((chat_id, html.to_string()));
        Ok(MessageRef {
            chat_id,
            message_id: self.next_id(),
        })
    }

    async fn edit_html(&self, _msg: MessageRef, html: &str) -> ClientResult<()> {
        self.lock().edits.push(html.to_string());
        Ok(())
    }

    async fn delete_message(&self, msg: MessageRef) -> ClientResult<()> {
        self.lock().deletes.push(msg);
        Ok(())
    }
}
