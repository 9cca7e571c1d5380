use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, ChatRef, MessageId, MessageRef, TransferTarget},
    errors::ClientError,
    messaging::types::{
        ClientCapabilities, CopyOptions, DeliveryReceipt, RemoteMessage, SendRequest,
    },
};

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Progress callback: `(bytes_done, bytes_total)`.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// No-op progress callback.
pub fn no_progress(_done: u64, _total: u64) {}

/// Messaging client port.
///
/// The bot (primary), an optional user-identity session (secondary) and an
/// optional large-capacity session (elevated) all sit behind this interface;
/// capability flags tell the pipeline what each one can do.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    fn capabilities(&self) -> ClientCapabilities;

    async fn get_message(&self, chat: &ChatRef, id: MessageId)
        -> ClientResult<Option<RemoteMessage>>;
    async fn get_story(&self, chat: &ChatRef, id: i32) -> ClientResult<Option<RemoteMessage>>;

    /// Download the media of `msg` to `dest`, returning the written path.
    async fn download(
        &self,
        msg: &RemoteMessage,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> ClientResult<PathBuf>;

    async fn send(
        &self,
        target: TransferTarget,
        req: SendRequest,
        progress: ProgressFn<'_>,
    ) -> ClientResult<DeliveryReceipt>;

    async fn copy(
        &self,
        receipt: &DeliveryReceipt,
        to: TransferTarget,
        opts: CopyOptions,
    ) -> ClientResult<DeliveryReceipt>;

    async fn join(&self, chat: &ChatRef) -> ClientResult<()>;
    async fn get_chat(&self, handle: &str) -> ClientResult<ChatId>;

    // Status messages on the invoking context.
    async fn send_html(&self, chat_id: ChatId, html: &str) -> ClientResult<MessageRef>;
    async fn edit_html(&self, msg: MessageRef, html: &str) -> ClientResult<()>;
    async fn delete_message(&self, msg: MessageRef) -> ClientResult<()>;
}
