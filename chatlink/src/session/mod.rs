//! The chat session: one task owning all client state.
//!
//! [`ChatSession`] ties the [`Supervisor`], the [`Dispatcher`] and the
//! [`ChatState`] together. Its [`run`](ChatSession::run) loop selects over
//! UI commands, socket events, the reconnect timer, the typing-decay timer
//! and finished fallback calls, and applies each wake-up to completion
//! before taking the next one. Nothing is shared, so nothing is locked.
//!
//! The UI side holds a [`SessionHandle`] for commands and the
//! [`ChatEvent`] receiver returned by [`ChatSession::new`].

mod inbound;

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use chatlink_proto::message::{ConversationId, MessageId, UserId, ValidationError};

use crate::api::MessagingApi;
use crate::chat::{Author, ChatEvent, ChatState};
use crate::dispatch::{Completion, Dispatcher, SendOutcome, SendReceipt};
use crate::policy::ReconnectPolicy;
use crate::supervisor::{LinkUpdate, Supervisor};
use crate::transport::{ConnectionState, Connector, LiveEndpoint, SocketEvent};

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The local user.
    pub me: Author,
    /// Capacity of the [`ChatEvent`] channel.
    pub event_buffer: usize,
    /// Capacity of the channel carrying socket events.
    pub socket_buffer: usize,
    /// Delay before a scheduled reconnect.
    pub reconnect_delay: Duration,
    /// Quiet period after which a typing indicator decays.
    pub typing_timeout: Duration,
    /// Items requested per list call.
    pub page_size: u32,
}

impl SessionConfig {
    /// Defaults for everything but the local user.
    #[must_use]
    pub const fn new(me: Author) -> Self {
        Self {
            me,
            event_buffer: 64,
            socket_buffer: 256,
            reconnect_delay: Duration::from_secs(5),
            typing_timeout: Duration::from_secs(3),
            page_size: 20,
        }
    }
}

/// Commands the UI sends to a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Open the live channel.
    Connect,
    /// Manual reconnect.
    Reconnect,
    /// Clear the disabled flag and connect.
    EnableLive,
    /// Set the disabled flag and close the live channel.
    DisableLive,
    /// Switch the open conversation.
    OpenConversation(ConversationId),
    /// Record typed text as the draft of a conversation.
    SetDraft {
        /// Conversation.
        conversation: ConversationId,
        /// Text.
        text: String,
    },
    /// Send a message. Empty `recipients` means "everyone else in the
    /// conversation".
    Send {
        /// Conversation.
        conversation: ConversationId,
        /// Text.
        content: String,
        /// Recipients.
        recipients: Vec<UserId>,
    },
    /// Re-dispatch a failed message.
    Retry(MessageId),
    /// Typing indicator.
    Typing {
        /// Conversation.
        conversation: ConversationId,
        /// Whether typing.
        is_typing: bool,
    },
    /// Read receipt for one message.
    ReadReceipt {
        /// Conversation.
        conversation: ConversationId,
        /// The message read.
        message_id: MessageId,
    },
    /// Fetch a page of conversations.
    LoadConversations {
        /// Page, starting at 1.
        page: u32,
    },
    /// Fetch a page of the open conversation's history.
    LoadMessages {
        /// Page, starting at 1.
        page: u32,
    },
    /// Stop the session.
    Shutdown,
}

/// Errors from talking to a running session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session task has stopped.
    #[error("session has stopped")]
    Closed,
    /// The session task panicked or was cancelled.
    #[error("session task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

enum Wake {
    Command(Option<SessionCommand>),
    Socket(SocketEvent),
    ReconnectDue,
    TypingDue,
    Completion(Completion),
}

async fn next_command(
    commands: Option<&mut mpsc::Receiver<SessionCommand>>,
) -> Option<SessionCommand> {
    match commands {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Owns the live channel, the fallback path and all chat state.
pub struct ChatSession<C: Connector, A: MessagingApi> {
    supervisor: Supervisor<C>,
    dispatcher: Dispatcher<A>,
    chat: ChatState,
    me: Author,
    socket_events: mpsc::Receiver<SocketEvent>,
    event_tx: mpsc::Sender<ChatEvent>,
}

impl<C: Connector, A: MessagingApi> ChatSession<C, A> {
    /// Build a session. Returns it with the receiver for UI events.
    ///
    /// Nothing connects until [`connect`](Self::connect) is called.
    pub fn new(
        connector: C,
        endpoint: LiveEndpoint,
        policy: ReconnectPolicy,
        api: Arc<A>,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<ChatEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let (socket_tx, socket_events) = mpsc::channel(config.socket_buffer.max(1));
        let supervisor = Supervisor::new(
            connector,
            endpoint,
            policy,
            socket_tx,
            config.reconnect_delay,
        );
        let session = Self {
            supervisor,
            dispatcher: Dispatcher::new(api, config.me.clone(), config.page_size),
            chat: ChatState::new(config.typing_timeout),
            me: config.me,
            socket_events,
            event_tx,
        };
        (session, event_rx)
    }

    /// Current live channel state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// The connection supervisor.
    #[must_use]
    pub const fn supervisor(&self) -> &Supervisor<C> {
        &self.supervisor
    }

    /// The dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher<A> {
        &self.dispatcher
    }

    /// Chat state.
    #[must_use]
    pub const fn chat(&self) -> &ChatState {
        &self.chat
    }

    /// Open the live channel.
    pub fn connect(&mut self) {
        let updates = self.supervisor.connect();
        self.apply_link_updates(updates);
    }

    /// Close the live channel normally.
    pub fn close(&mut self, reason: &str) {
        let updates = self.supervisor.close(reason);
        self.apply_link_updates(updates);
    }

    /// Manual reconnect.
    pub fn reconnect(&mut self) {
        let updates = self.supervisor.reconnect();
        self.apply_link_updates(updates);
    }

    /// Clear the disabled flag and connect.
    pub fn enable_live(&mut self) {
        let updates = self.supervisor.enable();
        self.apply_link_updates(updates);
    }

    /// Set the disabled flag and close the live channel.
    pub fn disable_live(&mut self) {
        let updates = self.supervisor.disable();
        self.apply_link_updates(updates);
    }

    /// Switch to `conversation`: list its failed sends, load its history,
    /// clear its unread count and restore its draft, which is returned.
    pub fn open_conversation(&mut self, conversation: ConversationId) -> Option<String> {
        tracing::debug!(%conversation, "opening conversation");
        self.chat.timeline.open(conversation.clone());
        for entry in self.dispatcher.failed_entries(&conversation) {
            self.chat.timeline.push_pending(entry);
        }
        if self.chat.conversations.mark_read(&conversation) > 0 {
            self.dispatcher.mark_read(conversation.clone());
            self.emit(ChatEvent::ConversationUpdated {
                conversation_id: conversation.clone(),
                unread_count: 0,
            });
        }
        self.dispatcher.load_messages(conversation.clone(), 1);

        let draft = self.chat.drafts.get(&conversation).map(str::to_owned);
        self.emit(ChatEvent::DraftRestored {
            conversation_id: conversation,
            text: draft.clone().unwrap_or_default(),
        });
        draft
    }

    /// Record typed text as the draft of `conversation`.
    pub fn set_draft(&mut self, conversation: &ConversationId, text: &str) {
        self.chat.drafts.set(conversation, text);
    }

    /// The draft of `conversation`.
    #[must_use]
    pub fn draft(&self, conversation: &ConversationId) -> Option<&str> {
        self.chat.drafts.get(conversation)
    }

    /// Drop the draft of `conversation`.
    pub fn clear_draft(&mut self, conversation: &ConversationId) {
        self.chat.drafts.clear(conversation);
    }

    /// Send a message. Empty `recipients` means everyone else in the
    /// conversation.
    ///
    /// # Errors
    ///
    /// [`ValidationError`] for blank or oversized content.
    pub fn send(
        &mut self,
        conversation: ConversationId,
        content: String,
        recipients: Vec<UserId>,
    ) -> Result<SendReceipt, ValidationError> {
        let recipients = if recipients.is_empty() {
            self.chat
                .conversations
                .recipients_of(&conversation, &self.me.id)
        } else {
            recipients
        };
        let receipt = self.dispatcher.send(
            &self.supervisor,
            &mut self.chat,
            conversation,
            content,
            recipients,
        )?;
        if let Some(entry) = self.chat.timeline.get(&receipt.message_id).cloned() {
            self.emit(ChatEvent::MessageAdded(entry));
        }
        Ok(receipt)
    }

    /// Re-dispatch a failed message under its temporary id.
    pub fn retry(&mut self, message_id: &MessageId) -> Option<SendReceipt> {
        let receipt = self
            .dispatcher
            .retry(&self.supervisor, &mut self.chat, message_id)?;
        if let Some(entry) = self.chat.timeline.get(message_id).cloned() {
            self.emit(ChatEvent::MessageUpdated {
                message: entry,
                previous_id: None,
            });
        }
        Some(receipt)
    }

    /// Typing indicator; live channel only.
    pub fn send_typing(&self, conversation: &ConversationId, is_typing: bool) -> bool {
        let recipients = self
            .chat
            .conversations
            .recipients_of(conversation, &self.me.id);
        self.dispatcher
            .send_typing(&self.supervisor, conversation, is_typing, recipients)
    }

    /// Read receipt; live channel only.
    pub fn send_read_receipt(&self, conversation: &ConversationId, message_id: &MessageId) -> bool {
        let sender = self
            .chat
            .timeline
            .get(message_id)
            .map(|m| m.sender.id.clone());
        self.dispatcher
            .send_read_receipt(&self.supervisor, conversation, message_id, sender)
    }

    /// Fetch a page of conversations.
    pub fn load_conversations(&mut self, page: u32) {
        self.dispatcher.load_conversations(page.max(1));
    }

    /// Fetch a page of the open conversation's history.
    pub fn load_messages(&mut self, page: u32) {
        if let Some(conversation) = self.chat.timeline.conversation().cloned() {
            self.dispatcher.load_messages(conversation, page.max(1));
        }
    }

    /// Close the live channel, cancel timers and abort running calls.
    pub fn shutdown(&mut self) {
        tracing::info!("shutting down chat session");
        self.close("session closed");
        self.chat.typing.clear();
        self.dispatcher.abort_all();
    }

    /// Process commands until [`SessionCommand::Shutdown`] or until every
    /// command sender is gone, then shut down.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        loop {
            let wake = self.wait(Some(&mut commands)).await;
            if self.apply(wake).is_break() {
                break;
            }
        }
        self.shutdown();
    }

    /// Wait for one internal wake-up (socket event, timer, finished call)
    /// and apply it. Commands are not read.
    pub async fn pump(&mut self) {
        let wake = self.wait(None).await;
        let _ = self.apply(wake);
    }

    /// Apply internal wake-ups until none arrives within `quiet`. Returns
    /// how many were applied.
    pub async fn pump_until_quiet(&mut self, quiet: Duration) -> usize {
        let mut applied = 0;
        while let Ok(wake) = tokio::time::timeout(quiet, self.wait(None)).await {
            let _ = self.apply(wake);
            applied += 1;
        }
        applied
    }

    async fn wait(&mut self, commands: Option<&mut mpsc::Receiver<SessionCommand>>) -> Wake {
        tokio::select! {
            command = next_command(commands) => Wake::Command(command),
            Some(event) = self.socket_events.recv() => Wake::Socket(event),
            () = self.supervisor.reconnect_timer().fired() => Wake::ReconnectDue,
            () = self.chat.typing.timer().fired() => Wake::TypingDue,
            Some(done) = self.dispatcher.next_completion() => Wake::Completion(done),
        }
    }

    fn apply(&mut self, wake: Wake) -> ControlFlow<()> {
        match wake {
            Wake::Command(Some(command)) => return self.handle_command(command),
            Wake::Command(None) => {
                tracing::info!("all command senders dropped");
                return ControlFlow::Break(());
            }
            Wake::Socket(event) => {
                let updates = self.supervisor.handle_event(event);
                self.apply_link_updates(updates);
            }
            Wake::ReconnectDue => {
                let updates = self.supervisor.on_reconnect_due();
                self.apply_link_updates(updates);
            }
            Wake::TypingDue => self.expire_typing(),
            Wake::Completion(done) => self.complete(done),
        }
        ControlFlow::Continue(())
    }

    fn handle_command(&mut self, command: SessionCommand) -> ControlFlow<()> {
        tracing::trace!(?command, "session command");
        match command {
            SessionCommand::Connect => self.connect(),
            SessionCommand::Reconnect => self.reconnect(),
            SessionCommand::EnableLive => self.enable_live(),
            SessionCommand::DisableLive => self.disable_live(),
            SessionCommand::OpenConversation(conversation) => {
                self.open_conversation(conversation);
            }
            SessionCommand::SetDraft { conversation, text } => {
                self.set_draft(&conversation, &text);
            }
            SessionCommand::Send {
                conversation,
                content,
                recipients,
            } => {
                if let Err(e) = self.send(conversation, content, recipients) {
                    self.emit(ChatEvent::Error(e.to_string()));
                }
            }
            SessionCommand::Retry(message_id) => {
                if self.retry(&message_id).is_none() {
                    self.emit(ChatEvent::Error(format!(
                        "no failed message with id {message_id}"
                    )));
                }
            }
            SessionCommand::Typing {
                conversation,
                is_typing,
            } => {
                self.send_typing(&conversation, is_typing);
            }
            SessionCommand::ReadReceipt {
                conversation,
                message_id,
            } => {
                self.send_read_receipt(&conversation, &message_id);
            }
            SessionCommand::LoadConversations { page } => self.load_conversations(page),
            SessionCommand::LoadMessages { page } => self.load_messages(page),
            SessionCommand::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn apply_link_updates(&mut self, updates: Vec<LinkUpdate>) {
        for update in updates {
            match update {
                LinkUpdate::State(state) => self.emit(ChatEvent::ConnectionChanged(state)),
                LinkUpdate::Frame(text) => self.handle_frame(&text),
                LinkUpdate::Warning(warning) => self.emit(ChatEvent::Warning(warning)),
                LinkUpdate::Error(error) => self.emit(ChatEvent::Error(error)),
            }
        }
    }

    fn expire_typing(&mut self) {
        for (conversation, user) in self.chat.typing.expire(Instant::now()) {
            self.emit(ChatEvent::TypingChanged {
                conversation_id: conversation,
                user_id: user,
                is_typing: false,
            });
        }
    }

    fn complete(&mut self, done: Completion) {
        match done {
            Completion::Sent { temp_id, result } => {
                match self.dispatcher.complete_send(&mut self.chat, temp_id, result) {
                    SendOutcome::Confirmed {
                        temp_id,
                        conversation,
                        message,
                        unread_count,
                    } => {
                        if let Some(message) = message {
                            let previous_id = (message.id != temp_id).then_some(temp_id);
                            self.emit(ChatEvent::MessageUpdated {
                                message,
                                previous_id,
                            });
                        }
                        self.emit(ChatEvent::ConversationUpdated {
                            conversation_id: conversation,
                            unread_count,
                        });
                    }
                    SendOutcome::Failed {
                        temp_id,
                        conversation,
                        reason,
                    } => self.emit(ChatEvent::MessageFailed {
                        message_id: temp_id,
                        conversation_id: conversation,
                        reason,
                    }),
                    SendOutcome::Unknown => {}
                }
            }
            Completion::History {
                conversation,
                page,
                result,
            } => match result {
                Ok(history) => {
                    let messages = history
                        .items
                        .into_iter()
                        .map(crate::api::StoredMessage::into_message)
                        .collect();
                    let count = if page <= 1 {
                        self.chat.timeline.replace_history(&conversation, messages)
                    } else {
                        self.chat.timeline.prepend_older(&conversation, messages)
                    };
                    match count {
                        Some(count) => self.emit(ChatEvent::HistoryLoaded {
                            conversation_id: conversation,
                            count,
                        }),
                        None => {
                            tracing::debug!(%conversation, "history for a conversation no longer open");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(%conversation, err = %e, "loading messages failed");
                    self.emit(ChatEvent::Error(format!("failed to load messages: {e}")));
                }
            },
            Completion::Conversations { page, result } => match result {
                Ok(list) => {
                    let items = list
                        .items
                        .into_iter()
                        .map(crate::api::RemoteConversation::into_conversation)
                        .collect();
                    if page <= 1 {
                        self.chat.conversations.replace_all(items);
                    } else {
                        self.chat.conversations.extend(items);
                    }
                    self.emit(ChatEvent::ConversationsLoaded {
                        count: self.chat.conversations.all().len(),
                    });
                }
                Err(e) => {
                    tracing::warn!(err = %e, "loading conversations failed");
                    self.emit(ChatEvent::Error(format!(
                        "failed to load conversations: {e}"
                    )));
                }
            },
            Completion::MarkedRead {
                conversation,
                result,
            } => {
                if let Err(e) = result {
                    tracing::warn!(%conversation, err = %e, "marking conversation read failed");
                }
            }
        }
    }

    fn emit(&self, event: ChatEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            tracing::debug!(err = %e, "chat event dropped");
        }
    }
}

/// Handle to a session running on its own task.
#[derive(Debug)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Spawn `session` and return a handle to it. `capacity` bounds the
    /// command queue.
    pub fn spawn<C: Connector, A: MessagingApi>(
        session: ChatSession<C, A>,
        capacity: usize,
    ) -> Self {
        let (commands, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(session.run(rx));
        Self { commands, task }
    }

    /// Queue a command.
    ///
    /// # Errors
    ///
    /// [`SessionError::Closed`] if the session has stopped.
    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// A sender for queueing commands from elsewhere.
    #[must_use]
    pub fn commands(&self) -> mpsc::Sender<SessionCommand> {
        self.commands.clone()
    }

    /// Stop the session and wait for it to finish.
    ///
    /// # Errors
    ///
    /// [`SessionError::Join`] if the session task panicked.
    pub async fn shutdown(self) -> Result<(), SessionError> {
        // A session that already stopped is fine.
        let _ = self.commands.send(SessionCommand::Shutdown).await;
        self.task.await?;
        Ok(())
    }
}
