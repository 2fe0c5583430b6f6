//! Connector backed by the process's stdin and stdout.
//!
//! Each input line becomes a message from the configured nick (setting
//! `nick`, default `console`) in the first joined room. Outbound messages are
//! printed as `[room] user: text`.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    BridgeError, BridgeResult, Capabilities, Capability, ChatChannel, Connector, ConnectorContext,
    EventKind, Message,
};

pub struct ConsoleConnector {
    account: String,
    nick: String,
    inbound: mpsc::Sender<Message>,
    room: std::sync::Arc<Mutex<Option<String>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
}

impl ConsoleConnector {
    pub fn new(context: ConnectorContext) -> Self {
        let nick = context
            .account
            .setting_str("nick")
            .unwrap_or("console")
            .to_string();
        Self {
            account: context.account.name,
            nick,
            inbound: context.inbound,
            room: std::sync::Arc::new(Mutex::new(None)),
            reader: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Render an outbound message the way it is printed.
    pub fn render(message: &Message) -> String {
        let text = match message.event {
            EventKind::UserAction => format!("* {}{}", message.username, message.text),
            EventKind::Delete => format!("{}deleted a message", message.username),
            _ => format!("{}{}", message.username, message.text),
        };
        let mut line = format!("[{}] {}", message.channel, text);
        for file in &message.extra.files {
            line.push_str(&format!(" <{}>", file.url.as_str().trim()));
        }
        line
    }

    fn spawn_reader(&self) -> JoinHandle<()> {
        let account = self.account.clone();
        let nick = self.nick.clone();
        let inbound = self.inbound.clone();
        let room = self.room.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        let Some(channel) = room.lock().clone() else {
                            debug!(account = %account, "no room joined yet, dropping input");
                            continue;
                        };
                        let mut message = Message::new(&account, channel, &nick, line)
                            .with_id(Uuid::new_v4().to_string());
                        message.user_id = nick.clone();
                        message.timestamp = Some(Utc::now());
                        if inbound.send(message).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(account = %account, error = %err, "stdin read failed");
                        let _ = inbound
                            .send(Message::control(&account, EventKind::Failure))
                            .await;
                        break;
                    }
                }
            }
            debug!(account = %account, "console reader stopped");
        })
    }
}

#[async_trait]
impl Connector for ConsoleConnector {
    fn capabilities(&self) -> Capabilities {
        Capabilities::new().with(Capability::Deletes)
    }

    async fn connect(&self) -> BridgeResult<()> {
        let mut reader = self.reader.lock();
        if reader.as_ref().map_or(true, |task| task.is_finished()) {
            *reader = Some(self.spawn_reader());
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> BridgeResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn join_channel(&self, channel: &ChatChannel) -> BridgeResult<()> {
        let mut room = self.room.lock();
        if room.is_none() {
            *room = Some(channel.name.clone());
        }
        Ok(())
    }

    async fn send(&self, message: Message) -> BridgeResult<Option<String>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BridgeError::NotConnected {
                account: self.account.clone(),
            });
        }
        if matches!(message.event, EventKind::Typing) {
            return Ok(None);
        }

        let mut line = Self::render(&message);
        line.push('\n');
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(line.as_bytes())
            .await
            .map_err(|err| BridgeError::send(&self.account, err))?;
        stdout.flush().await?;

        if message.event == EventKind::Edit && !message.id.is_empty() {
            return Ok(Some(message.id));
        }
        Ok(Some(Uuid::new_v4().to_string()))
    }
}
