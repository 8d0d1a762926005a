//! Scripted transport for tests and local dry runs.
//!
//! Each verify/send call pops the next [`Reply`] from its script and falls back
//! to a default once the script is empty. Calls and accepted messages are
//! counted so tests can assert which providers were contacted.

use super::MailTransport;
use crate::error::TransportError;
use crate::models::{Message, SendOutcome};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Scripted answer for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    /// Fail with a connection error carrying this detail
    Fail(String),
    /// Never answer; only a timeout ends the call
    Hang,
}

pub struct ScriptedTransport {
    label: String,
    verify_script: Mutex<VecDeque<Reply>>,
    verify_default: Reply,
    send_script: Mutex<VecDeque<Reply>>,
    send_default: Reply,
    latency: Duration,
    verify_calls: AtomicU32,
    send_calls: AtomicU32,
    sent: Mutex<Vec<Message>>,
}

impl ScriptedTransport {
    /// Verifies and sends successfully.
    pub fn healthy(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            verify_script: Mutex::new(VecDeque::new()),
            verify_default: Reply::Ok,
            send_script: Mutex::new(VecDeque::new()),
            send_default: Reply::Ok,
            latency: Duration::ZERO,
            verify_calls: AtomicU32::new(0),
            send_calls: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Every verification fails with `detail`.
    pub fn failing_verify(label: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::healthy(label).verify_default(Reply::Fail(detail.into()))
    }

    /// Every verification hangs until the caller's timeout fires.
    pub fn hanging_verify(label: impl Into<String>) -> Self {
        Self::healthy(label).verify_default(Reply::Hang)
    }

    pub fn verify_default(mut self, reply: Reply) -> Self {
        self.verify_default = reply;
        self
    }

    pub fn send_default(mut self, reply: Reply) -> Self {
        self.send_default = reply;
        self
    }

    /// Replies used for the first verify calls, in order.
    pub fn verify_script(mut self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.verify_script = Mutex::new(replies.into_iter().collect());
        self
    }

    /// Replies used for the first send calls, in order.
    pub fn send_script(mut self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.send_script = Mutex::new(replies.into_iter().collect());
        self
    }

    /// Simulated round-trip time added to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn verify_calls(&self) -> u32 {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> u32 {
        self.send_calls.load(Ordering::SeqCst)
    }

    /// Total verify + send calls.
    pub fn contacts(&self) -> u32 {
        self.verify_calls() + self.send_calls()
    }

    pub async fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().await.clone()
    }

    async fn play(
        &self,
        script: &Mutex<VecDeque<Reply>>,
        default: &Reply,
    ) -> Result<(), TransportError> {
        let reply = script.lock().await.pop_front().unwrap_or_else(|| default.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match reply {
            Reply::Ok => Ok(()),
            Reply::Fail(detail) => Err(TransportError::Connection(detail)),
            Reply::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl MailTransport for ScriptedTransport {
    async fn verify(&self) -> Result<(), TransportError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.play(&self.verify_script, &self.verify_default).await
    }

    async fn send(&self, message: &Message) -> Result<SendOutcome, TransportError> {
        let call = self.send_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.play(&self.send_script, &self.send_default).await?;

        self.sent.lock().await.push(message.clone());
        Ok(SendOutcome {
            message_id: format!("{}-{}", self.label, call),
        })
    }

    fn endpoint(&self) -> String {
        format!("scripted://{}", self.label)
    }
}
