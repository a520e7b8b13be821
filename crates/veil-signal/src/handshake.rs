//! Secret handshake over a shared event environment
//!
//! Two isolated parties that share only an event bus agree on a random
//! secret through a one-shot slot: the first to arrive publishes a UUIDv4,
//! the second takes it (clearing the slot). Requests and responses then
//! travel on event names derived from the secret, which a third party on
//! the same bus cannot guess.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use veil_settings::{Capability, Entity};

use crate::error::SignalError;
use crate::Result;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Transient one-shot secret holder
#[derive(Default)]
pub struct SecretSlot {
    secret: Mutex<Option<String>>,
}

impl SecretSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, secret: String) {
        *self.secret.lock() = Some(secret);
    }

    /// Read once; the slot is empty afterwards
    pub fn take(&self) -> Option<String> {
        self.secret.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.secret.lock().is_none()
    }
}

/// One side of the handshake. Caches the secret after first use.
pub struct HandshakeParty {
    slot: Arc<SecretSlot>,
    secret: Mutex<Option<String>>,
}

impl HandshakeParty {
    pub fn new(slot: Arc<SecretSlot>) -> Self {
        Self {
            slot,
            secret: Mutex::new(None),
        }
    }

    pub fn secret(&self) -> String {
        let mut cached = self.secret.lock();
        if let Some(secret) = cached.as_ref() {
            return secret.clone();
        }

        let secret = match self.slot.take() {
            Some(secret) => secret,
            None => {
                let secret = Uuid::new_v4().to_string();
                self.slot.publish(secret.clone());
                secret
            }
        };

        *cached = Some(secret.clone());
        secret
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvEvent {
    pub name: String,
    pub detail: serde_json::Value,
}

/// Named-event bus. Listeners only receive events whose exact name they
/// subscribed to.
#[derive(Default)]
pub struct SharedEnvironment {
    listeners: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<EnvEvent>>>>,
}

impl SharedEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(&self, name: &str) -> mpsc::UnboundedReceiver<EnvEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Deliver to every live listener of `name`; returns how many received it
    pub fn dispatch(&self, name: &str, detail: serde_json::Value) -> usize {
        let mut listeners = self.listeners.lock();
        let Some(senders) = listeners.get_mut(name) else {
            return 0;
        };

        let event = EnvEvent {
            name: name.to_string(),
            detail,
        };
        senders.retain(|tx| tx.send(event.clone()).is_ok());
        let delivered = senders.len();
        if senders.is_empty() {
            listeners.remove(name);
        }
        delivered
    }

    pub fn forget(&self, name: &str) {
        self.listeners.lock().remove(name);
    }
}

fn request_event(secret: &str) -> String {
    format!("request_{}", secret)
}

fn response_event(secret: &str, id: &str) -> String {
    format!("response_{}_{}", secret, id)
}

#[derive(Debug, Serialize, Deserialize)]
struct HandshakeRequest {
    id: String,
    entity: Entity,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum HandshakeReply {
    Disabled(Vec<Capability>),
    Error(String),
}

/// Answers disabled-capability requests on the secret channel
pub struct Responder {
    env: Arc<SharedEnvironment>,
    secret: String,
    task: JoinHandle<()>,
}

impl Responder {
    pub fn spawn<F>(env: Arc<SharedEnvironment>, secret: String, resolve: F) -> Self
    where
        F: Fn(&Entity) -> Result<Vec<Capability>> + Send + Sync + 'static,
    {
        let mut requests = env.listen(&request_event(&secret));
        let task_env = Arc::clone(&env);
        let task_secret = secret.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = requests.recv().await {
                let request: HandshakeRequest = match serde_json::from_value(event.detail) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::debug!(error = %e, "Ignoring malformed handshake request");
                        continue;
                    }
                };

                let reply = match resolve(&request.entity) {
                    Ok(disabled) => HandshakeReply::Disabled(disabled),
                    Err(e) => HandshakeReply::Error(e.to_string()),
                };

                match serde_json::to_value(&reply) {
                    Ok(detail) => {
                        task_env.dispatch(&response_event(&task_secret, &request.id), detail);
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to encode handshake reply"),
                }
            }
        });

        Self { env, secret, task }
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.env.forget(&request_event(&self.secret));
        self.task.abort();
    }
}

pub struct Requester {
    env: Arc<SharedEnvironment>,
    secret: String,
    timeout: Duration,
}

impl Requester {
    pub fn new(env: Arc<SharedEnvironment>, secret: String, timeout: Duration) -> Self {
        Self {
            env,
            secret,
            timeout,
        }
    }

    pub async fn request(&self, entity: &Entity) -> Result<Vec<Capability>> {
        let id = Uuid::new_v4().to_string();
        let reply_name = response_event(&self.secret, &id);
        let mut replies = self.env.listen(&reply_name);

        let detail = serde_json::to_value(HandshakeRequest {
            id,
            entity: entity.clone(),
        })?;

        if self.env.dispatch(&request_event(&self.secret), detail) == 0 {
            self.env.forget(&reply_name);
            return Err(SignalError::NoResponder);
        }

        let received = tokio::time::timeout(self.timeout, replies.recv()).await;
        self.env.forget(&reply_name);

        let event = match received {
            Ok(Some(event)) => event,
            Ok(None) => return Err(SignalError::ChannelClosed),
            Err(_) => return Err(SignalError::Timeout(self.timeout)),
        };

        match serde_json::from_value(event.detail)? {
            HandshakeReply::Disabled(disabled) => Ok(disabled),
            HandshakeReply::Error(message) => Err(SignalError::Responder(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_agreed_once() {
        let slot = Arc::new(SecretSlot::new());
        let first = HandshakeParty::new(Arc::clone(&slot));
        let second = HandshakeParty::new(Arc::clone(&slot));

        let published = first.secret();
        assert!(!slot.is_empty());

        assert_eq!(second.secret(), published);
        assert!(slot.is_empty());

        // Cached on both sides; a late third party gets a fresh secret
        assert_eq!(first.secret(), published);
        assert_eq!(second.secret(), published);
        let late = HandshakeParty::new(slot);
        assert_ne!(late.secret(), published);
    }

    #[test]
    fn test_dispatch_counts_listeners() {
        let env = SharedEnvironment::new();
        let _a = env.listen("ping");
        let _b = env.listen("ping");

        assert_eq!(env.dispatch("ping", serde_json::json!(1)), 2);
        assert_eq!(env.dispatch("pong", serde_json::json!(1)), 0);

        env.forget("ping");
        assert_eq!(env.dispatch("ping", serde_json::json!(1)), 0);
    }

    #[tokio::test]
    async fn test_round_trip() {
        let env = Arc::new(SharedEnvironment::new());
        let secret = Uuid::new_v4().to_string();
        let site = Entity::domain("example.com").unwrap();

        let expected = site.clone();
        let responder = Responder::spawn(Arc::clone(&env), secret.clone(), move |entity| {
            if *entity == expected {
                Ok(vec![Capability::Fonts])
            } else {
                Ok(vec![])
            }
        });

        let requester = Requester::new(Arc::clone(&env), secret, Duration::from_secs(2));
        assert_eq!(requester.request(&site).await.unwrap(), vec![Capability::Fonts]);
        assert_eq!(
            requester.request(&Entity::domain("other.org").unwrap()).await.unwrap(),
            vec![]
        );

        responder.stop();
    }

    #[tokio::test]
    async fn test_forged_secret_gets_nothing() {
        let env = Arc::new(SharedEnvironment::new());
        let responder = Responder::spawn(Arc::clone(&env), "real".to_string(), |_| {
            Ok(vec![Capability::Gpu])
        });

        let forged = Requester::new(Arc::clone(&env), "guess".to_string(), Duration::from_millis(50));
        let result = forged.request(&Entity::All).await;
        assert!(matches!(result, Err(SignalError::NoResponder)));

        responder.stop();
    }

    #[tokio::test]
    async fn test_silent_responder_times_out() {
        let env = Arc::new(SharedEnvironment::new());
        let _held = env.listen(&request_event("quiet"));

        let requester = Requester::new(Arc::clone(&env), "quiet".to_string(), Duration::from_millis(20));
        let result = requester.request(&Entity::All).await;
        assert!(matches!(result, Err(SignalError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_dropped_responder_stops_listening() {
        let env = Arc::new(SharedEnvironment::new());
        {
            let _responder = Responder::spawn(Arc::clone(&env), "gone".to_string(), |_| Ok(vec![]));
        }

        assert_eq!(env.dispatch(&request_event("gone"), serde_json::json!({})), 0);
        let requester = Requester::new(Arc::clone(&env), "gone".to_string(), Duration::from_millis(50));
        let result = requester.request(&Entity::All).await;
        assert!(matches!(result, Err(SignalError::NoResponder)));
    }

    #[tokio::test]
    async fn test_responder_error_is_surfaced() {
        let env = Arc::new(SharedEnvironment::new());
        let responder = Responder::spawn(Arc::clone(&env), "s".to_string(), |entity| {
            Err(SignalError::Responder(format!("no settings for {}", entity)))
        });

        let requester = Requester::new(Arc::clone(&env), "s".to_string(), Duration::from_secs(2));
        let result = requester.request(&Entity::All).await;
        assert!(matches!(result, Err(SignalError::Responder(_))));

        responder.stop();
    }
}
