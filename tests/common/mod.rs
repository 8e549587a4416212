//! Shared fixtures: in-process bot engines, a recording CRM and a service
//! harness on a virtual clock.

#![allow(dead_code)]

use async_trait::async_trait;
use leadbot_gate::cache::CacheError;
use leadbot_gate::{
    BotEngine, BotRegistry, BotReply, BotRequest, BotType, CacheBackend, Clock, CollaboratorError,
    Config, CrmAction, CrmClient, GateConfig, ManualClock, Services, SharedClock,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Bot engine stub with switchable failure modes
pub struct StubEngine {
    bot_type: BotType,
    name: String,
    reply: Mutex<BotReply>,
    failing: AtomicBool,
    panicking: AtomicBool,
    blocking: AtomicBool,
    delay: Mutex<Option<Duration>>,
    /// Signalled when a blocking call has entered the engine
    pub entered: Notify,
    /// Releases a blocking call
    pub release: Notify,
    pub calls: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub requests: Mutex<Vec<BotRequest>>,
}

impl StubEngine {
    pub fn new(bot_type: BotType) -> Arc<Self> {
        Arc::new(Self {
            bot_type,
            name: format!("{}-stub", bot_type),
            reply: Mutex::new(BotReply {
                message: format!("Hi from the {} bot", bot_type),
                temperature: "warm".to_string(),
                actions: Vec::new(),
                pattern_shortcut: false,
            }),
            failing: AtomicBool::new(false),
            panicking: AtomicBool::new(false),
            blocking: AtomicBool::new(false),
            delay: Mutex::new(None),
            entered: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn set_reply(&self, reply: BotReply) {
        *self.reply.lock() = reply;
    }

    pub fn fail(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    pub fn panic(&self, on: bool) {
        self.panicking.store(on, Ordering::SeqCst);
    }

    /// Hold every call until `release` is notified
    pub fn block(&self, on: bool) {
        self.blocking.store(on, Ordering::SeqCst);
    }

    /// Real (wall-clock) delay per call
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BotEngine for StubEngine {
    async fn respond(&self, request: &BotRequest) -> Result<BotReply, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        if self.blocking.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.panicking.load(Ordering::SeqCst) {
            panic!("{} engine blew up", self.bot_type);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Status {
                status: 503,
                body: "engine overloaded".to_string(),
            });
        }
        Ok(self.reply.lock().clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Something the CRM was asked to do, stamped with virtual time
#[derive(Debug, Clone, PartialEq)]
pub enum CrmEvent {
    Sent { contact_id: String, message: String, at_ms: i64 },
    Applied { contact_id: String, action: CrmAction, at_ms: i64 },
}

/// CRM stub that records every call in order
pub struct RecordingCrm {
    clock: SharedClock,
    pub events: Mutex<Vec<CrmEvent>>,
    pub routing_tags: Mutex<HashMap<String, String>>,
    pub routing_lookups: AtomicUsize,
    pub fail_routing: AtomicBool,
    pub fail_actions: AtomicBool,
}

impl RecordingCrm {
    pub fn new(clock: SharedClock) -> Arc<Self> {
        Arc::new(Self {
            clock,
            events: Mutex::new(Vec::new()),
            routing_tags: Mutex::new(HashMap::new()),
            routing_lookups: AtomicUsize::new(0),
            fail_routing: AtomicBool::new(false),
            fail_actions: AtomicBool::new(false),
        })
    }

    pub fn tag_contact(&self, contact_id: &str, tag: &str) {
        self.routing_tags
            .lock()
            .insert(contact_id.to_string(), tag.to_string());
    }

    pub fn events(&self) -> Vec<CrmEvent> {
        self.events.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, CrmEvent::Sent { .. }))
            .count()
    }
}

#[async_trait]
impl CrmClient for RecordingCrm {
    async fn routing_tag(&self, contact_id: &str) -> Result<Option<String>, CollaboratorError> {
        self.routing_lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_routing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Request("crm timeout".to_string()));
        }
        Ok(self.routing_tags.lock().get(contact_id).cloned())
    }

    async fn send_message(
        &self,
        contact_id: &str,
        _location_id: &str,
        message: &str,
    ) -> Result<(), CollaboratorError> {
        self.events.lock().push(CrmEvent::Sent {
            contact_id: contact_id.to_string(),
            message: message.to_string(),
            at_ms: self.clock.now_millis(),
        });
        Ok(())
    }

    async fn apply_action(
        &self,
        contact_id: &str,
        action: &CrmAction,
    ) -> Result<(), CollaboratorError> {
        if self.fail_actions.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Status {
                status: 500,
                body: "tag service down".to_string(),
            });
        }
        self.events.lock().push(CrmEvent::Applied {
            contact_id: contact_id.to_string(),
            action: action.clone(),
            at_ms: self.clock.now_millis(),
        });
        Ok(())
    }
}

/// Primary cache that is always down
pub struct DownBackend;

#[async_trait]
impl CacheBackend for DownBackend {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    async fn set_if_absent(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    async fn increment(&self, _key: &str, _amount: i64, _ttl: Option<Duration>) -> Result<i64, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    fn name(&self) -> &'static str {
        "down"
    }
}

/// Services wired to stubs
pub struct Harness {
    pub clock: SharedClock,
    pub services: Arc<Services>,
    pub engines: HashMap<BotType, Arc<StubEngine>>,
    pub crm: Arc<RecordingCrm>,
}

impl Harness {
    pub fn build(
        clock: SharedClock,
        primary: Option<Arc<dyn CacheBackend>>,
        gate: GateConfig,
    ) -> Self {
        let crm = RecordingCrm::new(clock.clone());
        let mut engines = HashMap::new();
        let mut registry = BotRegistry::new();
        for bot in BotType::all() {
            let engine = StubEngine::new(*bot);
            registry = registry.with_engine(*bot, engine.clone());
            engines.insert(*bot, engine);
        }

        let config = Config {
            gate,
            ..Default::default()
        };
        let services = Arc::new(Services::new(
            &config,
            clock.clone(),
            primary,
            registry,
            crm.clone(),
        ));

        Self {
            clock,
            services,
            engines,
            crm,
        }
    }

    /// Fallback-only services on a virtual clock
    pub fn manual(gate: GateConfig) -> (Self, Arc<ManualClock>) {
        let clock = ManualClock::at_epoch();
        (Self::build(clock.clone(), None, gate), clock)
    }

    pub fn engine(&self, bot: BotType) -> &Arc<StubEngine> {
        &self.engines[&bot]
    }
}
