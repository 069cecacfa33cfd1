//! In-memory API fakes and fixtures for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::api::{
    Agent, AgentDetail, ApiError, CatalogApi, ChatApi, ChatHistory, ChatHistoryEntry, CreatedChat,
    HistoryApi, Message, NewChat, OutgoingMessage, Tab,
};
use crate::credential::{Credential, MemoryCredentialStore, SessionProvider};
use crate::guard::SessionGuard;
use crate::route::{MemoryNavigator, Route};

pub const VALID_RECORD: &str = r#"{"token":"tok-1","user":{"id":"u-1","name":"Sari"}}"#;

pub fn credential() -> Credential {
    Credential::new("tok-1", "u-1", "Sari")
}

pub fn agent(id: &str, name: &str) -> Agent {
    Agent {
        id: id.to_string(),
        name: name.to_string(),
        provider: "Coachbot".to_string(),
        icon_url: format!("https://cdn.example/{id}.png"),
        description: format!("{name} description"),
    }
}

pub fn entry(chat_id: &str, title: &str) -> ChatHistoryEntry {
    ChatHistoryEntry {
        chat_id: chat_id.to_string(),
        title: title.to_string(),
    }
}

pub fn server_error() -> ApiError {
    ApiError::Api {
        status: 500,
        body: "boom".to_string(),
    }
}

pub struct GuardFixture {
    pub guard: SessionGuard,
    pub store: Arc<MemoryCredentialStore>,
    pub navigator: Arc<MemoryNavigator>,
}

pub fn guard(raw: Option<&str>, start: Route) -> GuardFixture {
    let store = Arc::new(match raw {
        Some(r) => MemoryCredentialStore::with_raw(r),
        None => MemoryCredentialStore::new(),
    });
    let navigator = Arc::new(MemoryNavigator::new(start));
    let guard = SessionGuard::new(SessionProvider::new(store.clone()), navigator.clone());
    GuardFixture {
        guard,
        store,
        navigator,
    }
}

/// Every call the fake received, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Tabs,
    FeaturedAgents(i64),
    AgentDetail(String),
    CreateChat(NewChat),
    SendMessage(OutgoingMessage),
    Messages(String),
    RecentAgents,
    ChatHistory,
    Rename(String, String),
    Delete(String),
}

/// Scripted backend. Unset failures succeed with the configured data.
#[derive(Default)]
pub struct FakeApi {
    pub calls: Mutex<Vec<Call>>,
    pub tabs: Mutex<Vec<Tab>>,
    pub agents: Mutex<HashMap<i64, Vec<Agent>>>,
    pub detail: Mutex<Option<AgentDetail>>,
    pub recent: Mutex<Vec<Agent>>,
    pub history: Mutex<ChatHistory>,
    pub next_chat_id: Mutex<String>,
    pub fail: Mutex<Vec<FailOn>>,
    pub unauthorized: Mutex<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    Tabs,
    Agents,
    Detail,
    Create,
    Send,
    History,
    Rename,
    Delete,
}

impl FakeApi {
    pub fn new() -> Self {
        let api = Self::default();
        *api.next_chat_id.lock().unwrap() = "42".to_string();
        api
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn fail_on(&self, what: FailOn) {
        self.fail.lock().unwrap().push(what);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, what: FailOn) -> Result<(), ApiError> {
        if *self.unauthorized.lock().unwrap() {
            return Err(ApiError::Unauthorized(401));
        }
        if self.fail.lock().unwrap().contains(&what) {
            return Err(server_error());
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogApi for FakeApi {
    async fn tabs(&self, _credential: &Credential) -> Result<Vec<Tab>, ApiError> {
        self.record(Call::Tabs);
        self.check(FailOn::Tabs)?;
        Ok(self.tabs.lock().unwrap().clone())
    }

    async fn featured_agents(
        &self,
        _credential: &Credential,
        category_id: i64,
    ) -> Result<Vec<Agent>, ApiError> {
        self.record(Call::FeaturedAgents(category_id));
        self.check(FailOn::Agents)?;
        Ok(self
            .agents
            .lock()
            .unwrap()
            .get(&category_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn agent_detail(
        &self,
        _credential: &Credential,
        agent_id: &str,
    ) -> Result<AgentDetail, ApiError> {
        self.record(Call::AgentDetail(agent_id.to_string()));
        self.check(FailOn::Detail)?;
        Ok(self.detail.lock().unwrap().clone().unwrap_or_default())
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn create_chat(
        &self,
        _credential: &Credential,
        request: &NewChat,
    ) -> Result<CreatedChat, ApiError> {
        self.record(Call::CreateChat(request.clone()));
        self.check(FailOn::Create)?;
        Ok(CreatedChat {
            chat_id: self.next_chat_id.lock().unwrap().clone(),
        })
    }

    async fn send_message(
        &self,
        _credential: &Credential,
        request: &OutgoingMessage,
    ) -> Result<(), ApiError> {
        self.record(Call::SendMessage(request.clone()));
        self.check(FailOn::Send)
    }

    async fn messages(
        &self,
        _credential: &Credential,
        chat_id: &str,
    ) -> Result<Vec<Message>, ApiError> {
        self.record(Call::Messages(chat_id.to_string()));
        Ok(vec![Message::user("hi"), Message::ai("hello")])
    }
}

#[async_trait]
impl HistoryApi for FakeApi {
    async fn recent_agents(&self, _credential: &Credential) -> Result<Vec<Agent>, ApiError> {
        self.record(Call::RecentAgents);
        self.check(FailOn::History)?;
        Ok(self.recent.lock().unwrap().clone())
    }

    async fn chat_history(&self, _credential: &Credential) -> Result<ChatHistory, ApiError> {
        self.record(Call::ChatHistory);
        self.check(FailOn::History)?;
        Ok(self.history.lock().unwrap().clone())
    }

    async fn rename_chat(
        &self,
        _credential: &Credential,
        chat_id: &str,
        title: &str,
    ) -> Result<(), ApiError> {
        self.record(Call::Rename(chat_id.to_string(), title.to_string()));
        self.check(FailOn::Rename)?;
        let mut guard = self.history.lock().unwrap();
        let h = &mut *guard;
        for e in h
            .today
            .iter_mut()
            .chain(h.previous_7_days.iter_mut())
            .chain(h.previous_30_days.iter_mut())
        {
            if e.chat_id == chat_id {
                e.title = title.to_string();
            }
        }
        Ok(())
    }

    async fn delete_chat(&self, _credential: &Credential, chat_id: &str) -> Result<(), ApiError> {
        self.record(Call::Delete(chat_id.to_string()));
        self.check(FailOn::Delete)?;
        let mut h = self.history.lock().unwrap();
        h.today.retain(|e| e.chat_id != chat_id);
        h.previous_7_days.retain(|e| e.chat_id != chat_id);
        h.previous_30_days.retain(|e| e.chat_id != chat_id);
        Ok(())
    }
}
