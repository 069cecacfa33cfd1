//! Sidebar: recent agents, bucketed chat history, inline rename, confirmed delete, profile.
//!
//! Network work lives in the free `fetch`, `send_rename` and `send_delete` functions, which only
//! talk to the API. Their responses are applied with the matching `Sidebar::apply_*` method on
//! the UI side. The `Sidebar::*` async methods chain both for callers that own a runtime.

use crate::api::{Agent, ApiError, ChatHistory, HistoryApi};
use crate::credential::Credential;
use crate::events::ChatListEvents;
use crate::guard::SessionGuard;
use crate::route::{Navigator, Route};

/// Title being edited in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameDraft {
    pub chat_id: String,
    pub original: String,
    pub text: String,
    committing: bool,
}

/// How an inline edit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditEnd {
    Submit,
    Blur,
    Escape,
}

/// A rename ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRename {
    pub chat_id: String,
    pub title: String,
}

pub struct LoadResponse {
    pub recent: Result<Vec<Agent>, ApiError>,
    pub history: Result<ChatHistory, ApiError>,
}

pub struct RenameResponse {
    pub pending: PendingRename,
    pub rename: Result<(), ApiError>,
    /// History reload; only attempted after a successful rename.
    pub history: Option<Result<ChatHistory, ApiError>>,
}

pub struct DeleteResponse {
    pub chat_id: String,
    pub delete: Result<(), ApiError>,
    /// Full reload; only attempted after a successful delete.
    pub reload: Option<LoadResponse>,
}

/// Recent agents and chat history, concurrently.
pub async fn fetch<A: HistoryApi + ?Sized>(api: &A, credential: &Credential) -> LoadResponse {
    let (recent, history) = tokio::join!(api.recent_agents(credential), api.chat_history(credential));
    LoadResponse { recent, history }
}

/// Rename, then reload history from the server.
pub async fn send_rename<A: HistoryApi + ?Sized>(
    api: &A,
    credential: &Credential,
    pending: PendingRename,
) -> RenameResponse {
    let rename = api
        .rename_chat(credential, &pending.chat_id, &pending.title)
        .await;
    let history = match rename {
        Ok(()) => Some(api.chat_history(credential).await),
        Err(_) => None,
    };
    RenameResponse {
        pending,
        rename,
        history,
    }
}

/// Delete, then reload both lists.
pub async fn send_delete<A: HistoryApi + ?Sized>(
    api: &A,
    credential: &Credential,
    chat_id: String,
) -> DeleteResponse {
    let delete = api.delete_chat(credential, &chat_id).await;
    let reload = match delete {
        Ok(()) => Some(fetch(api, credential).await),
        Err(_) => None,
    };
    DeleteResponse {
        chat_id,
        delete,
        reload,
    }
}

#[derive(Default)]
pub struct Sidebar {
    recent_agents: Vec<Agent>,
    history: ChatHistory,
    editing: Option<RenameDraft>,
    pending_delete: Option<String>,
    search: String,
    user_name: Option<String>,
    error: Option<String>,
    loaded: bool,
}

impl Sidebar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recent_agents(&self) -> &[Agent] {
        &self.recent_agents
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    /// History narrowed by the search box.
    pub fn visible_history(&self) -> ChatHistory {
        self.history.filtered(&self.search)
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn search_mut(&mut self) -> &mut String {
        &mut self.search
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn display_name(&self) -> &str {
        match self.user_name.as_deref() {
            Some(n) if !n.trim().is_empty() => n,
            _ => "User",
        }
    }

    pub fn avatar_initial(&self) -> char {
        self.user_name
            .as_deref()
            .and_then(|n| n.trim().chars().next())
            .map(|c| c.to_uppercase().next().unwrap_or(c))
            .unwrap_or('U')
    }

    /// True when `chat_id` is the chat shown by `current`.
    pub fn is_active(chat_id: &str, current: &Route) -> bool {
        current.chat_id() == Some(chat_id)
    }

    fn note_error(&mut self, message: &str, e: &ApiError, guard: &SessionGuard) {
        log::error!("sidebar: {}: {}", message, e);
        if e.is_unauthorized() {
            guard.expire();
        }
        self.error = Some(format!("{}.", message));
    }

    /// Run the guard and remember whose sidebar this is.
    pub fn begin_load(&mut self, guard: &SessionGuard) -> Option<Credential> {
        let credential = guard.require()?;
        self.user_name = Some(credential.user.name.clone());
        Some(credential)
    }

    pub fn apply_loaded(&mut self, response: LoadResponse, guard: &SessionGuard) {
        match response.recent {
            Ok(agents) => self.recent_agents = agents,
            Err(e) => self.note_error("Could not load recent agents", &e, guard),
        }
        self.apply_history(response.history, guard);
        self.loaded = true;
    }

    fn apply_history(&mut self, result: Result<ChatHistory, ApiError>, guard: &SessionGuard) {
        match result {
            Ok(history) => self.history = history,
            Err(e) => self.note_error("Could not load chat history", &e, guard),
        }
    }

    /// Guard, then load both lists. Returns the credential for later calls.
    pub async fn enter<A: HistoryApi + ?Sized>(
        &mut self,
        guard: &SessionGuard,
        api: &A,
    ) -> Option<Credential> {
        let credential = self.begin_load(guard)?;
        let response = fetch(api, &credential).await;
        self.apply_loaded(response, guard);
        Some(credential)
    }

    pub fn editing(&self) -> Option<&RenameDraft> {
        self.editing.as_ref()
    }

    /// Open the inline editor seeded with the entry's current title.
    pub fn begin_rename(&mut self, chat_id: &str) -> bool {
        let Some((_, entry)) = self.history.find(chat_id) else {
            log::warn!("sidebar: rename requested for unknown chat {}", chat_id);
            return false;
        };
        self.editing = Some(RenameDraft {
            chat_id: entry.chat_id.clone(),
            original: entry.title.clone(),
            text: entry.title.clone(),
            committing: false,
        });
        true
    }

    pub fn draft_mut(&mut self) -> Option<&mut String> {
        self.editing.as_mut().map(|d| &mut d.text)
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        if let Some(d) = self.editing.as_mut() {
            d.text = text.into();
        }
    }

    /// Close the editor. Submit or blur with non-empty trimmed text yields a rename to send;
    /// escape or empty text cancels and keeps the original title. The draft stays open while
    /// the rename is in flight, and a second end while committing is ignored.
    pub fn end_edit(&mut self, how: EditEnd) -> Option<PendingRename> {
        let draft = self.editing.as_mut()?;
        if draft.committing {
            return None;
        }
        let title = draft.text.trim();
        if how == EditEnd::Escape || title.is_empty() {
            log::debug!("sidebar: rename of {} cancelled", draft.chat_id);
            self.editing = None;
            return None;
        }
        draft.committing = true;
        Some(PendingRename {
            chat_id: draft.chat_id.clone(),
            title: title.to_string(),
        })
    }

    pub fn apply_rename(
        &mut self,
        response: RenameResponse,
        guard: &SessionGuard,
        events: &ChatListEvents,
    ) {
        match response.rename {
            Ok(()) => {
                log::info!("sidebar: renamed chat {}", response.pending.chat_id);
                if self
                    .editing
                    .as_ref()
                    .is_some_and(|d| d.chat_id == response.pending.chat_id)
                {
                    self.editing = None;
                }
                if let Some(history) = response.history {
                    self.apply_history(history, guard);
                }
                events.notify();
            }
            Err(e) => {
                if let Some(d) = self.editing.as_mut() {
                    d.committing = false;
                }
                self.note_error("Could not rename chat", &e, guard);
            }
        }
    }

    pub async fn commit_rename<A: HistoryApi + ?Sized>(
        &mut self,
        guard: &SessionGuard,
        api: &A,
        events: &ChatListEvents,
        credential: &Credential,
        pending: PendingRename,
    ) {
        let response = send_rename(api, credential, pending).await;
        self.apply_rename(response, guard, events);
    }

    /// Ask for confirmation before deleting.
    pub fn request_delete(&mut self, chat_id: impl Into<String>) {
        self.pending_delete = Some(chat_id.into());
    }

    pub fn pending_delete(&self) -> Option<&str> {
        self.pending_delete.as_deref()
    }

    pub fn cancel_delete(&mut self) {
        self.pending_delete = None;
    }

    /// Confirmation given: the chat id to delete.
    pub fn confirm_delete(&mut self) -> Option<String> {
        self.pending_delete.take()
    }

    /// Apply a delete. When the deleted chat is the one on screen the navigator moves to the
    /// neutral chat route.
    pub fn apply_delete(
        &mut self,
        response: DeleteResponse,
        guard: &SessionGuard,
        events: &ChatListEvents,
    ) {
        match response.delete {
            Ok(()) => {
                log::info!("sidebar: deleted chat {}", response.chat_id);
                if self
                    .editing
                    .as_ref()
                    .is_some_and(|d| d.chat_id == response.chat_id)
                {
                    self.editing = None;
                }
                if let Some(reload) = response.reload {
                    self.apply_loaded(reload, guard);
                }
                let navigator = guard.navigator();
                if Self::is_active(&response.chat_id, &navigator.current()) {
                    navigator.navigate(Route::NewChat);
                }
                events.notify();
            }
            Err(e) => self.note_error("Could not delete chat", &e, guard),
        }
    }

    pub async fn delete<A: HistoryApi + ?Sized>(
        &mut self,
        guard: &SessionGuard,
        api: &A,
        events: &ChatListEvents,
        credential: &Credential,
        chat_id: String,
    ) {
        let response = send_delete(api, credential, chat_id).await;
        self.apply_delete(response, guard, events);
    }

    pub fn new_chat(&self, navigator: &dyn Navigator) {
        navigator.navigate(Route::NewChat);
    }

    pub fn open_chat(&self, navigator: &dyn Navigator, chat_id: &str) {
        navigator.navigate(Route::chat(chat_id));
    }

    pub fn open_agent(&self, navigator: &dyn Navigator, agent_id: &str) {
        navigator.navigate(Route::agent_chat(agent_id));
    }

    pub fn explore(&self, navigator: &dyn Navigator) {
        navigator.navigate(Route::Explore);
    }

    pub fn logout(&mut self, guard: &SessionGuard) {
        *self = Self::default();
        guard.logout();
    }
}
