//! Navigation targets and the navigator that tracks the current one.
//!
//! Routes mirror the product's URL scheme: `/login`, `/explore`, `/chat`,
//! `/chat?agent={id}` and `/chat?chatId={id}`.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

/// A place the user can be sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Login,
    Explore,
    /// Neutral chat landing (no agent, no chat).
    NewChat,
    /// Fresh chat with an agent; the chat view creates the session.
    AgentChat(String),
    /// Existing chat by id.
    Chat(String),
}

impl Route {
    pub fn chat(chat_id: impl Into<String>) -> Self {
        Route::Chat(chat_id.into())
    }

    pub fn agent_chat(agent_id: impl Into<String>) -> Self {
        Route::AgentChat(agent_id.into())
    }

    /// Chat id addressed by this route, if any.
    pub fn chat_id(&self) -> Option<&str> {
        match self {
            Route::Chat(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_protected(&self) -> bool {
        !matches!(self, Route::Login)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encode = |v: &str| -> String {
            reqwest::Url::parse_with_params("app://coach/", &[("v", v)])
                .ok()
                .and_then(|u| u.query().map(|q| q.trim_start_matches("v=").to_string()))
                .unwrap_or_else(|| v.to_string())
        };
        match self {
            Route::Login => f.write_str("/login"),
            Route::Explore => f.write_str("/explore"),
            Route::NewChat => f.write_str("/chat"),
            Route::AgentChat(id) => write!(f, "/chat?agent={}", encode(id)),
            Route::Chat(id) => write!(f, "/chat?chatId={}", encode(id)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown route: {0}")]
pub struct RouteParseError(String);

impl FromStr for Route {
    type Err = RouteParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = reqwest::Url::parse("app://coach/")
            .and_then(|base| base.join(s.trim()))
            .map_err(|_| RouteParseError(s.to_string()))?;
        let param = |name: &str| {
            url.query_pairs()
                .find(|(k, v)| k == name && !v.is_empty())
                .map(|(_, v)| v.into_owned())
        };
        match url.path().trim_end_matches('/') {
            "/login" => Ok(Route::Login),
            "/explore" | "" => Ok(Route::Explore),
            "/chat" => {
                if let Some(id) = param("chatId") {
                    Ok(Route::Chat(id))
                } else if let Some(id) = param("agent") {
                    Ok(Route::AgentChat(id))
                } else {
                    Ok(Route::NewChat)
                }
            }
            _ => Err(RouteParseError(s.to_string())),
        }
    }
}

/// Moves the user between routes. Implementations must be shareable with worker threads.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
    fn current(&self) -> Route;
}

/// In-memory navigator with a back stack.
pub struct MemoryNavigator {
    inner: Mutex<Vec<Route>>,
}

impl MemoryNavigator {
    pub fn new(start: Route) -> Self {
        Self {
            inner: Mutex::new(vec![start]),
        }
    }

    /// Pop back to the previous route; returns false when already at the first one.
    pub fn back(&self) -> bool {
        let Ok(mut g) = self.inner.lock() else {
            return false;
        };
        if g.len() > 1 {
            g.pop();
            true
        } else {
            false
        }
    }

    /// Every route visited so far, oldest first.
    pub fn history(&self) -> Vec<Route> {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl Default for MemoryNavigator {
    fn default() -> Self {
        Self::new(Route::Explore)
    }
}

impl Navigator for MemoryNavigator {
    fn navigate(&self, route: Route) {
        log::debug!("navigate: {}", route);
        if let Ok(mut g) = self.inner.lock() {
            if g.last() != Some(&route) {
                g.push(route);
            }
        }
    }

    fn current(&self) -> Route {
        self.inner
            .lock()
            .ok()
            .and_then(|g| g.last().cloned())
            .unwrap_or(Route::Explore)
    }
}
