//! Chat bootstrap: create a chat for an agent, then send its opening message.
//!
//! The two calls are strictly ordered because the second needs the chat id from the first.
//! A chat whose opening message failed is left in place; the error carries its id.

use chrono::{SecondsFormat, Utc};

use crate::api::{Agent, ApiError, ChatApi, NewChat, OutgoingMessage};
use crate::credential::Credential;
use crate::events::ChatListEvents;
use crate::guard::SessionGuard;
use crate::route::{Navigator, Route};

/// Shown to the user when either step fails.
pub const START_FAILED_MESSAGE: &str = "Something went wrong while starting the chat.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Chat created and opened; the detail panel should close.
    Started { chat_id: String },
    /// No valid session; the guard already redirected to login.
    SignedOut,
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("creating chat failed: {0}")]
    Create(#[source] ApiError),
    #[error("sending opening message to chat {chat_id} failed: {source}")]
    Send {
        chat_id: String,
        #[source]
        source: ApiError,
    },
}

impl BootstrapError {
    /// Text for the blocking alert.
    pub fn user_message(&self) -> &'static str {
        START_FAILED_MESSAGE
    }

    /// Chat that exists on the server without its opening message, if any.
    pub fn orphaned_chat_id(&self) -> Option<&str> {
        match self {
            BootstrapError::Create(_) => None,
            BootstrapError::Send { chat_id, .. } => Some(chat_id),
        }
    }

    fn api_error(&self) -> &ApiError {
        match self {
            BootstrapError::Create(e) => e,
            BootstrapError::Send { source, .. } => source,
        }
    }
}

/// Body for `POST /chatbot`, stamped with the current UTC time.
pub fn outgoing(
    credential: &Credential,
    chat_id: &str,
    text: &str,
    is_action: bool,
) -> OutgoingMessage {
    OutgoingMessage {
        message: text.to_string(),
        user_id: credential.user.id.clone(),
        chat_id: chat_id.to_string(),
        is_action,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}

/// Start a chat from a conversation starter.
///
/// The session is re-validated here rather than trusted from an earlier check. On success the
/// navigator moves to the new chat. On failure nothing navigates unless the server rejected
/// the token, in which case the guard signs out. Whenever a chat was created, even one left
/// without its opening message, `events` is notified so chat lists reload.
pub async fn start_from_starter<C: ChatApi + ?Sized>(
    guard: &SessionGuard,
    api: &C,
    events: &ChatListEvents,
    agent: &Agent,
    starter: &str,
) -> Result<BootstrapOutcome, BootstrapError> {
    start_chat(guard, api, events, agent, starter, true).await
}

/// Same two steps for text the user typed into an empty chat with `agent`.
pub async fn start_chat<C: ChatApi + ?Sized>(
    guard: &SessionGuard,
    api: &C,
    events: &ChatListEvents,
    agent: &Agent,
    text: &str,
    is_action: bool,
) -> Result<BootstrapOutcome, BootstrapError> {
    let Some(credential) = guard.require() else {
        return Ok(BootstrapOutcome::SignedOut);
    };

    let request = NewChat {
        user_id: credential.user.id.clone(),
        agent_id: agent.id.clone(),
        chat_name: agent.name.clone(),
        agent_name: agent.name.clone(),
    };
    let result = async {
        let created = api
            .create_chat(&credential, &request)
            .await
            .map_err(BootstrapError::Create)?;
        log::info!("bootstrap: created chat {} for agent {}", created.chat_id, agent.id);

        let message = outgoing(&credential, &created.chat_id, text, is_action);
        api.send_message(&credential, &message)
            .await
            .map_err(|source| BootstrapError::Send {
                chat_id: created.chat_id.clone(),
                source,
            })?;
        Ok::<_, BootstrapError>(created.chat_id)
    }
    .await;

    match result {
        Ok(chat_id) => {
            events.notify();
            guard.navigator().navigate(Route::chat(chat_id.clone()));
            Ok(BootstrapOutcome::Started { chat_id })
        }
        Err(e) => {
            log::error!("bootstrap: {}", e);
            if let Some(id) = e.orphaned_chat_id() {
                log::warn!("bootstrap: chat {} was created without its opening message", id);
                events.notify();
            }
            if e.api_error().is_unauthorized() {
                guard.expire();
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{self, Call, FailOn, FakeApi};

    #[tokio::test]
    async fn creates_then_sends_then_navigates() {
        let fx = fake::guard(Some(fake::VALID_RECORD), Route::Explore);
        let api = FakeApi::new();
        let agent = fake::agent("7", "Mentor");
        let events = ChatListEvents::new();
        let mut chat_list = events.subscribe();

        let outcome = start_from_starter(&fx.guard, &api, &events, &agent, "Review my CV")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            BootstrapOutcome::Started {
                chat_id: "42".into()
            }
        );
        assert_eq!(fx.navigator.current().to_string(), "/chat?chatId=42");
        assert!(chat_list.drain(), "new chat not announced");

        let calls = api.calls();
        assert_eq!(calls.len(), 2);
        let Call::CreateChat(create) = &calls[0] else {
            panic!("first call was {:?}", calls[0]);
        };
        assert_eq!(create.user_id, "u-1");
        assert_eq!(create.agent_id, "7");
        assert_eq!(create.chat_name, "Mentor");
        assert_eq!(create.agent_name, "Mentor");
        let Call::SendMessage(send) = &calls[1] else {
            panic!("second call was {:?}", calls[1]);
        };
        assert_eq!(send.chat_id, "42");
        assert_eq!(send.message, "Review my CV");
        assert!(send.is_action);
        assert!(chrono::DateTime::parse_from_rfc3339(&send.timestamp).is_ok());
    }

    #[tokio::test]
    async fn failed_creation_alerts_without_sending_or_navigating() {
        let fx = fake::guard(Some(fake::VALID_RECORD), Route::Explore);
        let api = FakeApi::new();
        api.fail_on(FailOn::Create);
        let events = ChatListEvents::new();
        let mut chat_list = events.subscribe();

        let err = start_from_starter(&fx.guard, &api, &events, &fake::agent("7", "Mentor"), "Hi")
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::Create(_)));
        assert_eq!(err.user_message(), START_FAILED_MESSAGE);
        assert!(err.orphaned_chat_id().is_none());
        assert_eq!(api.count(|c| matches!(c, Call::SendMessage(_))), 0);
        assert_eq!(fx.navigator.current(), Route::Explore);
        assert!(!chat_list.drain());
    }

    #[tokio::test]
    async fn failed_send_keeps_created_chat_and_does_not_navigate() {
        let fx = fake::guard(Some(fake::VALID_RECORD), Route::Explore);
        let api = FakeApi::new();
        api.fail_on(FailOn::Send);
        let events = ChatListEvents::new();
        let mut chat_list = events.subscribe();

        let err = start_from_starter(&fx.guard, &api, &events, &fake::agent("7", "Mentor"), "Hi")
            .await
            .unwrap_err();
        assert_eq!(err.orphaned_chat_id(), Some("42"));
        assert_eq!(api.count(|c| matches!(c, Call::Delete(_))), 0);
        assert_eq!(fx.navigator.current(), Route::Explore);
        assert!(chat_list.drain(), "orphaned chat not announced");
    }

    #[tokio::test]
    async fn missing_session_redirects_before_any_call() {
        let fx = fake::guard(Some(r#"{"token":"t"}"#), Route::Explore);
        let api = FakeApi::new();

        let events = ChatListEvents::new();
        let outcome = start_from_starter(&fx.guard, &api, &events, &fake::agent("7", "Mentor"), "Hi")
            .await
            .unwrap();
        assert_eq!(outcome, BootstrapOutcome::SignedOut);
        assert!(api.calls().is_empty());
        assert_eq!(fx.navigator.current(), Route::Login);
    }

    #[tokio::test]
    async fn typed_first_message_is_not_an_action() {
        let fx = fake::guard(Some(fake::VALID_RECORD), Route::agent_chat("7"));
        let api = FakeApi::new();
        let events = ChatListEvents::new();
        let agent = fake::agent("7", "Mentor");
        start_chat(&fx.guard, &api, &events, &agent, "hello", false)
            .await
            .unwrap();
        let Some(Call::SendMessage(send)) = api.calls().pop() else {
            panic!("no message sent");
        };
        assert!(!send.is_action);
        assert_eq!(fx.navigator.current(), Route::chat("42"));
    }

    #[tokio::test]
    async fn rejected_token_signs_out() {
        let fx = fake::guard(Some(fake::VALID_RECORD), Route::Explore);
        let api = FakeApi::new();
        *api.unauthorized.lock().unwrap() = true;

        let events = ChatListEvents::new();
        let agent = fake::agent("7", "Mentor");
        assert!(start_from_starter(&fx.guard, &api, &events, &agent, "Hi")
            .await
            .is_err());
        assert_eq!(fx.navigator.current(), Route::Login);
    }
}
