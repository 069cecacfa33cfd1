//! Agent detail panel: extended info for one agent and the two ways into a chat.

use crate::api::{Agent, AgentDetail, ApiError, CatalogApi};
use crate::credential::Credential;
use crate::guard::SessionGuard;
use crate::route::{Navigator, Route};

#[derive(Debug, Clone, PartialEq)]
pub enum DetailState {
    Loading,
    Loaded(AgentDetail),
    Failed(String),
}

pub struct DetailPanel {
    agent: Agent,
    state: DetailState,
}

impl DetailPanel {
    pub fn new(agent: Agent) -> Self {
        Self {
            agent,
            state: DetailState::Loading,
        }
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn state(&self) -> &DetailState {
        &self.state
    }

    pub fn detail(&self) -> Option<&AgentDetail> {
        match &self.state {
            DetailState::Loaded(d) => Some(d),
            _ => None,
        }
    }

    /// Suggested opening prompts; empty until loaded.
    pub fn starters(&self) -> &[String] {
        self.detail()
            .map(|d| d.conversation_starters.as_slice())
            .unwrap_or(&[])
    }

    /// `4.8 ★ | #1 in Career | 2M+ Conversations`, shown only for a non-zero rating.
    pub fn rating_summary(&self) -> Option<String> {
        let d = self.detail()?;
        let rating = d.rating.filter(|r| *r > 0.0)?;
        let millions = (d.conversation_count.unwrap_or(0) as f64 / 1_000_000.0).round() as u64;
        Some(format!(
            "{} ★ | #1 in {} | {}M+ Conversations",
            rating,
            d.category.as_deref().unwrap_or("-"),
            millions
        ))
    }

    pub fn apply(&mut self, result: Result<AgentDetail, ApiError>, guard: &SessionGuard) {
        self.state = match result {
            Ok(d) => DetailState::Loaded(d),
            Err(e) => {
                log::error!("detail: loading agent {} failed: {}", self.agent.id, e);
                if e.is_unauthorized() {
                    guard.expire();
                }
                DetailState::Failed("Could not load agent details.".to_string())
            }
        };
    }

    pub async fn load<A: CatalogApi + ?Sized>(
        &mut self,
        guard: &SessionGuard,
        api: &A,
        credential: &Credential,
    ) {
        let result = api.agent_detail(credential, &self.agent.id).await;
        self.apply(result, guard);
    }

    /// "Start chat": go to a fresh chat with this agent without creating a chat id; the chat
    /// view owns session creation on this path. The caller closes the panel.
    pub fn start_chat(&self, navigator: &dyn Navigator) -> Route {
        let route = Route::agent_chat(self.agent.id.clone());
        navigator.navigate(route.clone());
        route
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{self, Call, FailOn, FakeApi};
    use crate::route::MemoryNavigator;

    fn detail(rating: Option<f64>, count: Option<u64>) -> AgentDetail {
        AgentDetail {
            rating,
            category: Some("Career".into()),
            conversation_count: count,
            conversation_starters: vec!["How do I ask for a raise?".into(), "Review my CV".into()],
        }
    }

    #[tokio::test]
    async fn load_fetches_detail_for_agent() {
        let fx = fake::guard(Some(fake::VALID_RECORD), Route::Explore);
        let api = FakeApi::new();
        *api.detail.lock().unwrap() = Some(detail(Some(4.8), Some(2_400_000)));
        let mut panel = DetailPanel::new(fake::agent("7", "Mentor"));
        assert_eq!(panel.state(), &DetailState::Loading);
        assert!(panel.starters().is_empty());

        panel.load(&fx.guard, &api, &fake::credential()).await;
        assert_eq!(api.calls(), vec![Call::AgentDetail("7".into())]);
        assert_eq!(panel.starters().len(), 2);
        assert_eq!(
            panel.rating_summary().as_deref(),
            Some("4.8 ★ | #1 in Career | 2M+ Conversations")
        );
    }

    #[test]
    fn rating_summary_hidden_without_rating() {
        let fx = fake::guard(Some(fake::VALID_RECORD), Route::Explore);
        let mut panel = DetailPanel::new(fake::agent("7", "Mentor"));
        panel.apply(Ok(detail(None, Some(5))), &fx.guard);
        assert!(panel.rating_summary().is_none());
        panel.apply(Ok(detail(Some(0.0), Some(5))), &fx.guard);
        assert!(panel.rating_summary().is_none());
    }

    #[tokio::test]
    async fn failure_is_kept_as_error_state() {
        let fx = fake::guard(Some(fake::VALID_RECORD), Route::Explore);
        let api = FakeApi::new();
        api.fail_on(FailOn::Detail);
        let mut panel = DetailPanel::new(fake::agent("7", "Mentor"));
        panel.load(&fx.guard, &api, &fake::credential()).await;
        assert!(matches!(panel.state(), DetailState::Failed(_)));
        assert!(panel.starters().is_empty());
        assert_eq!(fx.navigator.current(), Route::Explore);
    }

    #[test]
    fn start_chat_navigates_to_agent_route() {
        let nav = MemoryNavigator::new(Route::Explore);
        let panel = DetailPanel::new(fake::agent("7", "Mentor"));
        assert_eq!(panel.start_chat(&nav), Route::agent_chat("7"));
        assert_eq!(nav.current().to_string(), "/chat?agent=7");
    }
}
