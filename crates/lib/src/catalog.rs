//! Explore catalog view model: category tabs, search box, and agent grid.
//!
//! Loads are split into `begin_*` (mark loading, hand out a ticket) and `finish_*` (apply a
//! result) so front-ends can run the request elsewhere. Each agent-list ticket carries a
//! generation; finishing a superseded ticket is a no-op.

use crate::api::{sort_tabs, Agent, ApiError, CatalogApi, Tab};
use crate::config::CatalogConfig;
use crate::credential::Credential;
use crate::guard::SessionGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Ready,
}

/// Ticket for one in-flight agent-list request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentLoad {
    generation: u64,
    category_id: i64,
}

impl AgentLoad {
    pub fn category_id(&self) -> i64 {
        self.category_id
    }
}

pub struct CatalogView {
    state: LoadState,
    /// Sorted by sequence.
    tabs: Vec<Tab>,
    selected: Tab,
    agents: Vec<Agent>,
    search: String,
    open_agent: Option<Agent>,
    generation: u64,
    error: Option<String>,
}

impl CatalogView {
    /// `fallback` is the selected tab until the server's tab list arrives.
    pub fn new(fallback: Tab) -> Self {
        Self {
            state: LoadState::Loading,
            tabs: Vec::new(),
            selected: fallback,
            agents: Vec::new(),
            search: String::new(),
            open_agent: None,
            generation: 0,
            error: None,
        }
    }

    pub fn from_config(config: &CatalogConfig) -> Self {
        Self::new(Tab::new(
            config.default_category_id,
            config.default_category_name.clone(),
            0,
        ))
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state == LoadState::Loading
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn selected_tab(&self) -> &Tab {
        &self.selected
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Agents matching the search box.
    pub fn visible_agents(&self) -> Vec<&Agent> {
        self.agents.iter().filter(|a| a.matches(&self.search)).collect()
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn search_mut(&mut self) -> &mut String {
        &mut self.search
    }

    pub fn set_search(&mut self, query: impl Into<String>) {
        self.search = query.into();
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn open_agent(&self) -> Option<&Agent> {
        self.open_agent.as_ref()
    }

    /// Open the detail panel for a listed agent.
    pub fn select_agent(&mut self, agent_id: &str) -> Option<&Agent> {
        self.open_agent = self.agents.iter().find(|a| a.id == agent_id).cloned();
        self.open_agent.as_ref()
    }

    pub fn close_agent(&mut self) {
        self.open_agent = None;
    }

    fn next_load(&mut self) -> AgentLoad {
        self.generation += 1;
        self.state = LoadState::Loading;
        AgentLoad {
            generation: self.generation,
            category_id: self.selected.category_id,
        }
    }

    fn note_error(&mut self, what: &str, e: &ApiError, guard: &SessionGuard) {
        log::error!("catalog: loading {} failed: {}", what, e);
        if e.is_unauthorized() {
            guard.expire();
        }
        self.error = Some(format!("Could not load {}.", what));
    }

    /// Start the entry load: tabs plus the selected (fallback) category's agents.
    pub fn begin_initial(&mut self) -> AgentLoad {
        self.error = None;
        self.next_load()
    }

    /// Apply the entry load. When the fallback category is not among the tabs, the first tab is
    /// selected and a ticket for its agents is returned.
    pub fn finish_initial(
        &mut self,
        load: AgentLoad,
        tabs: Result<Vec<Tab>, ApiError>,
        agents: Result<Vec<Agent>, ApiError>,
        guard: &SessionGuard,
    ) -> Option<AgentLoad> {
        self.finish_agent_load(load, agents, guard);
        match tabs {
            Ok(mut tabs) => {
                sort_tabs(&mut tabs);
                self.tabs = tabs;
            }
            Err(e) => {
                self.note_error("categories", &e, guard);
                return None;
            }
        }
        if let Some(tab) = self
            .tabs
            .iter()
            .find(|t| t.category_id == self.selected.category_id)
        {
            self.selected = tab.clone();
            return None;
        }
        let first = self.tabs.first()?.clone();
        log::debug!(
            "catalog: fallback category {} not offered, switching to {}",
            self.selected.category_id,
            first.category_id
        );
        self.selected = first;
        Some(self.next_load())
    }

    /// Switch to another tab. Returns a ticket when a fetch is needed; re-selecting the current
    /// tab or an unknown id does nothing.
    pub fn begin_select_tab(&mut self, category_id: i64) -> Option<AgentLoad> {
        if category_id == self.selected.category_id {
            return None;
        }
        let Some(tab) = self.tabs.iter().find(|t| t.category_id == category_id) else {
            log::warn!("catalog: unknown category {}", category_id);
            return None;
        };
        self.selected = tab.clone();
        self.error = None;
        Some(self.next_load())
    }

    /// Apply an agent-list response. Returns false when the ticket was superseded.
    pub fn finish_agent_load(
        &mut self,
        load: AgentLoad,
        result: Result<Vec<Agent>, ApiError>,
        guard: &SessionGuard,
    ) -> bool {
        if load.generation != self.generation {
            log::debug!(
                "catalog: dropping stale agents for category {}",
                load.category_id
            );
            return false;
        }
        match result {
            Ok(agents) => self.agents = agents,
            Err(e) => {
                self.agents.clear();
                self.note_error("agents", &e, guard);
            }
        }
        self.state = LoadState::Ready;
        true
    }

    /// Guard, then fetch tabs and the default category's agents concurrently.
    /// Returns the credential for follow-up calls, or None when redirected to login.
    pub async fn enter<A: CatalogApi + ?Sized>(
        &mut self,
        guard: &SessionGuard,
        api: &A,
    ) -> Option<Credential> {
        let credential = guard.require()?;
        let load = self.begin_initial();
        let (tabs, agents) = tokio::join!(
            api.tabs(&credential),
            api.featured_agents(&credential, load.category_id)
        );
        if let Some(next) = self.finish_initial(load, tabs, agents, guard) {
            let agents = api.featured_agents(&credential, next.category_id).await;
            self.finish_agent_load(next, agents, guard);
        }
        Some(credential)
    }

    /// Select a tab and reload its agents.
    pub async fn select_tab<A: CatalogApi + ?Sized>(
        &mut self,
        guard: &SessionGuard,
        api: &A,
        credential: &Credential,
        category_id: i64,
    ) {
        if let Some(load) = self.begin_select_tab(category_id) {
            let agents = api.featured_agents(credential, load.category_id).await;
            self.finish_agent_load(load, agents, guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{self, Call, FailOn, FakeApi};
    use crate::route::{Navigator, Route};

    fn catalog() -> CatalogView {
        CatalogView::from_config(&CatalogConfig::default())
    }

    fn api_with_tabs() -> FakeApi {
        let api = FakeApi::new();
        *api.tabs.lock().unwrap() = vec![Tab::new(1, "A", 2), Tab::new(2, "B", 1)];
        api.agents
            .lock()
            .unwrap()
            .insert(1, vec![fake::agent("10", "Mentor"), fake::agent("11", "Planner")]);
        api.agents.lock().unwrap().insert(2, vec![fake::agent("20", "Sleep Coach")]);
        api
    }

    #[tokio::test]
    async fn enter_without_session_redirects_and_fetches_nothing() {
        let fx = fake::guard(Some("garbage"), Route::Explore);
        let api = api_with_tabs();
        let mut view = catalog();
        assert!(view.enter(&fx.guard, &api).await.is_none());
        assert_eq!(fx.navigator.current(), Route::Login);
        assert!(api.calls().is_empty());
        assert!(view.is_loading());
    }

    #[tokio::test]
    async fn enter_loads_tabs_in_sequence_order_and_default_agents() {
        let fx = fake::guard(Some(fake::VALID_RECORD), Route::Explore);
        let api = api_with_tabs();
        let mut view = catalog();
        let credential = view.enter(&fx.guard, &api).await.expect("authenticated");
        assert_eq!(credential.user.id, "u-1");

        let names: Vec<_> = view.tabs().iter().map(|t| t.category_name.as_str()).collect();
        assert_eq!(names, ["B", "A"]);
        assert_eq!(view.selected_tab().category_id, 1);
        assert_eq!(view.selected_tab().category_name, "A");
        assert_eq!(view.agents().len(), 2);
        assert_eq!(view.state(), LoadState::Ready);
        assert_eq!(api.count(|c| *c == Call::Tabs), 1);
        assert_eq!(api.count(|c| matches!(c, Call::FeaturedAgents(_))), 1);
    }

    #[tokio::test]
    async fn enter_switches_to_first_tab_when_fallback_missing() {
        let fx = fake::guard(Some(fake::VALID_RECORD), Route::Explore);
        let api = api_with_tabs();
        *api.tabs.lock().unwrap() = vec![Tab::new(5, "Later", 9), Tab::new(2, "B", 1)];
        let mut view = catalog();
        view.enter(&fx.guard, &api).await.unwrap();
        assert_eq!(view.selected_tab().category_id, 2);
        assert_eq!(view.agents()[0].name, "Sleep Coach");
        assert_eq!(
            api.calls(),
            vec![Call::Tabs, Call::FeaturedAgents(1), Call::FeaturedAgents(2)]
        );
    }

    #[tokio::test]
    async fn selecting_another_tab_fetches_its_agents_once() {
        let fx = fake::guard(Some(fake::VALID_RECORD), Route::Explore);
        let api = api_with_tabs();
        let mut view = catalog();
        let credential = view.enter(&fx.guard, &api).await.unwrap();
        let before = api.calls().len();

        view.select_tab(&fx.guard, &api, &credential, 2).await;
        let after: Vec<_> = api.calls().into_iter().skip(before).collect();
        assert_eq!(after, vec![Call::FeaturedAgents(2)]);
        assert_eq!(view.selected_tab().category_name, "B");
        assert_eq!(view.agents().len(), 1);

        view.select_tab(&fx.guard, &api, &credential, 2).await;
        assert_eq!(api.calls().len(), before + 1);
    }

    #[test]
    fn stale_agent_response_is_dropped() {
        let fx = fake::guard(Some(fake::VALID_RECORD), Route::Explore);
        let mut view = catalog();
        let load = view.begin_initial();
        view.finish_initial(
            load,
            Ok(vec![Tab::new(1, "A", 1), Tab::new(2, "B", 2), Tab::new(3, "C", 3)]),
            Ok(vec![]),
            &fx.guard,
        );

        let to_b = view.begin_select_tab(2).unwrap();
        let to_c = view.begin_select_tab(3).unwrap();
        assert!(view.finish_agent_load(to_c, Ok(vec![fake::agent("30", "C agent")]), &fx.guard));
        assert!(!view.finish_agent_load(to_b, Ok(vec![fake::agent("20", "B agent")]), &fx.guard));
        assert_eq!(view.agents()[0].name, "C agent");
        assert_eq!(view.selected_tab().category_id, 3);
        assert!(!view.is_loading());
    }

    #[tokio::test]
    async fn agent_failure_leaves_empty_ready_grid_with_error() {
        let fx = fake::guard(Some(fake::VALID_RECORD), Route::Explore);
        let api = api_with_tabs();
        api.fail_on(FailOn::Agents);
        let mut view = catalog();
        view.enter(&fx.guard, &api).await.unwrap();
        assert!(view.agents().is_empty());
        assert_eq!(view.state(), LoadState::Ready);
        assert_eq!(view.error(), Some("Could not load agents."));
        assert_eq!(view.tabs().len(), 2);
        assert_eq!(fx.navigator.current(), Route::Explore);
    }

    #[tokio::test]
    async fn tab_failure_keeps_fallback_category_and_its_agents() {
        let fx = fake::guard(Some(fake::VALID_RECORD), Route::Explore);
        let api = api_with_tabs();
        api.fail_on(FailOn::Tabs);
        let mut view = catalog();
        assert!(view.enter(&fx.guard, &api).await.is_some());
        assert!(view.tabs().is_empty());
        assert_eq!(view.selected_tab().category_id, 1);
        assert_eq!(view.agents().len(), 2);
        assert_eq!(view.state(), LoadState::Ready);
        assert_eq!(view.error(), Some("Could not load categories."));
        assert_eq!(fx.navigator.current(), Route::Explore);
        assert_eq!(api.calls(), vec![Call::Tabs, Call::FeaturedAgents(1)]);
        assert!(view.begin_select_tab(2).is_none(), "no tabs to switch to");
    }

    #[tokio::test]
    async fn rejected_token_signs_out() {
        let fx = fake::guard(Some(fake::VALID_RECORD), Route::Explore);
        let api = api_with_tabs();
        *api.unauthorized.lock().unwrap() = true;
        let mut view = catalog();
        view.enter(&fx.guard, &api).await;
        assert_eq!(fx.navigator.current(), Route::Login);
        assert!(fx.guard.provider().current().is_err());
    }

    #[tokio::test]
    async fn search_filters_visible_agents_and_detail_opens() {
        let fx = fake::guard(Some(fake::VALID_RECORD), Route::Explore);
        let api = api_with_tabs();
        let mut view = catalog();
        view.enter(&fx.guard, &api).await.unwrap();
        view.set_search("plan");
        let visible: Vec<_> = view.visible_agents().iter().map(|a| a.id.clone()).collect();
        assert_eq!(visible, ["11"]);

        assert_eq!(view.select_agent("10").map(|a| a.name.as_str()), Some("Mentor"));
        view.close_agent();
        assert!(view.open_agent().is_none());
        assert!(view.select_agent("nope").is_none());
    }
}
