//! Coach Desktop: egui app state and UI.
//!
//! Screens follow the navigator's current route. Requests run on short-lived worker threads,
//! each with its own Tokio runtime; replies come back over one mpsc channel and are applied to
//! the view models at the start of the next frame.

use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::Context as _;
use eframe::egui;
use egui_commonmark::{CommonMarkCache, CommonMarkViewer};

use coach::api::{Agent, AgentDetail, ApiClient, ApiError, CatalogApi, ChatApi, Message, Tab};
use coach::bootstrap::{self, BootstrapError, BootstrapOutcome};
use coach::catalog::{AgentLoad, CatalogView};
use coach::config::{self, Config};
use coach::credential::{Credential, FileCredentialStore, SessionProvider};
use coach::detail::{DetailPanel, DetailState};
use coach::events::{ChatListEvents, ChatListSubscription};
use coach::guard::SessionGuard;
use coach::message::{self, Layout};
use coach::route::{MemoryNavigator, Navigator, Route};
use coach::sidebar::{self, DeleteResponse, EditEnd, LoadResponse, RenameResponse, Sidebar};

const CHAT_INPUT_HEIGHT: f32 = 72.0;
const SIDEBAR_WIDTH: f32 = 260.0;
const LOG_BUFFER_MAX_LINES: usize = 2000;

/// Ring buffer of log lines for the Logs screen. Written by DesktopLogger.
static LOG_LINES: OnceLock<Mutex<VecDeque<String>>> = OnceLock::new();

fn log_buffer() -> &'static Mutex<VecDeque<String>> {
    LOG_LINES.get_or_init(|| Mutex::new(VecDeque::new()))
}

fn push_log_line(line: String) {
    if let Ok(mut buf) = log_buffer().lock() {
        buf.push_back(line);
        while buf.len() > LOG_BUFFER_MAX_LINES {
            buf.pop_front();
        }
    }
}

/// Logger that appends to LOG_LINES for display in the Logs screen.
/// Our own crates log at debug; dependencies only at info and above.
struct DesktopLogger;

impl log::Log for DesktopLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Info || metadata.target().starts_with("coach")
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        push_log_line(format!(
            "{} [{}] {}",
            clock_time(),
            record.level(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

/// UTC wall-clock time of day, for log lines.
fn clock_time() -> String {
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = t.as_secs();
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        (secs / 3600) % 24,
        (secs / 60) % 60,
        secs % 60,
        t.subsec_millis()
    )
}

static LOGGER: DesktopLogger = DesktopLogger;

#[derive(Clone, Copy, PartialEq, Eq, Default)]
enum Screen {
    /// Whatever the current route shows.
    #[default]
    Route,
    Logs,
}

/// Result of a background request.
enum Reply {
    CatalogInitial {
        load: AgentLoad,
        tabs: Result<Vec<Tab>, ApiError>,
        agents: Result<Vec<Agent>, ApiError>,
    },
    Agents {
        load: AgentLoad,
        result: Result<Vec<Agent>, ApiError>,
    },
    Detail {
        agent_id: String,
        result: Result<AgentDetail, ApiError>,
    },
    /// A new chat was (or was not) created; `from_starter` when it came from the detail panel.
    Bootstrap {
        from_starter: bool,
        result: Result<BootstrapOutcome, BootstrapError>,
    },
    /// Sidebar replies carry the sign-in they were issued under.
    SidebarLoaded {
        signin: u64,
        response: LoadResponse,
    },
    Renamed {
        signin: u64,
        response: RenameResponse,
    },
    Deleted {
        signin: u64,
        response: DeleteResponse,
    },
    Messages {
        chat_id: String,
        result: Result<Vec<Message>, ApiError>,
    },
    Sent {
        chat_id: String,
        result: Result<(), ApiError>,
    },
}

#[derive(Default)]
struct LoginForm {
    token: String,
    user_id: String,
    name: String,
    error: Option<String>,
}

/// Transcript and composer for the chat route.
#[derive(Default)]
struct ChatPane {
    chat_id: Option<String>,
    messages: Vec<Message>,
    loading: bool,
    sending: bool,
    input: String,
    error: Option<String>,
    /// The last message was typed here and the server has not accepted it yet.
    outgoing: bool,
}

impl ChatPane {
    /// Show a typed message right away, before the server has it.
    fn push_outgoing(&mut self, text: &str) {
        self.input.clear();
        self.error = None;
        self.messages.push(Message::user(text));
        self.outgoing = true;
    }

    /// The server took the outgoing message.
    fn confirm_outgoing(&mut self) {
        self.outgoing = false;
    }

    /// The outgoing message never arrived: drop it from the transcript and hand the text back
    /// to the composer unless the user has started typing something else.
    fn retract_outgoing(&mut self) {
        if !std::mem::take(&mut self.outgoing) {
            return;
        }
        if let Some(m) = self.messages.pop() {
            if self.input.trim().is_empty() {
                self.input = m.content;
            }
        }
    }
}

/// Sidebar request bookkeeping: one load in flight, at most one queued behind it.
#[derive(Default)]
struct SidebarSync {
    /// Bumped on every sign-out; replies tagged with an older value are dropped.
    signin: u64,
    busy: bool,
    stale: bool,
    /// A rename or delete was applied this frame; its reply already refreshed the lists.
    own_change: bool,
}

impl SidebarSync {
    /// Claim the load slot, or queue one more load behind the running one.
    fn begin_load(&mut self) -> bool {
        if self.busy {
            self.stale = true;
            return false;
        }
        self.busy = true;
        true
    }

    fn cancel_load(&mut self) {
        self.busy = false;
    }

    /// A load reply was applied. True when another load was queued meanwhile.
    fn finish_load(&mut self) -> bool {
        self.busy = false;
        std::mem::take(&mut self.stale)
    }

    /// Whether a sidebar reply issued under `signin` may touch the view on `route`.
    fn accepts(&self, signin: u64, route: &Route) -> bool {
        signin == self.signin && *route != Route::Login
    }

    fn note_own_change(&mut self) {
        self.own_change = true;
    }

    /// Whether a "chat list changed" notification should reload the sidebar. Checked once per
    /// frame; the notification published by our own rename or delete is skipped.
    fn wants_reload(&mut self, notified: bool) -> bool {
        let own = std::mem::take(&mut self.own_change);
        notified && !own
    }

    /// Sign-out: forget queued work and orphan every reply still in flight.
    fn reset(&mut self) {
        self.signin += 1;
        self.busy = false;
        self.stale = false;
        self.own_change = false;
    }
}

enum SidebarAction {
    OpenAgent(String),
    OpenChat(String),
    BeginRename(String),
    EndEdit(EditEnd),
    RequestDelete(String),
}

enum DetailAction {
    Starter(String),
    StartChat,
}

/// Config, API client and guard for the signed-in (or not yet signed-in) user.
struct Session {
    config: Config,
    config_path: PathBuf,
    api: ApiClient,
    guard: SessionGuard,
    navigator: Arc<MemoryNavigator>,
}

fn open_session() -> anyhow::Result<Session> {
    let (config, config_path) = config::load_config(None).context("loading config")?;
    Ok(session_for(config, config_path))
}

fn session_for(config: Config, config_path: PathBuf) -> Session {
    let store = FileCredentialStore::new(config::resolve_credential_path(&config, &config_path));
    log::info!("credential file: {}", store.path().display());
    let provider = SessionProvider::new(Arc::new(store));
    let navigator = Arc::new(MemoryNavigator::new(Route::Explore));
    let guard = SessionGuard::new(provider, navigator.clone());
    let api = ApiClient::from_config(&config);
    Session {
        config,
        config_path,
        api,
        guard,
        navigator,
    }
}

pub struct CoachApp {
    session: Session,
    events: ChatListEvents,
    chat_list: ChatListSubscription,
    tx: mpsc::Sender<Reply>,
    rx: mpsc::Receiver<Reply>,
    repaint: egui::Context,
    screen: Screen,
    /// Route whose entry work has run; compared with the navigator each frame.
    entered: Option<Route>,
    credential: Option<Credential>,
    login: LoginForm,
    catalog: CatalogView,
    detail: Option<DetailPanel>,
    starting_chat: bool,
    sidebar: Sidebar,
    sidebar_sync: SidebarSync,
    focus_draft: bool,
    chat: ChatPane,
    markdown_cache: CommonMarkCache,
    alert: Option<String>,
}

impl CoachApp {
    /// Space between the screen title and the content below.
    const SCREEN_TITLE_BOTTOM_SPACING: f32 = 18.0;
    /// Space between the bottom of the content and the window edge.
    const SCREEN_FOOTER_SPACING: f32 = 24.0;

    pub fn new(cc: &eframe::CreationContext<'_>) -> Self {
        let _ = LOG_LINES.get_or_init(|| Mutex::new(VecDeque::new()));
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Debug);
        log::info!("desktop started");

        let session = open_session().unwrap_or_else(|e| {
            log::error!("{:#}; using default settings", e);
            session_for(Config::default(), config::default_config_path())
        });
        log::debug!(
            "config {} api {}",
            session.config_path.display(),
            session.api.base_url()
        );
        let events = ChatListEvents::new();
        let chat_list = events.subscribe();
        let (tx, rx) = mpsc::channel();
        let catalog = CatalogView::from_config(&session.config.catalog);
        Self {
            session,
            events,
            chat_list,
            tx,
            rx,
            repaint: cc.egui_ctx.clone(),
            screen: Screen::default(),
            entered: None,
            credential: None,
            login: LoginForm::default(),
            catalog,
            detail: None,
            starting_chat: false,
            sidebar: Sidebar::new(),
            sidebar_sync: SidebarSync::default(),
            focus_draft: false,
            chat: ChatPane::default(),
            markdown_cache: CommonMarkCache::default(),
            alert: None,
        }
    }

    fn guard(&self) -> &SessionGuard {
        &self.session.guard
    }

    fn navigator(&self) -> &dyn Navigator {
        self.session.navigator.as_ref()
    }

    /// Run `task` on a worker thread with its own runtime and post its reply back.
    fn spawn<F, Fut>(&self, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Reply>,
    {
        let tx = self.tx.clone();
        let repaint = self.repaint.clone();
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("worker runtime: {}", e);
                    return;
                }
            };
            let reply = rt.block_on(task());
            let _ = tx.send(reply);
            repaint.request_repaint();
        });
    }

    // --- route entry -------------------------------------------------------------------------

    fn sync_route(&mut self) {
        let route = self.navigator().current();
        if self.entered.as_ref() == Some(&route) {
            return;
        }
        let previous = self.entered.replace(route.clone());
        log::debug!("entering {}", route);
        if route == Route::Login {
            self.credential = None;
            self.detail = None;
            self.sidebar = Sidebar::new();
            self.sidebar_sync.reset();
            self.chat = ChatPane::default();
            return;
        }
        self.detail = None;
        let Some(credential) = self.guard().require() else {
            return;
        };
        self.credential = Some(credential.clone());
        // Moving between sidebar routes keeps the lists; the change bus covers updates.
        let keep_sidebar = previous.as_ref().is_some_and(shows_sidebar) && self.sidebar.is_loaded();
        if !keep_sidebar {
            self.load_sidebar();
        }
        match &route {
            Route::Explore => self.enter_explore(credential),
            _ => self.enter_chat(&route),
        }
    }

    fn enter_explore(&mut self, credential: Credential) {
        self.catalog = CatalogView::from_config(&self.session.config.catalog);
        let load = self.catalog.begin_initial();
        let api = self.session.api.clone();
        self.spawn(move || async move {
            let (tabs, agents) = tokio::join!(
                api.tabs(&credential),
                api.featured_agents(&credential, load.category_id())
            );
            Reply::CatalogInitial { load, tabs, agents }
        });
    }

    fn enter_chat(&mut self, route: &Route) {
        self.chat = ChatPane::default();
        if let Route::Chat(id) = route {
            self.chat.chat_id = Some(id.clone());
            self.load_messages(id.clone());
        }
    }

    // --- requests ----------------------------------------------------------------------------

    fn fetch_agents(&self, load: AgentLoad) {
        let Some(credential) = self.credential.clone() else {
            return;
        };
        let api = self.session.api.clone();
        self.spawn(move || async move {
            let result = api.featured_agents(&credential, load.category_id()).await;
            Reply::Agents { load, result }
        });
    }

    fn open_detail(&mut self, agent: Agent) {
        let Some(credential) = self.credential.clone() else {
            return;
        };
        let agent_id = agent.id.clone();
        self.detail = Some(DetailPanel::new(agent));
        let api = self.session.api.clone();
        self.spawn(move || async move {
            let result = api.agent_detail(&credential, &agent_id).await;
            Reply::Detail { agent_id, result }
        });
    }

    fn start_chat(&mut self, agent: Agent, text: String, from_starter: bool) {
        if self.starting_chat {
            return;
        }
        self.starting_chat = true;
        let guard = self.guard().clone();
        let api = self.session.api.clone();
        let events = self.events.clone();
        self.spawn(move || async move {
            let result = if from_starter {
                bootstrap::start_from_starter(&guard, &api, &events, &agent, &text).await
            } else {
                bootstrap::start_chat(&guard, &api, &events, &agent, &text, false).await
            };
            Reply::Bootstrap {
                from_starter,
                result,
            }
        });
    }

    fn load_sidebar(&mut self) {
        if !self.sidebar_sync.begin_load() {
            return;
        }
        let Some(credential) = self.sidebar.begin_load(&self.session.guard) else {
            self.sidebar_sync.cancel_load();
            return;
        };
        let signin = self.sidebar_sync.signin;
        let api = self.session.api.clone();
        self.spawn(move || async move {
            Reply::SidebarLoaded {
                signin,
                response: sidebar::fetch(&api, &credential).await,
            }
        });
    }

    fn load_messages(&mut self, chat_id: String) {
        let Some(credential) = self.credential.clone() else {
            return;
        };
        self.chat.loading = true;
        let api = self.session.api.clone();
        self.spawn(move || async move {
            let result = api.messages(&credential, &chat_id).await;
            Reply::Messages { chat_id, result }
        });
    }

    fn send_chat_message(&mut self, route: &Route) {
        let text = self.chat.input.trim().to_string();
        if text.is_empty() || self.chat.sending || self.starting_chat {
            return;
        }
        let Some(credential) = self.guard().require() else {
            return;
        };
        match route {
            Route::Chat(chat_id) => {
                self.chat.sending = true;
                self.chat.push_outgoing(&text);
                let chat_id = chat_id.clone();
                let api = self.session.api.clone();
                self.spawn(move || async move {
                    let body = bootstrap::outgoing(&credential, &chat_id, &text, false);
                    let result = api.send_message(&credential, &body).await;
                    Reply::Sent { chat_id, result }
                });
            }
            Route::AgentChat(agent_id) => {
                let agent = self.known_agent(agent_id);
                self.chat.push_outgoing(&text);
                self.start_chat(agent, text, false);
            }
            Route::Login | Route::Explore | Route::NewChat => {}
        }
    }

    /// Agent summary for an id from any list we hold; a bare record otherwise.
    fn known_agent(&self, agent_id: &str) -> Agent {
        self.sidebar
            .recent_agents()
            .iter()
            .chain(self.catalog.agents())
            .chain(self.detail.as_ref().map(|d| d.agent()))
            .find(|a| a.id == agent_id)
            .cloned()
            .unwrap_or_else(|| Agent {
                id: agent_id.to_string(),
                name: agent_id.to_string(),
                provider: String::new(),
                icon_url: String::new(),
                description: String::new(),
            })
    }

    fn note_chat_error(&mut self, what: &str, e: &ApiError) {
        log::error!("chat: {} failed: {}", what, e);
        if e.is_unauthorized() {
            self.guard().expire();
        }
        self.chat.error = Some(format!("Could not {}.", what));
    }

    // --- replies -----------------------------------------------------------------------------

    fn poll_replies(&mut self) {
        while let Ok(reply) = self.rx.try_recv() {
            self.apply_reply(reply);
        }
        let notified = self.chat_list.drain();
        if self.sidebar_sync.wants_reload(notified) && self.sidebar.is_loaded() {
            log::debug!("chat list changed, reloading sidebar");
            self.load_sidebar();
        }
    }

    fn apply_reply(&mut self, reply: Reply) {
        match reply {
            Reply::CatalogInitial { load, tabs, agents } => {
                let guard = self.session.guard.clone();
                if let Some(next) = self.catalog.finish_initial(load, tabs, agents, &guard) {
                    self.fetch_agents(next);
                }
            }
            Reply::Agents { load, result } => {
                self.catalog
                    .finish_agent_load(load, result, &self.session.guard);
            }
            Reply::Detail { agent_id, result } => {
                match self.detail.as_mut() {
                    Some(panel) if panel.agent().id == agent_id => {
                        panel.apply(result, &self.session.guard)
                    }
                    _ => log::debug!("dropping detail for closed agent {}", agent_id),
                }
            }
            Reply::Bootstrap {
                from_starter,
                result,
            } => {
                self.starting_chat = false;
                match result {
                    Ok(BootstrapOutcome::Started { chat_id }) => {
                        log::info!("chat {} started", chat_id);
                        self.chat.confirm_outgoing();
                        if from_starter {
                            self.detail = None;
                            self.catalog.close_agent();
                        }
                    }
                    Ok(BootstrapOutcome::SignedOut) => self.detail = None,
                    Err(e) if from_starter => self.alert = Some(e.user_message().to_string()),
                    Err(e) => {
                        self.chat.retract_outgoing();
                        self.chat.error = Some(e.user_message().to_string());
                    }
                }
            }
            Reply::SidebarLoaded { signin, response } => {
                if !self.accepts_sidebar_reply(signin) {
                    return;
                }
                self.sidebar.apply_loaded(response, &self.session.guard);
                if self.sidebar_sync.finish_load() {
                    self.load_sidebar();
                }
            }
            Reply::Renamed { signin, response } => {
                if !self.accepts_sidebar_reply(signin) {
                    return;
                }
                self.sidebar_sync.note_own_change();
                self.sidebar
                    .apply_rename(response, &self.session.guard, &self.events);
            }
            Reply::Deleted { signin, response } => {
                if !self.accepts_sidebar_reply(signin) {
                    return;
                }
                self.sidebar_sync.note_own_change();
                self.sidebar
                    .apply_delete(response, &self.session.guard, &self.events);
            }
            Reply::Messages { chat_id, result } => {
                if self.chat.chat_id.as_deref() != Some(chat_id.as_str()) {
                    return;
                }
                self.chat.loading = false;
                match result {
                    Ok(messages) => {
                        self.chat.messages = messages;
                        self.chat.outgoing = false;
                    }
                    Err(e) => self.note_chat_error("load messages", &e),
                }
            }
            Reply::Sent { chat_id, result } => {
                self.chat.sending = false;
                if self.chat.chat_id.as_deref() != Some(chat_id.as_str()) {
                    if result.as_ref().is_err_and(ApiError::is_unauthorized) {
                        self.guard().expire();
                    }
                    return;
                }
                match result {
                    Ok(()) => {
                        self.chat.confirm_outgoing();
                        self.load_messages(chat_id)
                    }
                    Err(e) => {
                        self.chat.retract_outgoing();
                        self.note_chat_error("send message", &e);
                    }
                }
            }
        }
    }

    fn accepts_sidebar_reply(&self, signin: u64) -> bool {
        let accepted = self.sidebar_sync.accepts(signin, &self.navigator().current());
        if !accepted {
            log::debug!("dropping sidebar reply from a finished session");
        }
        accepted
    }

    // --- login -------------------------------------------------------------------------------

    fn submit_login(&mut self) {
        let credential = Credential::new(
            self.login.token.trim(),
            self.login.user_id.trim(),
            self.login.name.trim(),
        );
        let saved = Credential::parse(&credential.to_json())
            .and_then(|c| self.session.guard.provider().save(&c).map(|()| c));
        match saved {
            Ok(c) => {
                log::info!("signed in as user {}", c.user.id);
                self.login = LoginForm::default();
                self.navigator().navigate(Route::Explore);
            }
            Err(e) => {
                log::warn!("sign-in rejected: {}", e);
                self.login.error = Some(e.to_string());
            }
        }
    }

    fn ui_login(&mut self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.heading("Sign in");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);
        ui.label("Paste the token and user id issued by the Coach login service.");
        ui.add_space(12.0);
        egui::Grid::new("login_form")
            .num_columns(2)
            .spacing([12.0, 8.0])
            .show(ui, |ui| {
                ui.label("Token");
                ui.add(egui::TextEdit::singleline(&mut self.login.token).password(true));
                ui.end_row();
                ui.label("User id");
                ui.text_edit_singleline(&mut self.login.user_id);
                ui.end_row();
                ui.label("Name");
                ui.text_edit_singleline(&mut self.login.name);
                ui.end_row();
            });
        ui.add_space(12.0);
        if let Some(e) = &self.login.error {
            ui.colored_label(ui.visuals().error_fg_color, e);
            ui.add_space(8.0);
        }
        if ui.button("Sign in").clicked() {
            self.submit_login();
        }
    }

    // --- explore -----------------------------------------------------------------------------

    fn ui_explore(&mut self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.heading("Explore");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        let mut select_tab = None;
        ui.horizontal_wrapped(|ui| {
            let selected = self.catalog.selected_tab().category_id;
            for tab in self.catalog.tabs() {
                if ui
                    .selectable_label(tab.category_id == selected, &tab.category_name)
                    .clicked()
                {
                    select_tab = Some(tab.category_id);
                }
            }
        });
        ui.add_space(8.0);
        ui.add(
            egui::TextEdit::singleline(self.catalog.search_mut())
                .hint_text("Search agents")
                .desired_width(320.0),
        );
        ui.add_space(12.0);
        if let Some(e) = self.catalog.error() {
            ui.colored_label(ui.visuals().error_fg_color, e);
            ui.add_space(8.0);
        }

        let mut open = None;
        if self.catalog.is_loading() {
            ui.spinner();
        } else {
            egui::ScrollArea::vertical()
                .id_source("agents")
                .show(ui, |ui| {
                    let agents = self.catalog.visible_agents();
                    if agents.is_empty() {
                        ui.label("No agents found.");
                    }
                    for agent in agents {
                        if Self::agent_card(ui, agent) {
                            open = Some(agent.id.clone());
                        }
                        ui.add_space(8.0);
                    }
                    ui.add_space(Self::SCREEN_FOOTER_SPACING);
                });
        }

        if let Some(id) = select_tab {
            if let Some(load) = self.catalog.begin_select_tab(id) {
                self.fetch_agents(load);
            }
        }
        if let Some(id) = open {
            if let Some(agent) = self.catalog.select_agent(&id).cloned() {
                self.open_detail(agent);
            }
        }
    }

    /// One catalog entry; returns true when clicked.
    fn agent_card(ui: &mut egui::Ui, agent: &Agent) -> bool {
        let frame = egui::Frame::none()
            .fill(ui.style().visuals.extreme_bg_color)
            .stroke(egui::Stroke::new(
                1.0,
                ui.style().visuals.widgets.noninteractive.bg_stroke.color,
            ))
            .rounding(egui::Rounding::same(8.0))
            .inner_margin(egui::Margin::same(12.0));
        let inner = frame.show(ui, |ui| {
            ui.set_width(ui.available_width());
            ui.label(egui::RichText::new(&agent.name).strong().size(16.0));
            if !agent.provider.is_empty() {
                ui.label(egui::RichText::new(format!("By {}", agent.provider)).weak());
            }
            if !agent.description.is_empty() {
                ui.add_space(4.0);
                ui.label(&agent.description);
            }
        });
        inner
            .response
            .interact(egui::Sense::click())
            .on_hover_cursor(egui::CursorIcon::PointingHand)
            .clicked()
    }

    fn ui_detail(&mut self, ctx: &egui::Context) {
        let Some(panel) = self.detail.as_ref() else {
            return;
        };
        let mut open = true;
        let mut action = None;
        let busy = self.starting_chat;
        egui::Window::new(panel.agent().name.clone())
            .open(&mut open)
            .collapsible(false)
            .resizable(false)
            .default_width(420.0)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                let agent = panel.agent();
                if !agent.provider.is_empty() {
                    ui.label(egui::RichText::new(format!("By {}", agent.provider)).weak());
                }
                match panel.state() {
                    DetailState::Loading => {
                        ui.spinner();
                    }
                    DetailState::Failed(e) => {
                        ui.colored_label(ui.visuals().error_fg_color, e);
                    }
                    DetailState::Loaded(_) => {
                        if let Some(summary) = panel.rating_summary() {
                            ui.label(summary);
                        }
                    }
                }
                if !agent.description.is_empty() {
                    ui.add_space(8.0);
                    ui.label(&agent.description);
                }
                if !panel.starters().is_empty() {
                    ui.add_space(8.0);
                    ui.separator();
                    ui.label(egui::RichText::new("Conversation starters").strong());
                    for starter in panel.starters() {
                        let button = egui::Button::new(starter.as_str()).wrap(true);
                        if ui.add_enabled(!busy, button).clicked() {
                            action = Some(DetailAction::Starter(starter.clone()));
                        }
                    }
                }
                ui.add_space(8.0);
                ui.separator();
                ui.horizontal(|ui| {
                    if ui
                        .add_enabled(!busy, egui::Button::new("Start chat"))
                        .clicked()
                    {
                        action = Some(DetailAction::StartChat);
                    }
                    if busy {
                        ui.spinner();
                    }
                });
            });

        if !open {
            self.detail = None;
            self.catalog.close_agent();
            return;
        }
        match action {
            Some(DetailAction::Starter(text)) => {
                if let Some(agent) = self.detail.as_ref().map(|p| p.agent().clone()) {
                    self.start_chat(agent, text, true);
                }
            }
            Some(DetailAction::StartChat) => {
                if let Some(panel) = self.detail.take() {
                    self.catalog.close_agent();
                    panel.start_chat(self.navigator());
                }
            }
            None => {}
        }
    }

    // --- sidebar -----------------------------------------------------------------------------

    fn ui_sidebar(&mut self, ui: &mut egui::Ui) {
        let current = self.navigator().current();

        egui::TopBottomPanel::bottom("profile")
            .frame(egui::Frame::none().inner_margin(egui::Margin::symmetric(0.0, 12.0)))
            .show_inside(ui, |ui| {
                ui.horizontal(|ui| {
                    let avatar = egui::RichText::new(self.sidebar.avatar_initial().to_string())
                        .strong()
                        .size(18.0);
                    egui::Frame::none()
                        .fill(ui.style().visuals.selection.bg_fill)
                        .rounding(egui::Rounding::same(14.0))
                        .inner_margin(egui::Margin::symmetric(9.0, 4.0))
                        .show(ui, |ui| ui.label(avatar));
                    ui.label(self.sidebar.display_name());
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        if ui.button("Log out").clicked() {
                            self.sidebar.logout(&self.session.guard);
                        }
                    });
                });
            });

        ui.add_space(16.0);
        ui.horizontal(|ui| {
            if ui.button("New chat").clicked() {
                self.sidebar.new_chat(self.session.navigator.as_ref());
            }
            if ui.button("Explore").clicked() {
                self.sidebar.explore(self.session.navigator.as_ref());
            }
        });
        ui.add_space(8.0);
        ui.add(
            egui::TextEdit::singleline(self.sidebar.search_mut())
                .hint_text("Search chats")
                .desired_width(f32::INFINITY),
        );
        if let Some(e) = self.sidebar.error().map(str::to_string) {
            ui.add_space(6.0);
            ui.horizontal_wrapped(|ui| {
                ui.colored_label(ui.visuals().error_fg_color, e);
                if ui.small_button("Dismiss").clicked() {
                    self.sidebar.dismiss_error();
                }
            });
        }
        ui.add_space(8.0);

        let recent = self.sidebar.recent_agents().to_vec();
        let history = self.sidebar.visible_history();
        let editing = self.sidebar.editing().map(|d| d.chat_id.clone());
        let mut actions = Vec::new();

        egui::ScrollArea::vertical()
            .id_source("sidebar")
            .show(ui, |ui| {
                if !self.sidebar.is_loaded() {
                    ui.spinner();
                }
                if !recent.is_empty() {
                    ui.label(egui::RichText::new("Agents").weak());
                    for agent in &recent {
                        let active = current == Route::agent_chat(agent.id.clone());
                        if ui.selectable_label(active, &agent.name).clicked() {
                            actions.push(SidebarAction::OpenAgent(agent.id.clone()));
                        }
                    }
                    ui.add_space(12.0);
                }
                if history.is_empty() && self.sidebar.is_loaded() {
                    ui.label(egui::RichText::new("No chats yet.").weak());
                }
                for (bucket, entries) in history.buckets() {
                    ui.label(egui::RichText::new(bucket.label()).weak());
                    for entry in entries {
                        if editing.as_deref() == Some(entry.chat_id.as_str()) {
                            if let Some(text) = self.sidebar.draft_mut() {
                                let response = ui.add(
                                    egui::TextEdit::singleline(text).desired_width(f32::INFINITY),
                                );
                                if std::mem::take(&mut self.focus_draft) {
                                    response.request_focus();
                                }
                                if ui.input(|i| i.key_pressed(egui::Key::Escape)) {
                                    actions.push(SidebarAction::EndEdit(EditEnd::Escape));
                                } else if response.lost_focus() {
                                    let how = if ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                                        EditEnd::Submit
                                    } else {
                                        EditEnd::Blur
                                    };
                                    actions.push(SidebarAction::EndEdit(how));
                                }
                            }
                            continue;
                        }
                        ui.horizontal(|ui| {
                            let active = Sidebar::is_active(&entry.chat_id, &current);
                            if ui.selectable_label(active, &entry.title).clicked() {
                                actions.push(SidebarAction::OpenChat(entry.chat_id.clone()));
                            }
                            ui.with_layout(
                                egui::Layout::right_to_left(egui::Align::Center),
                                |ui| {
                                    if ui.small_button("Delete").clicked() {
                                        actions.push(SidebarAction::RequestDelete(
                                            entry.chat_id.clone(),
                                        ));
                                    }
                                    if ui.small_button("Rename").clicked() {
                                        actions
                                            .push(SidebarAction::BeginRename(entry.chat_id.clone()));
                                    }
                                },
                            );
                        });
                    }
                    ui.add_space(12.0);
                }
            });

        for action in actions {
            self.apply_sidebar_action(action);
        }
    }

    fn apply_sidebar_action(&mut self, action: SidebarAction) {
        let navigator = self.session.navigator.clone();
        match action {
            SidebarAction::OpenAgent(id) => self.sidebar.open_agent(navigator.as_ref(), &id),
            SidebarAction::OpenChat(id) => self.sidebar.open_chat(navigator.as_ref(), &id),
            SidebarAction::BeginRename(id) => {
                self.focus_draft = self.sidebar.begin_rename(&id);
            }
            SidebarAction::EndEdit(how) => {
                let Some(pending) = self.sidebar.end_edit(how) else {
                    return;
                };
                let Some(credential) = self.credential.clone() else {
                    return;
                };
                let signin = self.sidebar_sync.signin;
                let api = self.session.api.clone();
                self.spawn(move || async move {
                    Reply::Renamed {
                        signin,
                        response: sidebar::send_rename(&api, &credential, pending).await,
                    }
                });
            }
            SidebarAction::RequestDelete(id) => self.sidebar.request_delete(id),
        }
    }

    fn delete_chat(&mut self, chat_id: String) {
        let Some(credential) = self.credential.clone() else {
            return;
        };
        let signin = self.sidebar_sync.signin;
        let api = self.session.api.clone();
        self.spawn(move || async move {
            Reply::Deleted {
                signin,
                response: sidebar::send_delete(&api, &credential, chat_id).await,
            }
        });
    }

    fn ui_delete_confirm(&mut self, ctx: &egui::Context) {
        let Some(chat_id) = self.sidebar.pending_delete().map(str::to_string) else {
            return;
        };
        let title = self
            .sidebar
            .history()
            .find(&chat_id)
            .map(|(_, e)| e.title.clone())
            .unwrap_or_else(|| chat_id.clone());
        let mut confirmed = false;
        let mut cancelled = false;
        egui::Window::new("Delete chat?")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(format!("\"{}\" will be permanently deleted.", title));
                ui.add_space(12.0);
                ui.horizontal(|ui| {
                    if ui.button("Delete").clicked() {
                        confirmed = true;
                    }
                    if ui.button("Cancel").clicked() {
                        cancelled = true;
                    }
                });
            });
        if confirmed {
            if let Some(id) = self.sidebar.confirm_delete() {
                self.delete_chat(id);
            }
        } else if cancelled {
            self.sidebar.cancel_delete();
        }
    }

    // --- chat --------------------------------------------------------------------------------

    fn chat_title(&self, route: &Route) -> String {
        match route {
            Route::Chat(id) => self
                .sidebar
                .history()
                .find(id)
                .map(|(_, e)| e.title.clone())
                .unwrap_or_else(|| "Chat".to_string()),
            Route::AgentChat(agent_id) => format!("New chat with {}", self.known_agent(agent_id).name),
            _ => "New chat".to_string(),
        }
    }

    fn ui_chat(&mut self, ui: &mut egui::Ui, route: &Route) {
        ui.add_space(24.0);
        ui.heading(self.chat_title(route));
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        if *route == Route::NewChat {
            ui.label("Pick an agent from the sidebar, or find one in Explore.");
            ui.add_space(8.0);
            if ui.button("Explore agents").clicked() {
                self.navigator().navigate(Route::Explore);
            }
            return;
        }

        egui::TopBottomPanel::bottom("composer")
            .frame(egui::Frame::none().inner_margin(egui::Margin::symmetric(0.0, 12.0)))
            .show_inside(ui, |ui| {
                if let Some(e) = &self.chat.error {
                    ui.colored_label(ui.visuals().error_fg_color, e);
                    ui.add_space(6.0);
                }
                let busy = self.chat.sending || self.starting_chat;
                ui.add_sized(
                    [ui.available_width(), CHAT_INPUT_HEIGHT],
                    egui::TextEdit::multiline(&mut self.chat.input).hint_text("Message"),
                );
                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    let can_send = !busy && !self.chat.input.trim().is_empty();
                    if ui.add_enabled(can_send, egui::Button::new("Send")).clicked() {
                        self.send_chat_message(route);
                    }
                    if busy {
                        ui.spinner();
                    }
                });
            });

        let cache = &mut self.markdown_cache;
        let chat = &self.chat;
        egui::ScrollArea::vertical()
            .id_source("transcript")
            .stick_to_bottom(true)
            .auto_shrink([false, false])
            .show(ui, |ui| {
                if chat.loading && chat.messages.is_empty() {
                    ui.spinner();
                }
                for (i, m) in chat.messages.iter().enumerate() {
                    Self::render_chat_message(ui, cache, i, m);
                    ui.add_space(8.0);
                }
            });
    }

    /// Assistant messages span the transcript; user messages sit right in a narrower bubble.
    /// Content is GitHub-flavoured Markdown.
    fn render_chat_message(
        ui: &mut egui::Ui,
        cache: &mut CommonMarkCache,
        index: usize,
        m: &Message,
    ) {
        let viewer = CommonMarkViewer::new(("message", index));
        let full = ui.available_width();
        match message::layout_for(m.role) {
            Layout::FullWidth => {
                egui::Frame::none()
                    .fill(ui.style().visuals.panel_fill)
                    .inner_margin(egui::Margin::same(8.0))
                    .show(ui, |ui| {
                        ui.set_width(ui.available_width());
                        viewer.show(ui, cache, &m.content);
                    });
            }
            Layout::Bubble { max_width } => {
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Min), |ui| {
                    ui.set_max_width(full * max_width);
                    egui::Frame::none()
                        .fill(ui.style().visuals.extreme_bg_color)
                        .stroke(egui::Stroke::new(
                            1.0,
                            ui.style().visuals.widgets.noninteractive.bg_stroke.color,
                        ))
                        .rounding(egui::Rounding::same(8.0))
                        .inner_margin(egui::Margin::same(8.0))
                        .show(ui, |ui| {
                            ui.with_layout(egui::Layout::top_down(egui::Align::Min), |ui| {
                                viewer.show(ui, cache, &m.content);
                            });
                        });
                });
            }
        }
    }

    // --- logs / alert ------------------------------------------------------------------------

    fn ui_logs_screen(&self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.heading("Logs");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        let lines: Vec<String> = log_buffer()
            .lock()
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default();

        let available = ui.available_height();
        let scroll_height = (available - Self::SCREEN_FOOTER_SPACING).max(0.0);
        egui::ScrollArea::vertical()
            .max_height(scroll_height)
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for line in &lines {
                    ui.label(
                        egui::RichText::new(line.as_str()).family(egui::FontFamily::Monospace),
                    );
                }
                if lines.is_empty() {
                    ui.label("No log output yet.");
                }
            });
        ui.add_space(Self::SCREEN_FOOTER_SPACING);
    }

    fn ui_alert(&mut self, ctx: &egui::Context) {
        let Some(message) = self.alert.clone() else {
            return;
        };
        egui::Window::new("Something went wrong")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(message);
                ui.add_space(12.0);
                if ui.button("OK").clicked() {
                    self.alert = None;
                }
            });
    }
}

fn is_chat_route(route: &Route) -> bool {
    matches!(route, Route::NewChat | Route::AgentChat(_) | Route::Chat(_))
}

fn shows_sidebar(route: &Route) -> bool {
    *route == Route::Explore || is_chat_route(route)
}

impl eframe::App for CoachApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_replies();
        self.sync_route();
        let route = self.navigator().current();

        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                .show(ui, |ui| {
                    ui.add_space(16.0);
                    ui.horizontal(|ui| {
                        let history = self.session.navigator.history();
                        let can_go_back = self.screen == Screen::Route
                            && history.iter().rev().nth(1).is_some_and(Route::is_protected);
                        if ui.add_enabled(can_go_back, egui::Button::new("Back")).clicked() {
                            self.session.navigator.back();
                        }
                        ui.add_space(8.0);
                        ui.heading("Coach");
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            if ui
                                .selectable_label(self.screen == Screen::Logs, "Logs")
                                .clicked()
                            {
                                self.screen = match self.screen {
                                    Screen::Logs => Screen::Route,
                                    Screen::Route => Screen::Logs,
                                };
                            }
                            if route.is_protected() {
                                ui.add_space(12.0);
                                let on_chat = self.screen == Screen::Route && is_chat_route(&route);
                                if ui.selectable_label(on_chat, "Chats").clicked() {
                                    self.screen = Screen::Route;
                                    if !on_chat {
                                        self.session.navigator.navigate(Route::NewChat);
                                    }
                                }
                                ui.add_space(12.0);
                                let on_explore =
                                    self.screen == Screen::Route && route == Route::Explore;
                                if ui.selectable_label(on_explore, "Explore").clicked() {
                                    self.screen = Screen::Route;
                                    self.session.navigator.navigate(Route::Explore);
                                }
                            }
                        });
                    });
                    ui.add_space(16.0);
                });
        });

        if self.screen == Screen::Logs {
            egui::CentralPanel::default().show(ctx, |ui| {
                egui::Frame::none()
                    .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                    .show(ui, |ui| self.ui_logs_screen(ui));
            });
            return;
        }

        if shows_sidebar(&route) {
            egui::SidePanel::left("sidebar")
                .resizable(false)
                .exact_width(SIDEBAR_WIDTH)
                .show(ctx, |ui| {
                    egui::Frame::none()
                        .inner_margin(egui::Margin::symmetric(16.0, 0.0))
                        .show(ui, |ui| self.ui_sidebar(ui));
                });
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                .show(ui, |ui| match &route {
                    Route::Login => self.ui_login(ui),
                    Route::Explore => self.ui_explore(ui),
                    Route::NewChat | Route::AgentChat(_) | Route::Chat(_) => {
                        self.ui_chat(ui, &route)
                    }
                });
        });

        if route == Route::Explore {
            self.ui_detail(ctx);
        }
        self.ui_delete_confirm(ctx);
        self.ui_alert(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_send_takes_the_message_back() {
        let mut chat = ChatPane {
            messages: vec![Message::ai("Hi, what would you like to work on?")],
            input: "  Help me plan my week  ".into(),
            ..ChatPane::default()
        };
        let text = chat.input.trim().to_string();
        chat.push_outgoing(&text);
        assert_eq!(chat.messages.len(), 2);
        assert!(chat.input.is_empty());

        chat.retract_outgoing();
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.input, "Help me plan my week");

        chat.retract_outgoing();
        assert_eq!(chat.messages.len(), 1, "only the outgoing message is retracted");
    }

    #[test]
    fn retract_keeps_newer_draft() {
        let mut chat = ChatPane::default();
        chat.push_outgoing("first");
        chat.input = "second".into();
        chat.retract_outgoing();
        assert!(chat.messages.is_empty());
        assert_eq!(chat.input, "second");
    }

    #[test]
    fn confirmed_message_stays() {
        let mut chat = ChatPane::default();
        chat.push_outgoing("hello");
        chat.confirm_outgoing();
        chat.retract_outgoing();
        assert_eq!(chat.messages.len(), 1);
    }

    #[test]
    fn second_load_queues_behind_the_first() {
        let mut sync = SidebarSync::default();
        assert!(sync.begin_load());
        assert!(!sync.begin_load());
        assert!(sync.finish_load(), "queued load runs after the first");
        assert!(sync.begin_load());
        assert!(!sync.finish_load());
    }

    #[test]
    fn replies_after_sign_out_are_dropped() {
        let mut sync = SidebarSync::default();
        assert!(sync.begin_load());
        let signin = sync.signin;
        assert!(sync.accepts(signin, &Route::Explore));
        assert!(!sync.accepts(signin, &Route::Login));

        sync.reset();
        assert!(!sync.accepts(signin, &Route::Explore));
        assert!(sync.accepts(sync.signin, &Route::NewChat));
        assert!(sync.begin_load(), "sign-out frees the load slot");
    }

    #[test]
    fn own_rename_does_not_reload_twice() {
        let events = ChatListEvents::new();
        let mut chat_list = events.subscribe();
        let mut sync = SidebarSync::default();

        sync.note_own_change();
        events.notify();
        assert!(!sync.wants_reload(chat_list.drain()));

        // Someone else's change on a later frame still reloads.
        events.notify();
        assert!(sync.wants_reload(chat_list.drain()));
        assert!(!sync.wants_reload(chat_list.drain()));
    }

    #[test]
    fn sidebar_shows_on_explore_and_chats() {
        assert!(shows_sidebar(&Route::Explore));
        assert!(shows_sidebar(&Route::NewChat));
        assert!(shows_sidebar(&Route::Chat("7".into())));
        assert!(!shows_sidebar(&Route::Login));
    }
}
