use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _};
use clap::{Parser, Subcommand};

use coach::api::{Agent, ApiClient, ChatApi};
use coach::bootstrap::{self, BootstrapOutcome};
use coach::catalog::CatalogView;
use coach::config::{self, Config};
use coach::credential::{Credential, FileCredentialStore, SessionProvider};
use coach::detail::{DetailPanel, DetailState};
use coach::events::ChatListEvents;
use coach::guard::SessionGuard;
use coach::message::{self, Block, Layout, Span};
use coach::route::{MemoryNavigator, Navigator, Route};
use coach::sidebar::{EditEnd, Sidebar};

#[derive(Parser)]
#[command(name = "coach")]
#[command(about = "Coach CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and an empty config file.
    Init {
        /// Config file path (default: COACH_CONFIG_PATH or ~/.coach/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Store a session credential (token and user) for the other commands.
    Login {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Bearer token issued by the login service.
        #[arg(long)]
        token: String,

        #[arg(long, value_name = "ID")]
        user_id: String,

        /// Display name shown in the profile.
        #[arg(long, default_value = "")]
        name: String,
    },

    /// Remove the stored credential.
    Logout {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List explore categories in display order.
    Tabs {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List agents in a category (default: the configured default category).
    Agents {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[arg(long, value_name = "ID")]
        category: Option<i64>,

        /// Only agents whose name, provider or description contains this text.
        #[arg(long)]
        search: Option<String>,
    },

    /// Show an agent's details and conversation starters.
    Agent {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        agent_id: String,

        /// Category the agent is listed in (default: the configured default category).
        #[arg(long, value_name = "ID")]
        category: Option<i64>,
    },

    /// Start a chat with an agent from one of its conversation starters.
    Start {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        agent_id: String,

        #[arg(long, value_name = "ID")]
        category: Option<i64>,

        /// Starter number as listed by `coach agent` (1-based).
        #[arg(long, value_name = "N", default_value_t = 1)]
        starter: usize,
    },

    /// Print a chat transcript.
    Show {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        chat_id: String,
    },

    /// List recent agents and chat history.
    History {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Only chats whose title contains this text.
        #[arg(long)]
        search: Option<String>,
    },

    /// Rename a chat. A blank title leaves the chat unchanged.
    Rename {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        chat_id: String,

        title: String,
    },

    /// Delete a chat after confirmation.
    Delete {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        chat_id: String,

        /// Skip the confirmation prompt.
        #[arg(long, short)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("coach {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Login {
            config,
            token,
            user_id,
            name,
        }) => run_login(config, token, user_id, name),
        Some(Commands::Logout { config }) => run_logout(config),
        Some(Commands::Tabs { config }) => run_tabs(config).await,
        Some(Commands::Agents {
            config,
            category,
            search,
        }) => run_agents(config, category, search).await,
        Some(Commands::Agent {
            config,
            agent_id,
            category,
        }) => run_agent(config, agent_id, category).await,
        Some(Commands::Start {
            config,
            agent_id,
            category,
            starter,
        }) => run_start(config, agent_id, category, starter).await,
        Some(Commands::Show { config, chat_id }) => run_show(config, chat_id).await,
        Some(Commands::History { config, search }) => run_history(config, search).await,
        Some(Commands::Rename {
            config,
            chat_id,
            title,
        }) => run_rename(config, chat_id, title).await,
        Some(Commands::Delete {
            config,
            chat_id,
            yes,
        }) => run_delete(config, chat_id, yes).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

/// Everything a command needs to talk to the API on behalf of the stored session.
struct Context {
    config: Config,
    api: ApiClient,
    guard: SessionGuard,
    navigator: Arc<MemoryNavigator>,
    events: ChatListEvents,
}

impl Context {
    fn load(config_path: Option<PathBuf>, start: Route) -> anyhow::Result<Self> {
        let (config, path) = config::load_config(config_path)?;
        let store = FileCredentialStore::new(config::resolve_credential_path(&config, &path));
        log::debug!("credential file: {}", store.path().display());
        let provider = SessionProvider::new(Arc::new(store));
        let navigator = Arc::new(MemoryNavigator::new(start));
        let guard = SessionGuard::new(provider, navigator.clone());
        let api = ApiClient::from_config(&config);
        Ok(Self {
            config,
            api,
            guard,
            navigator,
            events: ChatListEvents::new(),
        })
    }

    fn signed_out(&self) -> bool {
        self.navigator.current() == Route::Login
    }

    /// Fail with a sign-in hint when the guard sent us to the login route.
    fn ensure_signed_in(&self) -> anyhow::Result<()> {
        if self.signed_out() {
            bail!("not signed in or session expired; run `coach login`");
        }
        Ok(())
    }

    fn require(&self) -> anyhow::Result<Credential> {
        let credential = self.guard.require();
        self.ensure_signed_in()?;
        credential.ok_or_else(|| anyhow!("not signed in; run `coach login`"))
    }

    /// Catalog entered on `category`, or the configured default.
    async fn catalog(&self, category: Option<i64>) -> anyhow::Result<(CatalogView, Credential)> {
        let mut view = CatalogView::from_config(&self.config.catalog);
        let credential = view.enter(&self.guard, &self.api).await;
        self.ensure_signed_in()?;
        let credential = credential.ok_or_else(|| anyhow!("not signed in; run `coach login`"))?;
        if let Some(id) = category {
            if !view.tabs().iter().any(|t| t.category_id == id) {
                bail!("unknown category {}", id);
            }
            view.select_tab(&self.guard, &self.api, &credential, id).await;
            self.ensure_signed_in()?;
        }
        if let Some(e) = view.error() {
            bail!("{}", e);
        }
        Ok((view, credential))
    }

    async fn sidebar(&self) -> anyhow::Result<(Sidebar, Credential)> {
        let mut sidebar = Sidebar::new();
        let credential = sidebar.enter(&self.guard, &self.api).await;
        self.ensure_signed_in()?;
        let credential = credential.ok_or_else(|| anyhow!("not signed in; run `coach login`"))?;
        if let Some(e) = sidebar.error() {
            bail!("{}", e);
        }
        Ok((sidebar, credential))
    }

    /// Detail panel for an agent listed in `category`.
    async fn detail(
        &self,
        agent_id: &str,
        category: Option<i64>,
    ) -> anyhow::Result<(DetailPanel, Credential)> {
        let (mut view, credential) = self.catalog(category).await?;
        let agent = view.select_agent(agent_id).cloned().ok_or_else(|| {
            anyhow!(
                "agent {} is not listed in category {}",
                agent_id,
                view.selected_tab().category_id
            )
        })?;
        let mut panel = DetailPanel::new(agent);
        panel.load(&self.guard, &self.api, &credential).await;
        self.ensure_signed_in()?;
        if let DetailState::Failed(e) = panel.state() {
            bail!("{}", e);
        }
        Ok((panel, credential))
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let dir = coach::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

fn run_login(
    config_path: Option<PathBuf>,
    token: String,
    user_id: String,
    name: String,
) -> anyhow::Result<()> {
    let ctx = Context::load(config_path, Route::Login)?;
    let credential = Credential::new(token.trim(), user_id.trim(), name.trim());
    // Same shape check the guard applies when reading it back.
    Credential::parse(&credential.to_json()).context("credential rejected")?;
    ctx.guard
        .provider()
        .save(&credential)
        .context("saving credential")?;
    ctx.navigator.navigate(Route::Explore);
    log::info!("signed in as user {}", credential.user.id);
    println!("signed in");
    Ok(())
}

fn run_logout(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let ctx = Context::load(config_path, Route::Explore)?;
    let name = ctx.guard.provider().user_name();
    ctx.guard.logout();
    match name {
        Some(name) => println!("signed out {}", name),
        None => println!("signed out"),
    }
    Ok(())
}

async fn run_tabs(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let ctx = Context::load(config_path, Route::Explore)?;
    let (view, _) = ctx.catalog(None).await?;
    for tab in view.tabs() {
        let marker = if tab.category_id == view.selected_tab().category_id {
            "*"
        } else {
            " "
        };
        println!("{} {:>4}  {}", marker, tab.category_id, tab.category_name);
    }
    Ok(())
}

fn print_agent_line(agent: &Agent) {
    println!("{:>6}  {}  (by {})", agent.id, agent.name, agent.provider);
}

async fn run_agents(
    config_path: Option<PathBuf>,
    category: Option<i64>,
    search: Option<String>,
) -> anyhow::Result<()> {
    let ctx = Context::load(config_path, Route::Explore)?;
    let (mut view, _) = ctx.catalog(category).await?;
    if let Some(q) = search {
        view.set_search(q);
    }
    println!("{}", view.selected_tab().category_name);
    let agents = view.visible_agents();
    if agents.is_empty() {
        println!("  (no agents)");
    }
    for agent in agents {
        print_agent_line(agent);
    }
    Ok(())
}

async fn run_agent(
    config_path: Option<PathBuf>,
    agent_id: String,
    category: Option<i64>,
) -> anyhow::Result<()> {
    let ctx = Context::load(config_path, Route::Explore)?;
    let (panel, _) = ctx.detail(&agent_id, category).await?;
    let agent = panel.agent();
    println!("{}", agent.name);
    println!("By {}", agent.provider);
    if let Some(summary) = panel.rating_summary() {
        println!("{}", summary);
    }
    if !agent.description.is_empty() {
        println!();
        println!("{}", agent.description);
    }
    let starters = panel.starters();
    if !starters.is_empty() {
        println!();
        println!("Conversation starters:");
        for (i, s) in starters.iter().enumerate() {
            println!("  {}. {}", i + 1, s);
        }
    }
    Ok(())
}

async fn run_start(
    config_path: Option<PathBuf>,
    agent_id: String,
    category: Option<i64>,
    starter: usize,
) -> anyhow::Result<()> {
    let ctx = Context::load(config_path, Route::Explore)?;
    let (panel, _) = ctx.detail(&agent_id, category).await?;
    let text = starter
        .checked_sub(1)
        .and_then(|i| panel.starters().get(i))
        .cloned()
        .ok_or_else(|| {
            anyhow!(
                "agent {} has no starter {} ({} available)",
                agent_id,
                starter,
                panel.starters().len()
            )
        })?;

    match bootstrap::start_from_starter(&ctx.guard, &ctx.api, &ctx.events, panel.agent(), &text)
        .await
    {
        Ok(BootstrapOutcome::Started { chat_id }) => {
            println!("started chat {} ({})", chat_id, ctx.navigator.current());
            print_transcript(&ctx, &chat_id).await
        }
        Ok(BootstrapOutcome::SignedOut) => {
            bail!("not signed in or session expired; run `coach login`")
        }
        Err(e) => {
            ctx.ensure_signed_in()?;
            if let Some(id) = e.orphaned_chat_id() {
                eprintln!("chat {} was created but the starter was not sent", id);
            }
            let message = e.user_message();
            Err(anyhow::Error::new(e).context(message))
        }
    }
}

async fn run_show(config_path: Option<PathBuf>, chat_id: String) -> anyhow::Result<()> {
    let ctx = Context::load(config_path, Route::chat(chat_id.clone()))?;
    print_transcript(&ctx, &chat_id).await
}

async fn print_transcript(ctx: &Context, chat_id: &str) -> anyhow::Result<()> {
    let credential = ctx.require()?;
    let messages = match ctx.api.messages(&credential, chat_id).await {
        Ok(m) => m,
        Err(e) if e.is_unauthorized() => {
            ctx.guard.expire();
            bail!("session expired; run `coach login`");
        }
        Err(e) => return Err(e).context("loading messages"),
    };
    for m in &messages {
        let rendered = message::render(m);
        let (label, indent) = match rendered.layout {
            Layout::FullWidth => ("coach", ""),
            Layout::Bubble { .. } => ("you", "        "),
        };
        println!("{}{}:", indent, label);
        for block in &rendered.blocks {
            print_block(block, indent);
        }
        println!();
    }
    Ok(())
}

/// Terminal form of inline text: code spans keep their backticks, links show their target.
fn inline(spans: &[Span]) -> String {
    let mut out = String::new();
    for span in spans {
        if span.style.code {
            out.push('`');
            out.push_str(&span.text);
            out.push('`');
        } else {
            out.push_str(&span.text);
        }
        if let Some(link) = span.link.as_deref().filter(|l| *l != span.text) {
            out.push_str(&format!(" <{}>", link));
        }
    }
    out
}

fn print_block(block: &Block, indent: &str) {
    match block {
        Block::Heading { level, text } => {
            println!("{}{} {}", indent, "#".repeat(*level as usize), inline(text))
        }
        Block::Paragraph(text) => {
            for line in inline(text).lines() {
                println!("{}{}", indent, line);
            }
        }
        Block::ListItem {
            number,
            depth,
            checked,
            text,
        } => {
            let pad = "  ".repeat(*depth);
            let marker = match number {
                Some(n) => format!("{}.", n),
                None => "-".to_string(),
            };
            let task = match checked {
                Some(true) => "[x] ",
                Some(false) => "[ ] ",
                None => "",
            };
            println!("{}{}{} {}{}", indent, pad, marker, task, inline(text));
        }
        Block::Code { code, .. } => {
            for line in code.lines() {
                println!("{}    {}", indent, line);
            }
        }
        Block::Quote(blocks) => {
            let nested = format!("{}> ", indent);
            for b in blocks {
                print_block(b, &nested);
            }
        }
        Block::Table { header, rows } => {
            let row_text = |cells: &[Vec<Span>]| {
                cells.iter().map(|c| inline(c)).collect::<Vec<_>>().join(" | ")
            };
            println!("{}{}", indent, row_text(header));
            for row in rows {
                println!("{}{}", indent, row_text(row));
            }
        }
        Block::Rule => println!("{}----", indent),
    }
}

async fn run_history(config_path: Option<PathBuf>, search: Option<String>) -> anyhow::Result<()> {
    let ctx = Context::load(config_path, Route::NewChat)?;
    let (mut sidebar, _) = ctx.sidebar().await?;
    if let Some(q) = search {
        *sidebar.search_mut() = q;
    }

    println!("{} [{}]", sidebar.display_name(), sidebar.avatar_initial());
    if !sidebar.recent_agents().is_empty() {
        println!();
        println!("Agents");
        for agent in sidebar.recent_agents() {
            print_agent_line(agent);
        }
    }
    let history = sidebar.visible_history();
    if history.is_empty() {
        println!();
        println!("No chats.");
    }
    for (bucket, entries) in history.buckets() {
        println!();
        println!("{}", bucket.label());
        for e in entries {
            println!("{:>10}  {}", e.chat_id, e.title);
        }
    }
    Ok(())
}

async fn run_rename(
    config_path: Option<PathBuf>,
    chat_id: String,
    title: String,
) -> anyhow::Result<()> {
    let ctx = Context::load(config_path, Route::NewChat)?;
    let (mut sidebar, credential) = ctx.sidebar().await?;
    if !sidebar.begin_rename(&chat_id) {
        bail!("no chat {} in history", chat_id);
    }
    sidebar.set_draft(title);
    let Some(pending) = sidebar.end_edit(EditEnd::Submit) else {
        println!("title is blank; chat {} unchanged", chat_id);
        return Ok(());
    };
    sidebar
        .commit_rename(&ctx.guard, &ctx.api, &ctx.events, &credential, pending)
        .await;
    ctx.ensure_signed_in()?;
    if let Some(e) = sidebar.error() {
        bail!("{}", e);
    }
    println!("renamed chat {}", chat_id);
    Ok(())
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    let mut stdout = io::stdout();
    write!(stdout, "{} [y/N] ", prompt)?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

async fn run_delete(config_path: Option<PathBuf>, chat_id: String, yes: bool) -> anyhow::Result<()> {
    let ctx = Context::load(config_path, Route::NewChat)?;
    let (mut sidebar, credential) = ctx.sidebar().await?;
    let title = sidebar
        .history()
        .find(&chat_id)
        .map(|(_, e)| e.title.clone())
        .ok_or_else(|| anyhow!("no chat {} in history", chat_id))?;

    sidebar.request_delete(chat_id.clone());
    if !yes && !confirm(&format!("Delete chat \"{}\"?", title))? {
        sidebar.cancel_delete();
        println!("cancelled");
        return Ok(());
    }
    let Some(id) = sidebar.confirm_delete() else {
        return Ok(());
    };
    sidebar
        .delete(&ctx.guard, &ctx.api, &ctx.events, &credential, id)
        .await;
    ctx.ensure_signed_in()?;
    if let Some(e) = sidebar.error() {
        bail!("{}", e);
    }
    println!("deleted chat {}", chat_id);
    Ok(())
}
