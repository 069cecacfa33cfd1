//! Chat message presentation: layout by role and GitHub-flavoured Markdown split into blocks.
//!
//! Parsing is done by pulldown-cmark with tables, strikethrough and task lists enabled. Blocks
//! carry their inline text as styled spans so a front-end can draw emphasis, code and links.

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag};

use crate::api::{Message, Role};

/// Widest a user bubble may be, as a fraction of the transcript width.
pub const USER_BUBBLE_MAX_WIDTH: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Layout {
    FullWidth,
    Bubble { max_width: f32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Style {
    pub strong: bool,
    pub emphasis: bool,
    pub strikethrough: bool,
    pub code: bool,
}

/// A run of text with one style. `link` is the destination when the run is inside a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub style: Style,
    pub link: Option<String>,
}

impl Span {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: Style::default(),
            link: None,
        }
    }
}

/// Concatenated text of `spans` with styling dropped.
pub fn plain_text(spans: &[Span]) -> String {
    spans.iter().map(|s| s.text.as_str()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading {
        level: u8,
        text: Vec<Span>,
    },
    Paragraph(Vec<Span>),
    /// `number` is set for ordered items, `checked` for task items. Nested lists come out as
    /// further items with a greater `depth`.
    ListItem {
        number: Option<u64>,
        depth: usize,
        checked: Option<bool>,
        text: Vec<Span>,
    },
    Code {
        lang: Option<String>,
        code: String,
    },
    Quote(Vec<Block>),
    Table {
        header: Vec<Vec<Span>>,
        rows: Vec<Vec<Vec<Span>>>,
    },
    Rule,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub role: Role,
    pub layout: Layout,
    pub blocks: Vec<Block>,
}

pub fn layout_for(role: Role) -> Layout {
    match role {
        Role::Ai => Layout::FullWidth,
        Role::User => Layout::Bubble {
            max_width: USER_BUBBLE_MAX_WIDTH,
        },
    }
}

pub fn render(message: &Message) -> RenderedMessage {
    RenderedMessage {
        role: message.role,
        layout: layout_for(message.role),
        blocks: parse_blocks(&message.content),
    }
}

/// Split Markdown into top-level blocks. Unclosed code fences run to the end of the text.
pub fn parse_blocks(src: &str) -> Vec<Block> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    let mut builder = Builder::default();
    for event in Parser::new_ext(src, options) {
        builder.event(event);
    }
    builder.finish()
}

/// Block whose inline text is being collected.
enum Leaf {
    Paragraph,
    Heading(u8),
    Item {
        number: Option<u64>,
        depth: usize,
        checked: Option<bool>,
    },
    Cell,
}

#[derive(Default)]
struct TableDraft {
    header: Vec<Vec<Span>>,
    rows: Vec<Vec<Vec<Span>>>,
    row: Vec<Vec<Span>>,
}

#[derive(Default)]
struct Builder {
    blocks: Vec<Block>,
    /// Enclosing block lists, one per open block quote.
    quotes: Vec<Vec<Block>>,
    /// Next item number for each open list; None for bullet lists.
    lists: Vec<Option<u64>>,
    leaf: Option<Leaf>,
    spans: Vec<Span>,
    code: Option<(Option<String>, String)>,
    table: Option<TableDraft>,
    strong: usize,
    emphasis: usize,
    strikethrough: usize,
    link: Option<String>,
}

impl Builder {
    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) | Event::Html(text) => self.push_text(&text, false),
            Event::Code(text) => self.push_text(&text, true),
            Event::SoftBreak => self.push_text(" ", false),
            Event::HardBreak => self.push_text("\n", false),
            Event::Rule => {
                self.flush();
                self.blocks.push(Block::Rule);
            }
            Event::TaskListMarker(done) => {
                if let Some(Leaf::Item { checked, .. }) = self.leaf.as_mut() {
                    *checked = Some(done);
                }
            }
            Event::FootnoteReference(label) => self.push_text(&format!("[{}]", label), false),
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => {
                if matches!(self.leaf, Some(Leaf::Item { .. })) {
                    // Loose list item: later paragraphs continue the item on a new line.
                    if !self.spans.is_empty() {
                        self.push_text("\n", false);
                    }
                } else {
                    self.flush();
                    self.leaf = Some(Leaf::Paragraph);
                }
            }
            Tag::Heading(level, _, _) => {
                self.flush();
                self.leaf = Some(Leaf::Heading(heading_level(level)));
            }
            Tag::BlockQuote => {
                self.flush();
                let outer = std::mem::take(&mut self.blocks);
                self.quotes.push(outer);
            }
            Tag::CodeBlock(kind) => {
                self.flush();
                let lang = match kind {
                    CodeBlockKind::Fenced(info) => {
                        info.split_whitespace().next().map(str::to_string)
                    }
                    CodeBlockKind::Indented => None,
                };
                self.code = Some((lang, String::new()));
            }
            Tag::List(start) => {
                self.flush();
                self.lists.push(start);
            }
            Tag::Item => {
                self.flush();
                let depth = self.lists.len().saturating_sub(1);
                let number = match self.lists.last_mut() {
                    Some(Some(next)) => {
                        let n = *next;
                        *next += 1;
                        Some(n)
                    }
                    _ => None,
                };
                self.leaf = Some(Leaf::Item {
                    number,
                    depth,
                    checked: None,
                });
            }
            Tag::Table(_) => {
                self.flush();
                self.table = Some(TableDraft::default());
            }
            Tag::TableHead | Tag::TableRow => {
                if let Some(table) = self.table.as_mut() {
                    table.row.clear();
                }
            }
            Tag::TableCell => {
                self.flush();
                self.leaf = Some(Leaf::Cell);
            }
            Tag::Emphasis => self.emphasis += 1,
            Tag::Strong => self.strong += 1,
            Tag::Strikethrough => self.strikethrough += 1,
            Tag::Link(_, dest, _) | Tag::Image(_, dest, _) => self.link = Some(dest.to_string()),
            Tag::FootnoteDefinition(_) => self.flush(),
        }
    }

    fn end(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => {
                if matches!(self.leaf, Some(Leaf::Paragraph)) {
                    self.flush();
                }
            }
            Tag::Heading(..) | Tag::Item | Tag::TableCell | Tag::FootnoteDefinition(_) => {
                self.flush()
            }
            Tag::BlockQuote => {
                self.flush();
                let outer = self.quotes.pop().unwrap_or_default();
                let inner = std::mem::replace(&mut self.blocks, outer);
                self.blocks.push(Block::Quote(inner));
            }
            Tag::CodeBlock(_) => {
                if let Some((lang, code)) = self.code.take() {
                    self.blocks.push(Block::Code {
                        lang,
                        code: code.trim_end_matches('\n').to_string(),
                    });
                }
            }
            Tag::List(_) => {
                self.flush();
                self.lists.pop();
            }
            Tag::TableHead => {
                if let Some(table) = self.table.as_mut() {
                    table.header = std::mem::take(&mut table.row);
                }
            }
            Tag::TableRow => {
                if let Some(table) = self.table.as_mut() {
                    let row = std::mem::take(&mut table.row);
                    table.rows.push(row);
                }
            }
            Tag::Table(_) => {
                if let Some(table) = self.table.take() {
                    self.blocks.push(Block::Table {
                        header: table.header,
                        rows: table.rows,
                    });
                }
            }
            Tag::Emphasis => self.emphasis = self.emphasis.saturating_sub(1),
            Tag::Strong => self.strong = self.strong.saturating_sub(1),
            Tag::Strikethrough => self.strikethrough = self.strikethrough.saturating_sub(1),
            Tag::Link(..) | Tag::Image(..) => self.link = None,
        }
    }

    fn push_text(&mut self, text: &str, code: bool) {
        if let Some((_, buf)) = self.code.as_mut() {
            buf.push_str(text);
            return;
        }
        if self.leaf.is_none() {
            self.leaf = Some(Leaf::Paragraph);
        }
        let style = Style {
            strong: self.strong > 0,
            emphasis: self.emphasis > 0,
            strikethrough: self.strikethrough > 0,
            code,
        };
        match self.spans.last_mut() {
            Some(last) if last.style == style && last.link == self.link => {
                last.text.push_str(text)
            }
            _ => self.spans.push(Span {
                text: text.to_string(),
                style,
                link: self.link.clone(),
            }),
        }
    }

    fn flush(&mut self) {
        let Some(leaf) = self.leaf.take() else {
            return;
        };
        let text = trim_spans(std::mem::take(&mut self.spans));
        match leaf {
            Leaf::Paragraph if text.is_empty() => {}
            Leaf::Paragraph => self.blocks.push(Block::Paragraph(text)),
            Leaf::Heading(level) => self.blocks.push(Block::Heading { level, text }),
            Leaf::Item {
                number,
                depth,
                checked,
            } => self.blocks.push(Block::ListItem {
                number,
                depth,
                checked,
                text,
            }),
            Leaf::Cell => {
                if let Some(table) = self.table.as_mut() {
                    table.row.push(text);
                }
            }
        }
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush();
        while let Some(outer) = self.quotes.pop() {
            let inner = std::mem::replace(&mut self.blocks, outer);
            self.blocks.push(Block::Quote(inner));
        }
        self.blocks
    }
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Strip outer whitespace from the ends of a block's text; code spans are kept as written.
fn trim_spans(mut spans: Vec<Span>) -> Vec<Span> {
    if let Some(first) = spans.first_mut().filter(|s| !s.style.code) {
        first.text = first.text.trim_start().to_string();
    }
    if let Some(last) = spans.last_mut().filter(|s| !s.style.code) {
        last.text = last.text.trim_end().to_string();
    }
    spans.retain(|s| !s.text.is_empty());
    spans
}
