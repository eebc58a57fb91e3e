//! Backlog ledger library: a markdown task ledger keyed by date and category,
//! the end-of-day carryover state machine, and the merged view consumed when a
//! new daily plan is built.
//! Parsing, formatting and projection stay pure; only `ledger` and `cleanup`
//! touch a `DocumentStore`.

pub mod core {
    use chrono::{NaiveDate, NaiveDateTime};
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::fmt;

    /* ------------------------------ Markers ------------------------------ */

    pub const SECTION_PREFIX: &str = "## ";
    pub const CATEGORY_PREFIX: &str = "### ";
    pub const CARRYOVER_GLYPH: &str = "🔄";
    pub const CARRYOVER_TITLE: &str = "Backlog due from";
    pub const SEPARATOR: &str = "---";
    pub const ORIGIN_LABEL: &str = "*Carried over from:*";
    pub const LAST_UPDATED_KEY: &str = "last_updated:";
    pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";
    pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

    /* ------------------------------ Categories ------------------------------ */

    /// Closed set of task buckets. Declaration order is the canonical render order.
    #[derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    )]
    #[serde(rename_all = "snake_case")]
    pub enum Category {
        Focus,
        Comms,
        Learning,
        Work,
        Email,
        Message,
        Reading,
        Other,
        /// Fallback for keys outside the table.
        #[serde(rename = "tasks")]
        Uncategorized,
    }

    impl Category {
        pub const ALL: [Category; 9] = [
            Category::Focus,
            Category::Comms,
            Category::Learning,
            Category::Work,
            Category::Email,
            Category::Message,
            Category::Reading,
            Category::Other,
            Category::Uncategorized,
        ];

        pub fn key(self) -> &'static str {
            match self {
                Category::Focus => "focus",
                Category::Comms => "comms",
                Category::Learning => "learning",
                Category::Work => "work",
                Category::Email => "email",
                Category::Message => "message",
                Category::Reading => "reading",
                Category::Other => "other",
                Category::Uncategorized => "tasks",
            }
        }

        pub fn glyph(self) -> &'static str {
            match self {
                Category::Focus => "🧠",
                Category::Comms | Category::Message => "💬",
                Category::Learning => "🎓",
                Category::Work => "💼",
                Category::Email => "📧",
                Category::Reading => "📚",
                Category::Other | Category::Uncategorized => "📋",
            }
        }

        pub fn display_name(self) -> &'static str {
            match self {
                Category::Focus => "Focus Work",
                Category::Comms => "Communications",
                Category::Learning => "Learning & Development",
                Category::Work => "Work Tasks",
                Category::Email => "Emails",
                Category::Message => "Messages",
                Category::Reading => "Reading & Learning",
                Category::Other => "Other Tasks",
                Category::Uncategorized => "Tasks",
            }
        }

        /// `### <glyph> <Display Name>`
        pub fn heading(self) -> String {
            format!("{CATEGORY_PREFIX}{} {}", self.glyph(), self.display_name())
        }

        /// Resolve a user-supplied key. Unknown keys fall back to `Uncategorized`.
        pub fn from_key(key: &str) -> Category {
            match key.trim().to_ascii_lowercase().as_str() {
                "focus" => Category::Focus,
                "comms" | "communications" => Category::Comms,
                "learning" => Category::Learning,
                "work" => Category::Work,
                "email" | "emails" => Category::Email,
                "message" | "messages" => Category::Message,
                "reading" => Category::Reading,
                "other" => Category::Other,
                _ => Category::Uncategorized,
            }
        }

        /// Classify the text after `### `. Exact glyph+name pairs win; otherwise
        /// glyphs and well-known words decide, ending in `Other`.
        pub fn from_heading(title: &str) -> Category {
            let title = title.trim();
            for category in Category::ALL {
                if title.strip_prefix(category.glyph()).map(str::trim)
                    == Some(category.display_name())
                {
                    return category;
                }
            }
            if title.contains("📧") || title.contains("Email") {
                Category::Email
            } else if title.contains("🧠") || title.contains("Focus") {
                Category::Focus
            } else if title.contains("Messages") {
                Category::Message
            } else if title.contains("💬") || title.contains("Communications") {
                Category::Comms
            } else if title.contains("💼") || title.contains("Work Tasks") {
                Category::Work
            } else if title.contains("🎓") || title.contains("Learning") {
                Category::Learning
            } else if title.contains("📚") || title.contains("Reading") {
                Category::Reading
            } else {
                Category::Other
            }
        }
    }

    impl fmt::Display for Category {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.key())
        }
    }

    /* ------------------------------- Tasks ------------------------------- */

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum TaskState {
        #[default]
        Open,
        Done,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TaskEntry {
        pub description: String,
        #[serde(default)]
        pub state: TaskState,
        /// Date the task was first scheduled; survives every carryover cycle.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub origin: Option<NaiveDate>,
    }

    impl TaskEntry {
        pub fn open(description: impl Into<String>) -> Self {
            Self {
                description: description.into(),
                state: TaskState::Open,
                origin: None,
            }
        }

        /// Attach an origin unless one is already recorded.
        pub fn with_origin(mut self, origin: NaiveDate) -> Self {
            self.origin.get_or_insert(origin);
            self
        }

        pub fn is_open(&self) -> bool {
            self.state == TaskState::Open
        }
    }

    /// A line inside a category block: either a task or text kept as-is.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Item {
        Task(TaskEntry),
        Note(String),
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct CategoryBlock {
        pub category: Category,
        /// Original heading line when it differs from the canonical one.
        pub heading: Option<String>,
        pub items: Vec<Item>,
    }

    impl CategoryBlock {
        pub fn new(category: Category) -> Self {
            Self {
                category,
                heading: None,
                items: vec![],
            }
        }

        pub fn heading_line(&self) -> String {
            self.heading
                .clone()
                .unwrap_or_else(|| self.category.heading())
        }

        pub fn tasks(&self) -> impl Iterator<Item = &TaskEntry> {
            self.items.iter().filter_map(|item| match item {
                Item::Task(task) => Some(task),
                Item::Note(_) => None,
            })
        }

        pub fn open_tasks(&self) -> impl Iterator<Item = &TaskEntry> {
            self.tasks().filter(|task| task.is_open())
        }

        pub fn push_task(&mut self, task: TaskEntry) {
            self.items.push(Item::Task(task));
        }
    }

    /* ------------------------------ Sections ------------------------------ */

    /// Key of a level-2 section: an ordinary date or a carryover due-from date.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub enum SectionKey {
        Date(NaiveDate),
        Carryover(NaiveDate),
    }

    impl SectionKey {
        pub fn date(&self) -> NaiveDate {
            match self {
                SectionKey::Date(d) | SectionKey::Carryover(d) => *d,
            }
        }

        pub fn is_carryover(&self) -> bool {
            matches!(self, SectionKey::Carryover(_))
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct DateSection {
        pub key: SectionKey,
        /// Lines between the header and the first category (summaries, stray text).
        pub notes: Vec<String>,
        pub categories: Vec<CategoryBlock>,
    }

    impl DateSection {
        pub fn new(key: SectionKey) -> Self {
            Self {
                key,
                notes: vec![],
                categories: vec![],
            }
        }

        /// Build the carryover section stamped at the end of `due_from`.
        /// Tasks without a recorded origin originate on `due_from`.
        pub fn carryover(due_from: NaiveDate, tasks: &CarryoverSet) -> Self {
            let mut section = Self::new(SectionKey::Carryover(due_from));
            let total = tasks.total();
            section.notes.push(format!(
                "*{total} {} carried over from {}*",
                if total == 1 { "task" } else { "tasks" },
                due_from.format("%A")
            ));
            for category in Category::ALL {
                let carried = tasks.get(category);
                if carried.is_empty() {
                    continue;
                }
                let block = section.category_mut_or_insert(category);
                for task in carried {
                    block.push_task(
                        TaskEntry::open(task.description.clone())
                            .with_origin(task.origin.unwrap_or(due_from)),
                    );
                }
            }
            section
        }

        pub fn category(&self, category: Category) -> Option<&CategoryBlock> {
            self.categories.iter().find(|b| b.category == category)
        }

        pub fn category_index_or_insert(&mut self, category: Category) -> usize {
            match self.categories.iter().position(|b| b.category == category) {
                Some(idx) => idx,
                None => {
                    self.categories.push(CategoryBlock::new(category));
                    self.categories.len() - 1
                }
            }
        }

        pub fn category_mut_or_insert(&mut self, category: Category) -> &mut CategoryBlock {
            let idx = self.category_index_or_insert(category);
            &mut self.categories[idx]
        }

        pub fn open_task_count(&self) -> usize {
            self.categories.iter().map(|b| b.open_tasks().count()).sum()
        }
    }

    /// A level-2 section this system did not write; preserved verbatim.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ForeignSection {
        pub heading: String,
        pub lines: Vec<String>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum LedgerSection {
        Dated(DateSection),
        Foreign(ForeignSection),
    }

    /* ------------------------------ Aggregate ------------------------------ */

    /// Aggregate root: the whole backlog document.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct LedgerDocument {
        /// Everything before the first level-2 header, trailing blank lines dropped.
        pub preamble: Vec<String>,
        pub sections: Vec<LedgerSection>,
    }

    impl LedgerDocument {
        /// Fresh document holding only the standard header.
        pub fn bootstrap(now: NaiveDateTime) -> Self {
            let header = format!(
                "---\n\
                 title: Task Backlog\n\
                 description: Tasks scheduled for dates without daily plans yet\n\
                 {LAST_UPDATED_KEY} {}\n\
                 ---\n\
                 \n\
                 # Task Backlog\n\
                 \n\
                 Tasks added for future dates are stored here until their daily plans are created.\n\
                 \n\
                 When a daily plan is built for a date, its tasks and any pending carryover are moved into that plan.\n\
                 \n\
                 {SEPARATOR}",
                now.format(TIMESTAMP_FORMAT)
            );
            Self {
                preamble: header.lines().map(str::to_string).collect(),
                sections: vec![],
            }
        }

        pub fn dated_sections(&self) -> impl Iterator<Item = &DateSection> {
            self.sections.iter().filter_map(|s| match s {
                LedgerSection::Dated(d) => Some(d),
                LedgerSection::Foreign(_) => None,
            })
        }

        pub fn carryover_sections(&self) -> impl Iterator<Item = &DateSection> {
            self.dated_sections().filter(|s| s.key.is_carryover())
        }

        pub fn section(&self, key: &SectionKey) -> Option<&DateSection> {
            self.dated_sections().find(|s| s.key == *key)
        }

        fn position(&self, key: &SectionKey) -> Option<usize> {
            self.sections
                .iter()
                .position(|s| matches!(s, LedgerSection::Dated(d) if d.key == *key))
        }

        /// Existing section for `key`, or a new one appended at the end.
        pub fn section_mut_or_insert(&mut self, key: SectionKey) -> &mut DateSection {
            let idx = match self.position(&key) {
                Some(idx) => idx,
                None => {
                    self.sections
                        .push(LedgerSection::Dated(DateSection::new(key)));
                    self.sections.len() - 1
                }
            };
            let LedgerSection::Dated(section) = &mut self.sections[idx] else {
                unreachable!("position only matches dated sections");
            };
            section
        }

        pub fn remove_section(&mut self, key: &SectionKey) -> bool {
            match self.position(key) {
                Some(idx) => {
                    self.sections.remove(idx);
                    true
                }
                None => false,
            }
        }

        /// Drop every carryover section, returning how many were removed.
        pub fn remove_carryover_sections(&mut self) -> usize {
            let before = self.sections.len();
            self.sections
                .retain(|s| !matches!(s, LedgerSection::Dated(d) if d.key.is_carryover()));
            before - self.sections.len()
        }

        /// Open task descriptions of one section, grouped by category in document order.
        pub fn open_tasks(&self, key: &SectionKey) -> IndexMap<Category, Vec<String>> {
            let mut out = IndexMap::new();
            if let Some(section) = self.section(key) {
                for block in &section.categories {
                    let entry: &mut Vec<String> = out.entry(block.category).or_default();
                    entry.extend(block.open_tasks().map(|t| t.description.clone()));
                }
            }
            out
        }

        /// Rewrite every `last_updated:` line of the header. Returns false when
        /// the header carries no such field.
        pub fn stamp(&mut self, now: NaiveDateTime) -> bool {
            let stamp = format!("{LAST_UPDATED_KEY} {}", now.format(TIMESTAMP_FORMAT));
            let mut touched = false;
            for line in &mut self.preamble {
                if line.starts_with(LAST_UPDATED_KEY) {
                    *line = stamp.clone();
                    touched = true;
                }
            }
            touched
        }

        pub fn last_updated(&self) -> Option<NaiveDateTime> {
            self.preamble.iter().find_map(|line| {
                let value = line.strip_prefix(LAST_UPDATED_KEY)?.trim();
                NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).ok()
            })
        }
    }

    /* ------------------------------ Carryover ------------------------------ */

    /// A task lifted out of a daily plan, with the origin it already carried (if any).
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CarriedTask {
        pub description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub origin: Option<NaiveDate>,
    }

    /// Category → carried tasks, in the order they were found.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct CarryoverSet {
        by_category: IndexMap<Category, Vec<CarriedTask>>,
    }

    impl CarryoverSet {
        pub fn push(&mut self, category: Category, task: CarriedTask) {
            self.by_category.entry(category).or_default().push(task);
        }

        pub fn get(&self, category: Category) -> &[CarriedTask] {
            self.by_category
                .get(&category)
                .map(Vec::as_slice)
                .unwrap_or(&[])
        }

        pub fn total(&self) -> usize {
            self.by_category.values().map(Vec::len).sum()
        }

        pub fn is_empty(&self) -> bool {
            self.total() == 0
        }

        pub fn iter(&self) -> impl Iterator<Item = (Category, &[CarriedTask])> {
            self.by_category
                .iter()
                .map(|(category, tasks)| (*category, tasks.as_slice()))
        }
    }

}

pub mod error {
    //! Error taxonomy shared by every operation.

    use std::path::{Path, PathBuf};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ErrorKind {
        ParseFailure,
        IoFailure,
        DateFormatFailure,
    }

    #[derive(Debug, thiserror::Error)]
    pub enum LedgerError {
        #[error("failed to {action} {path:?}")]
        Io {
            action: &'static str,
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("malformed {what}: {detail}")]
        Parse { what: &'static str, detail: String },
        #[error("invalid date {input:?}: expected YYYY-MM-DD or a relative day name")]
        DateFormat { input: String },
    }

    impl LedgerError {
        pub fn kind(&self) -> ErrorKind {
            match self {
                LedgerError::Io { .. } => ErrorKind::IoFailure,
                LedgerError::Parse { .. } => ErrorKind::ParseFailure,
                LedgerError::DateFormat { .. } => ErrorKind::DateFormatFailure,
            }
        }

        pub(crate) fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
            LedgerError::Io {
                action,
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub type Result<T> = std::result::Result<T, LedgerError>;
}

pub mod codec {
    //! Task Line Codec: the textual form of single entries and section headers.
    //!
    //! Accepted task spellings: `- [ ] text`, `- [x] text`, `1. [ ] text`.
    //! Annotation: `  - *Carried over from:* YYYY-MM-DD`.

    use crate::core::*;
    use chrono::NaiveDate;
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_till, take_while_m_n},
        character::complete::{char, digit1, one_of, space0, space1},
        combinator::{all_consuming, map, map_res, opt, recognize, value},
        error::VerboseError,
        sequence::{delimited, preceded, tuple},
    };

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /// A decoded task line. `text` is the raw body after the checkbox, trimmed.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TaskLine {
        pub state: TaskState,
        pub text: String,
        pub numbered: bool,
    }

    /* ------------------------------ Encoding ------------------------------ */

    /// One line, or two when an origin is recorded. No trailing newline.
    pub fn encode_task(entry: &TaskEntry) -> String {
        let mark = match entry.state {
            TaskState::Open => ' ',
            TaskState::Done => 'x',
        };
        let mut out = format!("- [{mark}] {}", entry.description);
        if let Some(origin) = entry.origin {
            out.push('\n');
            out.push_str(&encode_origin_annotation(origin));
        }
        out
    }

    pub fn encode_origin_annotation(origin: NaiveDate) -> String {
        format!("  - {ORIGIN_LABEL} {}", origin.format(ISO_DATE_FORMAT))
    }

    pub fn encode_section_header(key: &SectionKey) -> String {
        match key {
            SectionKey::Date(d) => format!(
                "{SECTION_PREFIX}{} ({})",
                d.format(ISO_DATE_FORMAT),
                d.format("%A")
            ),
            SectionKey::Carryover(d) => format!(
                "{SECTION_PREFIX}{CARRYOVER_GLYPH} {CARRYOVER_TITLE} {} ({})",
                d.format(ISO_DATE_FORMAT),
                d.format("%A")
            ),
        }
    }

    /* ------------------------------ Decoding ------------------------------ */

    pub fn parse_task_line(line: &str) -> Option<TaskLine> {
        let (rest, (numbered, state)) = task_marker(line.trim()).ok()?;
        Some(TaskLine {
            state,
            text: rest.trim().to_string(),
            numbered,
        })
    }

    /// Strict: `- *Carried over from:* YYYY-MM-DD` after leading whitespace.
    /// Anything else, including impossible dates, yields `None`.
    pub fn parse_origin_annotation(line: &str) -> Option<NaiveDate> {
        origin_annotation(line.trim_start())
            .ok()
            .map(|(_, date)| date)
    }

    /// `## YYYY-MM-DD (Weekday)` or `## 🔄 Backlog due from YYYY-MM-DD (Weekday)`.
    /// The weekday label is informational and not validated.
    pub fn parse_section_header(line: &str) -> Option<SectionKey> {
        all_consuming(section_header)(line.trim_end())
            .ok()
            .map(|(_, key)| key)
    }

    pub fn parse_iso_date(input: &str) -> Option<NaiveDate> {
        all_consuming(iso_date)(input.trim())
            .ok()
            .map(|(_, date)| date)
    }

    /// Drop `**bold**` markers and keep only the first line.
    pub fn clean_description(text: &str) -> String {
        let first = text.lines().next().unwrap_or("");
        strip_bold(first).trim().to_string()
    }

    pub fn is_separator(line: &str) -> bool {
        let t = line.trim();
        t.len() >= 3 && t.chars().all(|c| c == '-')
    }

    fn strip_bold(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        let mut rest = s;
        while let Some(open) = rest.find("**") {
            let after = &rest[open + 2..];
            let Some(close) = after.find("**") else {
                break;
            };
            out.push_str(&rest[..open]);
            out.push_str(&after[..close]);
            rest = &after[close + 2..];
        }
        out.push_str(rest);
        out
    }

    /* ---------------------------- Combinators ---------------------------- */

    fn iso_date(i: &str) -> PResult<'_, NaiveDate> {
        map_res(
            recognize(tuple((
                take_while_m_n(4, 4, |c: char| c.is_ascii_digit()),
                char('-'),
                take_while_m_n(2, 2, |c: char| c.is_ascii_digit()),
                char('-'),
                take_while_m_n(2, 2, |c: char| c.is_ascii_digit()),
            ))),
            |s: &str| NaiveDate::parse_from_str(s, ISO_DATE_FORMAT),
        )(i)
    }

    fn checkbox(i: &str) -> PResult<'_, TaskState> {
        delimited(
            char('['),
            alt((
                value(TaskState::Done, delimited(space0, one_of("xX"), space0)),
                value(TaskState::Open, space0),
            )),
            char(']'),
        )(i)
    }

    fn task_marker(i: &str) -> PResult<'_, (bool, TaskState)> {
        alt((
            map(preceded(tuple((char('-'), space1)), checkbox), |s| (false, s)),
            map(
                preceded(tuple((digit1, char('.'), space0)), checkbox),
                |s| (true, s),
            ),
        ))(i)
    }

    fn origin_annotation(i: &str) -> PResult<'_, NaiveDate> {
        preceded(
            tuple((char('-'), space0, tag(ORIGIN_LABEL), space0)),
            iso_date,
        )(i)
    }

    fn section_header(i: &str) -> PResult<'_, SectionKey> {
        map(
            tuple((
                tag(SECTION_PREFIX),
                opt(tuple((
                    tag(CARRYOVER_GLYPH),
                    space1,
                    tag(CARRYOVER_TITLE),
                    space1,
                ))),
                iso_date,
                opt(tuple((
                    space1,
                    delimited(char('('), take_till(|c: char| c == ')'), char(')')),
                ))),
                space0,
            )),
            |(_, carry, date, _, _)| match carry {
                Some(_) => SectionKey::Carryover(date),
                None => SectionKey::Date(date),
            },
        )(i)
    }

}

pub mod index {
    //! Section Index: byte spans of structural regions, found by scanning marker lines.
    //!
    //! Date and carryover sections both open with a level-2 marker and are siblings;
    //! a category span ends at the next `###`, the `---` separator, or its section end.

    use crate::codec::{is_separator, parse_section_header};
    use crate::core::*;
    use chrono::NaiveDate;

    /// Half-open byte range `[start, end)`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Span {
        pub start: usize,
        pub end: usize,
    }

    impl Span {
        pub fn slice<'a>(&self, text: &'a str) -> &'a str {
            &text[self.start..self.end]
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionQuery {
        pub key: SectionKey,
        pub category: Option<Category>,
    }

    impl SectionQuery {
        pub fn date(date: NaiveDate) -> Self {
            Self {
                key: SectionKey::Date(date),
                category: None,
            }
        }

        pub fn carryover(date: NaiveDate) -> Self {
            Self {
                key: SectionKey::Carryover(date),
                category: None,
            }
        }

        pub fn with_category(mut self, category: Category) -> Self {
            self.category = Some(category);
            self
        }
    }

    /// One level-2 section. `key` is `None` for headers this system did not write.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SectionSpan {
        pub key: Option<SectionKey>,
        pub heading: String,
        pub span: Span,
    }

    pub fn is_level2_marker(line: &str) -> bool {
        line.starts_with(SECTION_PREFIX)
    }

    pub fn is_level3_marker(line: &str) -> bool {
        line.starts_with(CATEGORY_PREFIX)
    }

    /// Lines with the byte offset they start at; line endings stripped.
    pub fn lines_with_offsets(text: &str) -> impl Iterator<Item = (usize, &str)> + '_ {
        let mut offset = 0;
        text.split_inclusive('\n').map(move |raw| {
            let start = offset;
            offset += raw.len();
            (start, raw.trim_end_matches(['\n', '\r']))
        })
    }

    /// Offset of the first level-2 marker, or the text length.
    pub fn preamble_end(text: &str) -> usize {
        lines_with_offsets(text)
            .find(|(_, line)| is_level2_marker(line))
            .map(|(offset, _)| offset)
            .unwrap_or(text.len())
    }

    pub fn level2_spans(text: &str) -> Vec<SectionSpan> {
        let starts: Vec<(usize, &str)> = lines_with_offsets(text)
            .filter(|(_, line)| is_level2_marker(line))
            .collect();
        starts
            .iter()
            .enumerate()
            .map(|(i, (start, line))| {
                let end = starts.get(i + 1).map(|(s, _)| *s).unwrap_or(text.len());
                SectionSpan {
                    key: parse_section_header(line),
                    heading: line.to_string(),
                    span: Span { start: *start, end },
                }
            })
            .collect()
    }

    /// Span of the section (or category within it) named by `query`; `None` when absent.
    pub fn locate(text: &str, query: &SectionQuery) -> Option<Span> {
        let section = level2_spans(text)
            .into_iter()
            .find(|s| s.key == Some(query.key))?
            .span;
        match query.category {
            None => Some(section),
            Some(category) => locate_category(text, section, category),
        }
    }

    fn locate_category(text: &str, section: Span, category: Category) -> Option<Span> {
        let mut start = None;
        for (offset, line) in lines_with_offsets(section.slice(text)) {
            let at = section.start + offset;
            match start {
                Some(s) => {
                    if is_level3_marker(line) || is_separator(line) {
                        return Some(Span { start: s, end: at });
                    }
                }
                None => {
                    if let Some(title) = line.strip_prefix(CATEGORY_PREFIX) {
                        if Category::from_heading(title) == category {
                            start = Some(at);
                        }
                    }
                }
            }
        }
        start.map(|s| Span {
            start: s,
            end: section.end,
        })
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const DOC: &str = "# Backlog\n\n---\n\n\
## 🔄 Backlog due from 2026-02-09 (Monday)\n\n\
### 🧠 Focus Work\n- [ ] Think\n  - *Carried over from:* 2026-02-09\n\n---\n\n\
## 2026-02-10 (Tuesday)\n\n\
### 📧 Emails\n- [ ] Reply to Bob\n\n\
### 💼 Work Tasks\n- [ ] Ship\n\n---\n";

        fn date(y: i32, m: u32, d: u32) -> NaiveDate {
            NaiveDate::from_ymd_opt(y, m, d).unwrap()
        }

        #[test]
        fn carryover_and_date_sections_are_siblings() {
            let spans = level2_spans(DOC);
            assert_eq!(spans.len(), 2);
            assert_eq!(spans[0].key, Some(SectionKey::Carryover(date(2026, 2, 9))));
            assert_eq!(spans[1].key, Some(SectionKey::Date(date(2026, 2, 10))));
            assert_eq!(spans[0].span.end, spans[1].span.start);
            assert_eq!(preamble_end(DOC), spans[0].span.start);
        }

        #[test]
        fn locate_date_section_runs_to_end_of_document() {
            let span = locate(DOC, &SectionQuery::date(date(2026, 2, 10))).unwrap();
            let text = span.slice(DOC);
            assert!(text.starts_with("## 2026-02-10 (Tuesday)"));
            assert!(text.ends_with("---\n"));
            assert_eq!(span.end, DOC.len());
        }

        #[test]
        fn locate_category_stops_at_next_category_or_separator() {
            let q = SectionQuery::date(date(2026, 2, 10));
            let email = locate(DOC, &q.with_category(Category::Email)).unwrap();
            assert_eq!(email.slice(DOC), "### 📧 Emails\n- [ ] Reply to Bob\n\n");
            let work = locate(DOC, &q.with_category(Category::Work)).unwrap();
            assert_eq!(work.slice(DOC), "### 💼 Work Tasks\n- [ ] Ship\n\n");
        }

        #[test]
        fn absent_keys_are_not_found() {
            assert!(locate(DOC, &SectionQuery::date(date(2026, 2, 9))).is_none());
            assert!(locate(DOC, &SectionQuery::carryover(date(2026, 2, 10))).is_none());
            let q = SectionQuery::date(date(2026, 2, 10)).with_category(Category::Reading);
            assert!(locate(DOC, &q).is_none());
        }
    }
}

pub mod parser {
    //! Ledger text → `LedgerDocument`. Never fails: content that is not a known
    //! marker is kept as notes or foreign sections so formatting loses nothing.

    use crate::codec::{is_separator, parse_origin_annotation, parse_task_line};
    use crate::core::*;
    use crate::index::{self, SectionSpan};
    use tracing::{debug, warn};

    pub fn parse_ledger(text: &str) -> LedgerDocument {
        let mut doc = LedgerDocument {
            preamble: trimmed_lines(&text[..index::preamble_end(text)]),
            sections: vec![],
        };

        for SectionSpan { key, heading, span } in index::level2_spans(text) {
            let body: Vec<&str> = span.slice(text).lines().skip(1).collect();
            match key {
                Some(key) => merge_section(&mut doc, parse_date_section(key, &body)),
                None => {
                    debug!("keeping unrecognized section {heading:?} verbatim");
                    doc.sections.push(LedgerSection::Foreign(ForeignSection {
                        heading,
                        lines: trim_trailing_blank(body.iter().map(|l| l.to_string()).collect()),
                    }));
                }
            }
        }
        doc
    }

    fn parse_date_section(key: SectionKey, lines: &[&str]) -> DateSection {
        let mut section = DateSection::new(key);
        let mut current: Option<usize> = None;
        let mut last_was_task = false;

        for line in lines {
            let line = line.trim_end();
            if line.trim().is_empty() || is_separator(line) {
                last_was_task = false;
                continue;
            }

            if let Some(title) = line.strip_prefix(CATEGORY_PREFIX) {
                let category = Category::from_heading(title);
                let idx = section.category_index_or_insert(category);
                let block = &mut section.categories[idx];
                if block.items.is_empty() && line != category.heading() {
                    block.heading = Some(line.to_string());
                }
                current = Some(idx);
                last_was_task = false;
                continue;
            }

            if let (Some(idx), true) = (current, last_was_task) {
                if let Some(origin) = parse_origin_annotation(line) {
                    if let Some(Item::Task(task)) = section.categories[idx].items.last_mut() {
                        task.origin.get_or_insert(origin);
                    }
                    last_was_task = false;
                    continue;
                }
            }

            let parsed = parse_task_line(line);
            match current {
                Some(idx) => {
                    let block = &mut section.categories[idx];
                    match parsed {
                        Some(task) => {
                            block.push_task(TaskEntry {
                                description: task.text,
                                state: task.state,
                                origin: None,
                            });
                            last_was_task = true;
                        }
                        None => {
                            block.items.push(Item::Note(line.to_string()));
                            last_was_task = false;
                        }
                    }
                }
                None => {
                    if parsed.is_some() {
                        debug!(line, "task before any category marker; kept as a note");
                    }
                    section.notes.push(line.to_string());
                    last_was_task = false;
                }
            }
        }
        section
    }

    /// Keep one section per key: a repeated key folds into the first occurrence.
    fn merge_section(doc: &mut LedgerDocument, parsed: DateSection) {
        if doc.section(&parsed.key).is_none() {
            doc.sections.push(LedgerSection::Dated(parsed));
            return;
        }
        warn!(key = ?parsed.key, "duplicate section merged into first occurrence");
        let target = doc.section_mut_or_insert(parsed.key);
        target.notes.extend(parsed.notes);
        for block in parsed.categories {
            target
                .category_mut_or_insert(block.category)
                .items
                .extend(block.items);
        }
    }

    fn trimmed_lines(text: &str) -> Vec<String> {
        trim_trailing_blank(text.lines().map(str::to_string).collect())
    }

    fn trim_trailing_blank(mut lines: Vec<String>) -> Vec<String> {
        while lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }
        lines
    }

}

pub mod format {
    use crate::codec::{encode_section_header, encode_task};
    use crate::core::*;

    /// Canonical text: preamble, then each section preceded by a blank line and
    /// closed by `---`. Always newline-terminated; an empty document is `"\n"`.
    pub fn format_ledger(doc: &LedgerDocument) -> String {
        let mut out = String::new();
        for line in &doc.preamble {
            out.push_str(line);
            out.push('\n');
        }
        for section in &doc.sections {
            if !out.is_empty() {
                out.push('\n');
            }
            match section {
                LedgerSection::Dated(s) => format_date_section(&mut out, s),
                LedgerSection::Foreign(f) => {
                    out.push_str(&f.heading);
                    out.push('\n');
                    for line in &f.lines {
                        out.push_str(line);
                        out.push('\n');
                    }
                }
            }
        }
        if out.is_empty() {
            out.push('\n');
        }
        out
    }

    pub fn format_date_section(out: &mut String, section: &DateSection) {
        out.push_str(&encode_section_header(&section.key));
        out.push_str("\n\n");
        if !section.notes.is_empty() {
            for note in &section.notes {
                out.push_str(note);
                out.push('\n');
            }
            out.push('\n');
        }
        for block in &section.categories {
            out.push_str(&block.heading_line());
            out.push('\n');
            for item in &block.items {
                match item {
                    Item::Task(task) => out.push_str(&encode_task(task)),
                    Item::Note(note) => out.push_str(note),
                }
                out.push('\n');
            }
            out.push('\n');
        }
        out.push_str(SEPARATOR);
        out.push('\n');
    }

    /// Collapse runs of three or more newlines into a single blank line.
    pub fn collapse_blank_runs(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut newlines = 0;
        for ch in text.chars() {
            if ch == '\n' {
                newlines += 1;
                if newlines > 2 {
                    continue;
                }
            } else {
                newlines = 0;
            }
            out.push(ch);
        }
        out
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::parser::parse_ledger;
        use chrono::NaiveDate;

        #[test]
        fn formats_new_section_in_canonical_layout() {
            let mut doc = LedgerDocument {
                preamble: vec!["# Task Backlog".into(), "".into(), "---".into()],
                sections: vec![],
            };
            let d = NaiveDate::from_ymd_opt(2026, 2, 10).unwrap();
            doc.section_mut_or_insert(SectionKey::Date(d))
                .category_mut_or_insert(Category::Email)
                .push_task(TaskEntry::open("Reply to Bob"));
            let expected = "# Task Backlog\n\n---\n\n## 2026-02-10 (Tuesday)\n\n### 📧 Emails\n- [ ] Reply to Bob\n\n---\n";
            assert_eq!(format_ledger(&doc), expected);
        }

        #[test]
        fn formatter_round_trips_canonical_text() {
            let input = "---\ntitle: Task Backlog\nlast_updated: 2026-02-01 08:00\n---\n\n\
## 2026-02-10 (Tuesday)\n\n### 📧 Emails\n- [ ] Reply to Bob\n- [x] Archive\n\n\
### 📚 Reading & Learning\n- [ ] Paper\nsee link above\n\n---\n\n\
## 🔄 Backlog due from 2026-02-11 (Wednesday)\n\n*1 task carried over from Wednesday*\n\n\
### 💼 Work Tasks\n- [ ] Ship\n  - *Carried over from:* 2026-02-01\n\n---\n";
            let doc = parse_ledger(input);
            assert_eq!(format_ledger(&doc), input);
            assert_eq!(parse_ledger(&format_ledger(&doc)), doc);
        }

        #[test]
        fn empty_document_still_ends_with_newline() {
            assert_eq!(format_ledger(&LedgerDocument::default()), "\n");
            assert_eq!(format_ledger(&parse_ledger("\n")), "\n");
        }

        #[test]
        fn collapses_long_blank_runs_only() {
            assert_eq!(collapse_blank_runs("a\n\n\n\nb\n"), "a\n\nb\n");
            assert_eq!(collapse_blank_runs("a\n\nb\n"), "a\n\nb\n");
        }
    }
}

pub mod storage {
    //! Persistence and time seams. Implementations read and write whole documents.

    use crate::error::{LedgerError, Result};
    use chrono::{Local, NaiveDate, NaiveDateTime};
    use std::{fs, io, path::Path};

    pub trait DocumentStore {
        /// `Ok(None)` when the document does not exist.
        fn read(&self, path: &Path) -> Result<Option<String>>;

        /// Replace the document, creating parent directories as needed.
        fn write(&self, path: &Path, text: &str) -> Result<()>;
    }

    /// Plain filesystem store. Writes are not crash-atomic.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct FsStore;

    impl DocumentStore for FsStore {
        fn read(&self, path: &Path) -> Result<Option<String>> {
            match fs::read_to_string(path) {
                Ok(text) => Ok(Some(text)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(LedgerError::io("read", path, e)),
            }
        }

        fn write(&self, path: &Path, text: &str) -> Result<()> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .map_err(|e| LedgerError::io("create directory", parent, e))?;
            }
            fs::write(path, text).map_err(|e| LedgerError::io("write", path, e))
        }
    }

    pub trait Clock {
        fn now(&self) -> NaiveDateTime;

        fn today(&self) -> NaiveDate {
            self.now().date()
        }
    }

    #[derive(Debug, Default, Clone, Copy)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> NaiveDateTime {
            Local::now().naive_local()
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FixedClock(pub NaiveDateTime);

    impl Clock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            self.0
        }
    }


}

pub mod config {
    //! Optional `<root>/.backlog.toml`. Every field has a default.

    use crate::error::{LedgerError, Result};
    use chrono::NaiveDate;
    use serde::Deserialize;
    use std::{
        fs, io,
        path::{Path, PathBuf},
    };

    pub const CONFIG_FILE: &str = ".backlog.toml";

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    pub struct BacklogConfig {
        /// Ledger location relative to the root.
        pub ledger_file: PathBuf,
        /// Daily plans live at `<plans_dir>/YYYY/MM/YYYY-MM-DD.md`.
        pub plans_dir: PathBuf,
    }

    impl Default for BacklogConfig {
        fn default() -> Self {
            Self {
                ledger_file: PathBuf::from("DailyPlans").join("backlog.md"),
                plans_dir: PathBuf::from("DailyPlans"),
            }
        }
    }

    impl BacklogConfig {
        pub fn load(root: &Path) -> Result<Self> {
            let path = root.join(CONFIG_FILE);
            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
                Err(e) => return Err(LedgerError::io("read", &path, e)),
            };
            toml::from_str(&text).map_err(|e| LedgerError::Parse {
                what: "config",
                detail: format!("{}: {e}", path.display()),
            })
        }

        pub fn ledger_path(&self, root: &Path) -> PathBuf {
            root.join(&self.ledger_file)
        }

        pub fn plan_path(&self, root: &Path, date: NaiveDate) -> PathBuf {
            root.join(&self.plans_dir)
                .join(date.format("%Y").to_string())
                .join(date.format("%m").to_string())
                .join(format!("{}.md", date.format("%Y-%m-%d")))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::error::ErrorKind;

        #[test]
        fn missing_file_yields_defaults() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let config = BacklogConfig::load(tmp.path()).expect("load");
            assert_eq!(config, BacklogConfig::default());
            assert_eq!(
                config.ledger_path(tmp.path()),
                tmp.path().join("DailyPlans/backlog.md")
            );
        }

        #[test]
        fn partial_file_overrides_fields() {
            let tmp = tempfile::tempdir().expect("tempdir");
            fs::write(tmp.path().join(CONFIG_FILE), "plans_dir = \"Plans\"\n").expect("write");
            let config = BacklogConfig::load(tmp.path()).expect("load");
            assert_eq!(config.plans_dir, PathBuf::from("Plans"));
            assert_eq!(config.ledger_file, PathBuf::from("DailyPlans/backlog.md"));
            let date = NaiveDate::from_ymd_opt(2026, 2, 10).unwrap();
            assert_eq!(
                config.plan_path(tmp.path(), date),
                tmp.path().join("Plans/2026/02/2026-02-10.md")
            );
        }

        #[test]
        fn malformed_file_is_a_parse_failure() {
            let tmp = tempfile::tempdir().expect("tempdir");
            fs::write(tmp.path().join(CONFIG_FILE), "vault = 3\n").expect("write");
            let err = BacklogConfig::load(tmp.path()).expect_err("unknown field");
            assert_eq!(err.kind(), ErrorKind::ParseFailure);
        }
    }
}

pub mod dates {
    //! Resolves the date phrases people type: `today`, `tomorrow`, weekday names,
    //! ISO dates and month/day forms such as `may 5` or `5th may`.

    use crate::codec::parse_iso_date;
    use crate::error::{LedgerError, Result};
    use chrono::{Datelike, Days, NaiveDate, Weekday};

    pub trait DateResolver {
        fn resolve(&self, input: &str) -> Result<NaiveDate>;
    }

    /// Resolves relative phrases against a fixed `today`.
    #[derive(Debug, Clone, Copy)]
    pub struct NaturalDates {
        today: NaiveDate,
    }

    impl NaturalDates {
        pub fn new(today: NaiveDate) -> Self {
            Self { today }
        }
    }

    impl DateResolver for NaturalDates {
        fn resolve(&self, input: &str) -> Result<NaiveDate> {
            let text = input.trim().to_lowercase();
            let resolved = match text.as_str() {
                "today" => Some(self.today),
                "tomorrow" => self.today.checked_add_days(Days::new(1)),
                other => weekday_from_name(other)
                    .and_then(|weekday| next_weekday(self.today, weekday))
                    .or_else(|| parse_iso_date(other))
                    .or_else(|| month_day(other, self.today)),
            };
            resolved.ok_or_else(|| LedgerError::DateFormat {
                input: input.to_string(),
            })
        }
    }

    /// Strict `YYYY-MM-DD`, for commands that take no relative phrases.
    pub fn parse_date_arg(input: &str) -> Result<NaiveDate> {
        parse_iso_date(input).ok_or_else(|| LedgerError::DateFormat {
            input: input.to_string(),
        })
    }

    /// Next occurrence strictly after `today`; the same weekday means a week out.
    fn next_weekday(today: NaiveDate, weekday: Weekday) -> Option<NaiveDate> {
        let current = today.weekday().num_days_from_monday();
        let target = weekday.num_days_from_monday();
        let ahead = match (target + 7 - current) % 7 {
            0 => 7,
            n => n,
        };
        today.checked_add_days(Days::new(u64::from(ahead)))
    }

    /// Month + day in either order; a date already behind `today` rolls to next year.
    fn month_day(text: &str, today: NaiveDate) -> Option<NaiveDate> {
        let mut month = None;
        let mut day = None;
        for token in text
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
        {
            let token = strip_ordinal(token);
            if token.chars().all(|c| c.is_ascii_digit()) {
                if token.len() <= 2 {
                    day = token.parse::<u32>().ok();
                }
            } else if let Some(m) = month_from_name(token) {
                month = Some(m);
            }
        }
        let (month, day) = (month?, day?);
        let candidate = NaiveDate::from_ymd_opt(today.year(), month, day)?;
        if candidate < today {
            NaiveDate::from_ymd_opt(today.year() + 1, month, day)
        } else {
            Some(candidate)
        }
    }

    fn strip_ordinal(token: &str) -> &str {
        for suffix in ["st", "nd", "rd", "th"] {
            if let Some(digits) = token.strip_suffix(suffix) {
                if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                    return digits;
                }
            }
        }
        token
    }

    fn weekday_from_name(name: &str) -> Option<Weekday> {
        Some(match name {
            "monday" | "mon" => Weekday::Mon,
            "tuesday" | "tue" | "tues" => Weekday::Tue,
            "wednesday" | "wed" => Weekday::Wed,
            "thursday" | "thu" | "thurs" => Weekday::Thu,
            "friday" | "fri" => Weekday::Fri,
            "saturday" | "sat" => Weekday::Sat,
            "sunday" | "sun" => Weekday::Sun,
            _ => return None,
        })
    }

    fn month_from_name(name: &str) -> Option<u32> {
        Some(match name {
            "jan" | "january" => 1,
            "feb" | "february" => 2,
            "mar" | "march" => 3,
            "apr" | "april" => 4,
            "may" => 5,
            "jun" | "june" => 6,
            "jul" | "july" => 7,
            "aug" | "august" => 8,
            "sep" | "sept" | "september" => 9,
            "oct" | "october" => 10,
            "nov" | "november" => 11,
            "dec" | "december" => 12,
            _ => return None,
        })
    }

}

pub mod ledger {
    //! Ledger Mutator. Each operation reads the document once, edits the tree and
    //! writes once; a missing document is bootstrapped with the standard header.

    use crate::config::BacklogConfig;
    use crate::core::*;
    use crate::error::{LedgerError, Result};
    use crate::format::{collapse_blank_runs, format_ledger};
    use crate::parser::parse_ledger;
    use crate::storage::{Clock, DocumentStore, FsStore, SystemClock};
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use std::path::{Path, PathBuf};
    use tracing::{debug, info, warn};

    /// Result of appending a carryover section.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum StampOutcome {
        Stamped { count: usize },
        /// Nothing to carry; the ledger was not touched.
        Empty,
        /// A section for this due-from date exists; the ledger was not touched.
        AlreadyPresent,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConsumeReport {
        pub date_section_removed: bool,
        pub carryover_sections_removed: usize,
    }

    pub struct BacklogLedger<S = FsStore, C = SystemClock> {
        path: PathBuf,
        store: S,
        clock: C,
    }

    impl BacklogLedger {
        pub fn open(root: &Path, config: &BacklogConfig) -> Self {
            Self::with_parts(config.ledger_path(root), FsStore, SystemClock)
        }
    }

    impl<S: DocumentStore, C: Clock> BacklogLedger<S, C> {
        pub fn with_parts(path: PathBuf, store: S, clock: C) -> Self {
            Self { path, store, clock }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        pub fn store(&self) -> &S {
            &self.store
        }

        pub fn clock(&self) -> &C {
            &self.clock
        }

        /// Bootstrap. Returns true when the document was created.
        pub fn ensure_exists(&self) -> Result<bool> {
            let (_, fresh) = self.load()?;
            if fresh {
                self.persist_bootstrap()?;
            }
            Ok(fresh)
        }

        /// Parsed snapshot of the ledger.
        pub fn document(&self) -> Result<LedgerDocument> {
            let (doc, fresh) = self.load()?;
            if fresh {
                self.persist_bootstrap()?;
            }
            Ok(doc)
        }

        pub fn add_task(&self, date: NaiveDate, category: Category, text: &str) -> Result<()> {
            let text = single_line(text);
            if text.is_empty() {
                return Err(LedgerError::Parse {
                    what: "task",
                    detail: "task text is empty".into(),
                });
            }
            let (mut doc, _) = self.load()?;
            doc.section_mut_or_insert(SectionKey::Date(date))
                .category_mut_or_insert(category)
                .push_task(TaskEntry::open(text));
            self.save(&mut doc, false)?;
            info!(%date, %category, "task added to backlog");
            Ok(())
        }

        pub fn tasks_for_date(&self, date: NaiveDate) -> Result<IndexMap<Category, Vec<String>>> {
            Ok(self.document()?.open_tasks(&SectionKey::Date(date)))
        }

        /// Returns false when there was no section for `date` (still a success).
        pub fn remove_tasks_for_date(&self, date: NaiveDate) -> Result<bool> {
            self.remove_section(SectionKey::Date(date))
        }

        /// Returns false when there was no carryover section due from `date`.
        pub fn remove_carryover_section(&self, date: NaiveDate) -> Result<bool> {
            self.remove_section(SectionKey::Carryover(date))
        }

        /// Drop every carryover section in one pass. Always rewrites the document.
        pub fn remove_all_carryover_sections(&self) -> Result<usize> {
            let (mut doc, _) = self.load()?;
            let removed = doc.remove_carryover_sections();
            self.save(&mut doc, true)?;
            if removed > 0 {
                info!(removed, "carryover sections removed");
            }
            Ok(removed)
        }

        /// Append the carryover section for `due_from`.
        pub fn stamp_carryover(
            &self,
            due_from: NaiveDate,
            tasks: &crate::core::CarryoverSet,
        ) -> Result<StampOutcome> {
            if tasks.is_empty() {
                debug!(%due_from, "no tasks to carry over");
                return Ok(StampOutcome::Empty);
            }
            let (mut doc, fresh) = self.load()?;
            if doc.section(&SectionKey::Carryover(due_from)).is_some() {
                warn!(%due_from, "carryover section already exists");
                if fresh {
                    self.persist_bootstrap()?;
                }
                return Ok(StampOutcome::AlreadyPresent);
            }
            doc.sections
                .push(LedgerSection::Dated(DateSection::carryover(due_from, tasks)));
            self.save(&mut doc, false)?;
            let count = tasks.total();
            info!(%due_from, count, "carryover stamped");
            Ok(StampOutcome::Stamped { count })
        }

        /// Remove the section for `date` and every carryover section together,
        /// once those tasks have been moved into a new daily plan.
        pub fn consume(&self, date: NaiveDate) -> Result<ConsumeReport> {
            let (mut doc, _) = self.load()?;
            let report = ConsumeReport {
                date_section_removed: doc.remove_section(&SectionKey::Date(date)),
                carryover_sections_removed: doc.remove_carryover_sections(),
            };
            self.save(&mut doc, true)?;
            info!(%date, ?report, "backlog consumed");
            Ok(report)
        }

        /* ------------------------------ Internals ------------------------------ */

        fn remove_section(&self, key: SectionKey) -> Result<bool> {
            let (mut doc, fresh) = self.load()?;
            if !doc.remove_section(&key) {
                debug!(?key, "nothing to remove");
                if fresh {
                    self.persist_bootstrap()?;
                }
                return Ok(false);
            }
            self.save(&mut doc, false)?;
            info!(?key, "section removed");
            Ok(true)
        }

        /// Parsed document plus whether it had to be bootstrapped.
        fn load(&self) -> Result<(LedgerDocument, bool)> {
            match self.store.read(&self.path)? {
                Some(text) => Ok((parse_ledger(&text), false)),
                None => Ok((LedgerDocument::bootstrap(self.clock.now()), true)),
            }
        }

        fn persist_bootstrap(&self) -> Result<()> {
            let doc = LedgerDocument::bootstrap(self.clock.now());
            self.store.write(&self.path, &format_ledger(&doc))?;
            info!(path = ?self.path, "created backlog file");
            Ok(())
        }

        fn save(&self, doc: &mut LedgerDocument, collapse: bool) -> Result<()> {
            if !doc.stamp(self.clock.now()) {
                debug!("ledger header has no last_updated field");
            }
            let mut text = format_ledger(doc);
            if collapse {
                text = collapse_blank_runs(&text);
            }
            self.store.write(&self.path, &text)
        }
    }

    fn single_line(text: &str) -> String {
        text.lines().next().unwrap_or("").trim().to_string()
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::{CarriedTask, CarryoverSet};
        use crate::storage::{FixedClock, memory::MemoryStore};
        use chrono::NaiveDateTime;

        fn date(y: i32, m: u32, d: u32) -> NaiveDate {
            NaiveDate::from_ymd_opt(y, m, d).unwrap()
        }

        fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
            date(y, m, d).and_hms_opt(h, min, 0).unwrap()
        }

        fn ledger(store: MemoryStore) -> BacklogLedger<MemoryStore, FixedClock> {
            BacklogLedger::with_parts(
                PathBuf::from("DailyPlans/backlog.md"),
                store,
                FixedClock(at(2026, 2, 9, 21, 0)),
            )
        }

        fn text(ledger: &BacklogLedger<MemoryStore, FixedClock>) -> String {
            ledger.store().get(ledger.path()).expect("ledger written")
        }

        fn carried(description: &str, origin: Option<NaiveDate>) -> CarriedTask {
            CarriedTask {
                description: description.into(),
                origin,
            }
        }

        #[test]
        fn bootstrap_is_idempotent() {
            let l = ledger(MemoryStore::default());
            assert!(l.ensure_exists().unwrap());
            let first = text(&l);
            assert!(!l.ensure_exists().unwrap());
            assert_eq!(text(&l), first);
            assert_eq!(l.store().writes(), 1);
            assert!(first.contains("last_updated: 2026-02-09 21:00\n"));
            assert!(first.ends_with("---\n"));
        }

        #[test]
        fn add_to_empty_ledger_writes_canonical_markers() {
            let l = ledger(MemoryStore::default());
            l.add_task(date(2026, 2, 10), Category::Email, "Reply to Bob")
                .unwrap();
            let doc = text(&l);
            assert!(doc.contains(
                "## 2026-02-10 (Tuesday)\n\n### 📧 Emails\n- [ ] Reply to Bob\n\n---\n"
            ));
            assert!(doc.ends_with('\n'));
            // read once, write once, even when the file had to be created
            assert_eq!(l.store().writes(), 1);
        }

        #[test]
        fn repeated_adds_do_not_duplicate_headers() {
            let l = ledger(MemoryStore::default());
            let d = date(2026, 2, 10);
            l.add_task(d, Category::Email, "One").unwrap();
            l.add_task(d, Category::Email, "Two").unwrap();
            l.add_task(d, Category::Work, "Three").unwrap();
            let doc = text(&l);
            assert_eq!(doc.matches("## 2026-02-10 (Tuesday)").count(), 1);
            assert_eq!(doc.matches("### 📧 Emails").count(), 1);
            let tasks = l.tasks_for_date(d).unwrap();
            assert_eq!(tasks[&Category::Email], vec!["One", "Two"]);
            assert_eq!(tasks[&Category::Work], vec!["Three"]);
            // the new category lands before the section separator
            let work = doc.find("### 💼 Work Tasks").unwrap();
            let rule = doc.rfind("---").unwrap();
            assert!(work < rule);
        }

        #[test]
        fn add_then_get_round_trips_text() {
            let l = ledger(MemoryStore::default());
            let d = date(2026, 3, 1);
            for (category, text) in [
                (Category::Focus, "Deep work on **parser**"),
                (Category::Uncategorized, "Buy milk"),
                (Category::Reading, "Read `rustc` dev guide"),
            ] {
                l.add_task(d, category, text).unwrap();
                assert!(l.tasks_for_date(d).unwrap()[&category].contains(&text.to_string()));
            }
        }

        #[test]
        fn remove_tasks_for_date_leaves_other_sections_alone() {
            let l = ledger(MemoryStore::default());
            l.add_task(date(2026, 2, 10), Category::Email, "A").unwrap();
            l.add_task(date(2026, 2, 11), Category::Work, "B").unwrap();
            let before = l.document().unwrap();
            assert!(l.remove_tasks_for_date(date(2026, 2, 10)).unwrap());
            assert!(l.tasks_for_date(date(2026, 2, 10)).unwrap().is_empty());
            let after = l.document().unwrap();
            assert_eq!(
                after.section(&SectionKey::Date(date(2026, 2, 11))),
                before.section(&SectionKey::Date(date(2026, 2, 11)))
            );
            let writes = l.store().writes();
            assert!(!l.remove_tasks_for_date(date(2026, 2, 10)).unwrap());
            assert_eq!(l.store().writes(), writes);
        }

        #[test]
        fn remove_all_carryover_keeps_following_date_section() {
            let initial = "---\nlast_updated: 2026-01-01 00:00\n---\n\n\
## 🔄 Backlog due from 2026-02-08 (Sunday)\n\n### 🧠 Focus Work\n- [ ] Think\n  - *Carried over from:* 2026-02-08\n\n---\n\n\n\n\
## 2026-02-10 (Tuesday)\n\n### 📧 Emails\n- [ ] Reply to Bob\n\n---\n\n\
## 🔄 Backlog due from 2026-02-09 (Monday)\n\n### 💼 Work Tasks\n- [ ] Ship\n  - *Carried over from:* 2026-02-01\n\n---\n";
            let l = ledger(MemoryStore::with(Path::new("DailyPlans/backlog.md"), initial));
            assert_eq!(l.remove_all_carryover_sections().unwrap(), 2);
            let doc = text(&l);
            assert!(!doc.contains("## 🔄 Backlog due from"));
            assert!(doc.contains("## 2026-02-10 (Tuesday)\n\n### 📧 Emails\n- [ ] Reply to Bob"));
            assert!(!doc.contains("\n\n\n"));
            assert!(doc.contains("last_updated: 2026-02-09 21:00"));
        }

        #[test]
        fn remove_one_carryover_section() {
            let l = ledger(MemoryStore::default());
            let mut set = CarryoverSet::default();
            set.push(Category::Work, carried("Ship", None));
            l.stamp_carryover(date(2026, 2, 8), &set).unwrap();
            l.stamp_carryover(date(2026, 2, 9), &set).unwrap();
            assert!(l.remove_carryover_section(date(2026, 2, 8)).unwrap());
            assert!(!l.remove_carryover_section(date(2026, 2, 8)).unwrap());
            let doc = l.document().unwrap();
            assert_eq!(doc.carryover_sections().count(), 1);
            assert!(doc.section(&SectionKey::Carryover(date(2026, 2, 9))).is_some());
        }

        const STALE: &str = "---\ntitle: Task Backlog\nlast_updated: 2025-12-31 08:15\n---\n\n# Task Backlog\n\n---\n";

        #[test]
        fn add_task_rewrites_an_older_timestamp() {
            let l = ledger(MemoryStore::with(Path::new("DailyPlans/backlog.md"), STALE));
            l.add_task(date(2026, 2, 10), Category::Work, "Ship").unwrap();
            let doc = text(&l);
            assert!(doc.contains("last_updated: 2026-02-09 21:00\n"));
            assert!(!doc.contains("2025-12-31 08:15"));
            assert_eq!(doc.matches("last_updated:").count(), 1);
        }

        #[test]
        fn stamp_carryover_rewrites_an_older_timestamp() {
            let l = ledger(MemoryStore::with(Path::new("DailyPlans/backlog.md"), STALE));
            let mut set = CarryoverSet::default();
            set.push(Category::Focus, carried("Think", None));
            l.stamp_carryover(date(2026, 2, 9), &set).unwrap();
            let doc = text(&l);
            assert!(doc.contains("last_updated: 2026-02-09 21:00\n"));
            assert!(!doc.contains("2025-12-31 08:15"));
        }

        #[test]
        fn removing_the_only_section_leaves_a_terminated_document() {
            let initial = "## 2026-02-10 (Tuesday)\n\n### 📧 Emails\n- [ ] Reply\n\n---\n";
            let l = ledger(MemoryStore::with(Path::new("DailyPlans/backlog.md"), initial));
            assert!(l.remove_tasks_for_date(date(2026, 2, 10)).unwrap());
            assert_eq!(text(&l), "\n");
            assert_eq!(l.remove_all_carryover_sections().unwrap(), 0);
            assert_eq!(text(&l), "\n");
        }

        #[test]
        fn stamping_keeps_recorded_origins_and_refuses_duplicates() {
            let l = ledger(MemoryStore::default());
            let mut set = CarryoverSet::default();
            set.push(Category::Focus, carried("Old", Some(date(2026, 1, 1))));
            set.push(Category::Focus, carried("New", None));
            assert_eq!(
                l.stamp_carryover(date(2026, 1, 3), &set).unwrap(),
                StampOutcome::Stamped { count: 2 }
            );
            let doc = text(&l);
            assert!(doc.contains("## 🔄 Backlog due from 2026-01-03 (Saturday)"));
            assert!(doc.contains("- [ ] Old\n  - *Carried over from:* 2026-01-01\n"));
            assert!(doc.contains("- [ ] New\n  - *Carried over from:* 2026-01-03\n"));

            let writes = l.store().writes();
            assert_eq!(
                l.stamp_carryover(date(2026, 1, 3), &set).unwrap(),
                StampOutcome::AlreadyPresent
            );
            assert_eq!(
                l.stamp_carryover(date(2026, 1, 4), &CarryoverSet::default())
                    .unwrap(),
                StampOutcome::Empty
            );
            assert_eq!(l.store().writes(), writes);
        }

        #[test]
        fn consume_removes_date_and_all_carryover() {
            let l = ledger(MemoryStore::default());
            let mut set = CarryoverSet::default();
            set.push(Category::Other, carried("Call plumber", None));
            l.stamp_carryover(date(2026, 2, 8), &set).unwrap();
            l.add_task(date(2026, 2, 10), Category::Email, "Reply").unwrap();
            l.add_task(date(2026, 2, 12), Category::Email, "Later").unwrap();
            let report = l.consume(date(2026, 2, 10)).unwrap();
            assert_eq!(
                report,
                ConsumeReport {
                    date_section_removed: true,
                    carryover_sections_removed: 1,
                }
            );
            let doc = l.document().unwrap();
            assert_eq!(doc.carryover_sections().count(), 0);
            assert_eq!(
                doc.open_tasks(&SectionKey::Date(date(2026, 2, 12)))[&Category::Email],
                vec!["Later"]
            );
        }

        #[test]
        fn multi_line_task_text_keeps_first_line() {
            let l = ledger(MemoryStore::default());
            l.add_task(date(2026, 2, 10), Category::Work, "  Ship it\nwith notes")
                .unwrap();
            assert_eq!(
                l.tasks_for_date(date(2026, 2, 10)).unwrap()[&Category::Work],
                vec!["Ship it"]
            );
        }

        #[test]
        fn blank_task_text_is_rejected_without_writing() {
            let l = ledger(MemoryStore::default());
            let err = l
                .add_task(date(2026, 2, 10), Category::Work, "   \n")
                .expect_err("blank text");
            assert_eq!(err.kind(), crate::error::ErrorKind::ParseFailure);
            assert_eq!(l.store().writes(), 0);
        }

        #[test]
        fn ledger_on_disk_with_tempdir() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let l = BacklogLedger::open(tmp.path(), &BacklogConfig::default());
            assert!(l.ensure_exists().expect("bootstrap"));
            assert!(tmp.path().join("DailyPlans/backlog.md").is_file());
            l.add_task(date(2026, 2, 10), Category::Message, "Ping Ana")
                .expect("add");
            let tasks = l.tasks_for_date(date(2026, 2, 10)).expect("get");
            assert_eq!(tasks[&Category::Message], vec!["Ping Ana"]);
        }
    }
}

pub mod carryover {
    //! Carryover Extractor: lifts unchecked tasks out of a finished daily plan.
    //!
    //! Plan headings (`##` or deeper) drive a small state machine. A category
    //! marker starts collecting, the schedule marker pauses (meetings are not
    //! tasks) and the reflection marker ends the scan for good.

    use crate::codec::{clean_description, parse_origin_annotation, parse_task_line};
    use crate::core::*;
    use tracing::debug;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PlanMarker {
        Category(Category),
        Reflection,
        Schedule,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum ScanState {
        #[default]
        Idle,
        Collecting(Category),
        Terminated,
    }

    impl ScanState {
        pub fn on_marker(self, marker: PlanMarker) -> ScanState {
            match (self, marker) {
                (ScanState::Terminated, _) => ScanState::Terminated,
                (_, PlanMarker::Reflection) => ScanState::Terminated,
                (_, PlanMarker::Schedule) => ScanState::Idle,
                (_, PlanMarker::Category(category)) => ScanState::Collecting(category),
            }
        }

        pub fn category(self) -> Option<Category> {
            match self {
                ScanState::Collecting(category) => Some(category),
                ScanState::Idle | ScanState::Terminated => None,
            }
        }
    }

    /// Classify a plan heading. First matching glyph wins.
    pub fn classify_marker(line: &str) -> Option<PlanMarker> {
        if !line.starts_with("##") {
            return None;
        }
        let has = |needle: &str| line.contains(needle);
        let marker = if has("🧠") {
            PlanMarker::Category(Category::Focus)
        } else if has("💬") {
            if has("Communications") {
                PlanMarker::Category(Category::Comms)
            } else {
                PlanMarker::Category(Category::Message)
            }
        } else if has("🎓") {
            PlanMarker::Category(Category::Learning)
        } else if has("💼") {
            PlanMarker::Category(Category::Work)
        } else if has("📧") || has("Flagged Emails") {
            PlanMarker::Category(Category::Email)
        } else if has("📚") {
            PlanMarker::Category(Category::Reading)
        } else if has("📋") || has(CARRYOVER_GLYPH) {
            PlanMarker::Category(Category::Other)
        } else if has("💡") {
            PlanMarker::Reflection
        } else if has("📅") {
            PlanMarker::Schedule
        } else {
            return None;
        };
        Some(marker)
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct Extraction {
        pub tasks: CarryoverSet,
        /// Zero-based indices of the plan lines holding extracted tasks.
        pub lines: Vec<usize>,
    }

    impl Extraction {
        pub fn is_empty(&self) -> bool {
            self.tasks.is_empty()
        }
    }

    pub fn extract(plan: &str) -> Extraction {
        let lines: Vec<&str> = plan.lines().collect();
        let mut state = ScanState::Idle;
        let mut out = Extraction::default();

        for (idx, line) in lines.iter().enumerate() {
            if let Some(marker) = classify_marker(line) {
                state = state.on_marker(marker);
                if state == ScanState::Terminated {
                    debug!(line = idx + 1, "reflection marker reached, scan stopped");
                    break;
                }
            }
            let Some(category) = state.category() else {
                continue;
            };
            let Some(task) = parse_task_line(line) else {
                continue;
            };
            if task.state != TaskState::Open || is_metadata(&task.text) {
                continue;
            }
            let description = clean_description(&task.text);
            if description.is_empty() {
                continue;
            }
            let origin = lines.get(idx + 1).and_then(|next| parse_origin_annotation(next));
            out.tasks.push(
                category,
                CarriedTask {
                    description,
                    origin,
                },
            );
            out.lines.push(idx);
        }
        out
    }

    /// Bodies such as `*Estimated time:*` or `- detail` are formatting, not tasks.
    fn is_metadata(text: &str) -> bool {
        text.starts_with('-') || (text.starts_with('*') && !text.starts_with("**"))
    }

    /// Remove the extracted task lines and the indented `-` metadata lines directly
    /// under each. Everything else, checked subtasks included, is kept byte for byte.
    pub fn strip_extracted(plan: &str, extraction: &Extraction) -> String {
        let mut out = String::with_capacity(plan.len());
        let mut extracted = extraction.lines.iter().copied().peekable();
        let mut in_metadata = false;
        for (idx, line) in plan.split_inclusive('\n').enumerate() {
            while extracted.next_if(|&l| l < idx).is_some() {}
            if extracted.next_if_eq(&idx).is_some() {
                in_metadata = true;
                continue;
            }
            if in_metadata
                && line.starts_with("  ")
                && line.trim_start().starts_with('-')
                && parse_task_line(line).is_none()
            {
                continue;
            }
            in_metadata = false;
            out.push_str(line);
        }
        out
    }

    /// Flip the plan's front matter from `status: in-progress` to `status: complete`.
    pub fn mark_plan_complete(plan: &str) -> String {
        plan.replace("status: in-progress", "status: complete")
    }

}

pub mod projectors {
    pub mod merge_view_projector {
        //! Merge View Builder: the day's new ledger tasks plus every pending
        //! carryover task, rendered per category. Pure; consuming the tasks is a
        //! separate ledger operation.

        use crate::codec::encode_task;
        use crate::core::*;
        use chrono::NaiveDate;
        use indexmap::IndexMap;
        use serde::Serialize;

        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        pub struct PendingTask {
            pub description: String,
            /// `None` for tasks scheduled for the target date itself.
            #[serde(skip_serializing_if = "Option::is_none")]
            pub carried_from: Option<NaiveDate>,
        }

        impl PendingTask {
            fn entry(&self) -> TaskEntry {
                let task = TaskEntry::open(self.description.clone());
                match self.carried_from {
                    Some(origin) => task.with_origin(origin),
                    None => task,
                }
            }
        }

        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        pub struct MergeView {
            pub date: NaiveDate,
            /// New tasks first, then carryover, per category in canonical order.
            pub tasks: IndexMap<Category, Vec<PendingTask>>,
            /// Rendered task lines per category, without the heading.
            pub sections: IndexMap<Category, String>,
            pub new_count: usize,
            pub carryover_count: usize,
        }

        impl MergeView {
            pub fn is_empty(&self) -> bool {
                self.new_count + self.carryover_count == 0
            }

            /// Category headings followed by their rendered tasks.
            pub fn to_markdown(&self) -> String {
                let mut out = String::new();
                for (category, body) in &self.sections {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(&category.heading());
                    out.push('\n');
                    out.push_str(body);
                    out.push('\n');
                }
                out
            }
        }

        pub fn project(doc: &LedgerDocument, date: NaiveDate) -> MergeView {
            let new_tasks = doc.open_tasks(&SectionKey::Date(date));
            let mut carryover = pending_carryover(doc);

            let mut categories: Vec<Category> = new_tasks
                .keys()
                .chain(carryover.keys())
                .copied()
                .collect();
            categories.sort();
            categories.dedup();

            let mut view = MergeView {
                date,
                tasks: IndexMap::new(),
                sections: IndexMap::new(),
                new_count: 0,
                carryover_count: 0,
            };
            for category in categories {
                let fresh = new_tasks.get(&category).map(Vec::as_slice).unwrap_or(&[]);
                let carried = carryover.shift_remove(&category).unwrap_or_default();
                if fresh.is_empty() && carried.is_empty() {
                    continue;
                }
                view.new_count += fresh.len();
                view.carryover_count += carried.len();

                let tasks: Vec<PendingTask> = fresh
                    .iter()
                    .map(|description| PendingTask {
                        description: description.clone(),
                        carried_from: None,
                    })
                    .chain(carried)
                    .collect();
                let rendered = tasks
                    .iter()
                    .map(|t| encode_task(&t.entry()))
                    .collect::<Vec<_>>()
                    .join("\n");
                view.sections.insert(category, rendered);
                view.tasks.insert(category, tasks);
            }
            view
        }

        /// Open tasks of every carryover section, oldest section first as written.
        /// Each reports its recorded origin, else the section's due-from date.
        pub fn pending_carryover(doc: &LedgerDocument) -> IndexMap<Category, Vec<PendingTask>> {
            let mut out: IndexMap<Category, Vec<PendingTask>> = IndexMap::new();
            for section in doc.carryover_sections() {
                let due_from = section.key.date();
                for block in &section.categories {
                    out.entry(block.category)
                        .or_default()
                        .extend(block.open_tasks().map(|task| PendingTask {
                            description: task.description.clone(),
                            carried_from: Some(task.origin.unwrap_or(due_from)),
                        }));
                }
            }
            out.retain(|_, tasks| !tasks.is_empty());
            out
        }

    }
}

pub mod cleanup {
    //! End-of-day workflow: carry the plan's unchecked tasks into the ledger,
    //! strip them from the plan and mark the plan complete.

    use crate::carryover::{extract, mark_plan_complete, strip_extracted};
    use crate::core::Category;
    use crate::error::Result;
    use crate::ledger::{BacklogLedger, StampOutcome};
    use crate::storage::{Clock, DocumentStore};
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use std::path::PathBuf;
    use tracing::{debug, info, warn};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum CleanupReport {
        NoPlan,
        /// Nothing left open; the plan was only marked complete.
        AllDone,
        Carried {
            count: usize,
            per_category: IndexMap<Category, usize>,
        },
        /// The ledger already holds carryover for this day; the plan is untouched.
        AlreadyCarried,
    }

    pub struct EndOfDay<'a, S, C> {
        ledger: &'a BacklogLedger<S, C>,
        plan_path: PathBuf,
    }

    impl<'a, S: DocumentStore, C: Clock> EndOfDay<'a, S, C> {
        /// Plans are read and written through the ledger's store.
        pub fn new(ledger: &'a BacklogLedger<S, C>, plan_path: PathBuf) -> Self {
            Self { ledger, plan_path }
        }

        pub fn run(&self, date: NaiveDate) -> Result<CleanupReport> {
            let store = self.ledger.store();
            let Some(plan) = store.read(&self.plan_path)? else {
                info!(%date, path = ?self.plan_path, "no daily plan, nothing to clean up");
                return Ok(CleanupReport::NoPlan);
            };

            let extraction = extract(&plan);
            if extraction.is_empty() {
                self.write_plan(&plan, mark_plan_complete(&plan))?;
                info!(%date, "all tasks completed");
                return Ok(CleanupReport::AllDone);
            }
            if extraction.tasks.get(Category::Email).is_empty() {
                debug!(%date, "no flagged emails to carry over");
            }

            match self.ledger.stamp_carryover(date, &extraction.tasks)? {
                StampOutcome::Stamped { count } => {
                    let stripped = strip_extracted(&plan, &extraction);
                    self.write_plan(&plan, mark_plan_complete(&stripped))?;
                    let per_category = extraction
                        .tasks
                        .iter()
                        .map(|(category, tasks)| (category, tasks.len()))
                        .collect();
                    info!(%date, count, "unchecked tasks moved to backlog");
                    Ok(CleanupReport::Carried {
                        count,
                        per_category,
                    })
                }
                StampOutcome::AlreadyPresent => {
                    warn!(%date, "carryover already recorded, plan left untouched");
                    Ok(CleanupReport::AlreadyCarried)
                }
                StampOutcome::Empty => {
                    self.write_plan(&plan, mark_plan_complete(&plan))?;
                    Ok(CleanupReport::AllDone)
                }
            }
        }

        fn write_plan(&self, before: &str, after: String) -> Result<()> {
            if before == after {
                return Ok(());
            }
            self.ledger.store().write(&self.plan_path, &after)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::SectionKey;
        use crate::projectors::merge_view_projector::project;
        use crate::storage::{FixedClock, memory::MemoryStore};
        use std::path::Path;

        const LEDGER: &str = "DailyPlans/backlog.md";
        const PLAN: &str = "DailyPlans/2026/01/2026-01-03.md";

        fn date(y: i32, m: u32, d: u32) -> NaiveDate {
            NaiveDate::from_ymd_opt(y, m, d).unwrap()
        }

        fn ledger_with_plan(plan: &str) -> BacklogLedger<MemoryStore, FixedClock> {
            BacklogLedger::with_parts(
                PathBuf::from(LEDGER),
                MemoryStore::with(Path::new(PLAN), plan),
                FixedClock(date(2026, 1, 3).and_hms_opt(23, 45, 0).unwrap()),
            )
        }

        #[test]
        fn missing_plan_is_reported() {
            let ledger = BacklogLedger::with_parts(
                PathBuf::from(LEDGER),
                MemoryStore::default(),
                FixedClock(date(2026, 1, 3).and_hms_opt(23, 45, 0).unwrap()),
            );
            let report = EndOfDay::new(&ledger, PathBuf::from(PLAN))
                .run(date(2026, 1, 3))
                .unwrap();
            assert_eq!(report, CleanupReport::NoPlan);
            assert_eq!(ledger.store().writes(), 0);
        }

        #[test]
        fn finished_plan_is_only_marked_complete() {
            let ledger = ledger_with_plan("status: in-progress\n## 💼 Work\n- [x] Ship\n");
            let report = EndOfDay::new(&ledger, PathBuf::from(PLAN))
                .run(date(2026, 1, 3))
                .unwrap();
            assert_eq!(report, CleanupReport::AllDone);
            assert_eq!(
                ledger.store().get(Path::new(PLAN)).unwrap(),
                "status: complete\n## 💼 Work\n- [x] Ship\n"
            );
            assert_eq!(ledger.store().get(Path::new(LEDGER)), None);
        }

        #[test]
        fn carried_tasks_keep_their_first_origin() {
            let plan = "status: in-progress\n\
## 💼 Work Tasks\n\
- [ ] Ship release\n  - *Carried over from:* 2026-01-01\n\
- [ ] Review PR\n\
- [x] Standup notes\n";
            let ledger = ledger_with_plan(plan);
            let report = EndOfDay::new(&ledger, PathBuf::from(PLAN))
                .run(date(2026, 1, 3))
                .unwrap();
            assert_eq!(
                report,
                CleanupReport::Carried {
                    count: 2,
                    per_category: IndexMap::from([(Category::Work, 2)]),
                }
            );
            assert_eq!(
                ledger.store().get(Path::new(PLAN)).unwrap(),
                "status: complete\n## 💼 Work Tasks\n- [x] Standup notes\n"
            );

            let view = project(&ledger.document().unwrap(), date(2026, 1, 4));
            let work = &view.tasks[&Category::Work];
            assert_eq!(work[0].carried_from, Some(date(2026, 1, 1)));
            assert_eq!(work[1].carried_from, Some(date(2026, 1, 3)));
        }

        #[test]
        fn second_run_for_the_same_day_leaves_plan_alone() {
            let plan = "status: in-progress\n## 🧠 Focus\n- [ ] Think\n";
            let ledger = ledger_with_plan(plan);
            let eod = EndOfDay::new(&ledger, PathBuf::from(PLAN));
            assert!(matches!(
                eod.run(date(2026, 1, 3)).unwrap(),
                CleanupReport::Carried { count: 1, .. }
            ));
            // plan regenerated with the same open task
            ledger.store().write(Path::new(PLAN), plan).unwrap();
            assert_eq!(eod.run(date(2026, 1, 3)).unwrap(), CleanupReport::AlreadyCarried);
            assert_eq!(ledger.store().get(Path::new(PLAN)).unwrap(), plan);
            let doc = ledger.document().unwrap();
            assert_eq!(doc.carryover_sections().count(), 1);
            assert!(doc.section(&SectionKey::Carryover(date(2026, 1, 3))).is_some());
        }
    }
}

pub use format::format_ledger;
pub use ledger::BacklogLedger;
pub use parser::parse_ledger;
