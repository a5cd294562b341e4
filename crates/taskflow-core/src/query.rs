use serde::Deserialize;

use crate::ids::CategoryId;
use crate::task::Priority;

pub const DEFAULT_PAGE_SIZE: i64 = 100;

/// Sort column allow-list. Anything outside the list is silently rewritten
/// to `Position` so the contract stays stable across client versions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum SortKey {
    #[default]
    Position,
    CreatedAt,
    DueDate,
    Priority,
    Title,
}

impl SortKey {
    pub fn column(self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::CreatedAt => "created_at",
            Self::DueDate => "due_date",
            Self::Priority => "priority",
            Self::Title => "title",
        }
    }
}

impl From<String> for SortKey {
    fn from(s: String) -> Self {
        match s.as_str() {
            "position" => Self::Position,
            "created_at" => Self::CreatedAt,
            "due_date" => Self::DueDate,
            "priority" => Self::Priority,
            "title" => Self::Title,
            _ => Self::Position,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl From<String> for SortOrder {
    fn from(s: String) -> Self {
        if s.eq_ignore_ascii_case("desc") {
            Self::Desc
        } else {
            Self::Asc
        }
    }
}

/// Declarative filter/sort/pagination specification for task listings.
/// Consumed by the store's query builder; never interpolated as raw SQL.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TaskQuery {
    /// Case-insensitive substring match against title or description.
    pub search: Option<String>,
    pub priority: Option<Priority>,
    pub completed: Option<bool>,
    pub category_id: Option<CategoryId>,
    /// Tag set membership test.
    pub tag: Option<String>,
    /// Restrict to not-completed tasks whose due date is in the past.
    pub overdue: bool,
    pub sort: SortKey,
    pub order: SortOrder,
    /// 1-based page index.
    pub page: i64,
    pub page_size: i64,
}

impl Default for TaskQuery {
    fn default() -> Self {
        Self {
            search: None,
            priority: None,
            completed: None,
            category_id: None,
            tag: None,
            overdue: false,
            sort: SortKey::default(),
            order: SortOrder::default(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl TaskQuery {
    /// Pagination with non-positive values clamped to the defaults.
    pub fn clamped_page(&self) -> i64 {
        if self.page < 1 { 1 } else { self.page }
    }

    pub fn clamped_page_size(&self) -> i64 {
        if self.page_size < 1 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size
        }
    }

    pub fn offset(&self) -> i64 {
        (self.clamped_page() - 1) * self.clamped_page_size()
    }
}
