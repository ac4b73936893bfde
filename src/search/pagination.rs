//! Read/unread partitioning and independent pagination of each list.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::filter::{apply_filter, FilterSpec};
use crate::model::message::Message;

/// Default number of messages per page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// The two paginated lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    /// Read messages.
    Inbox,
    /// Unread messages.
    Updates,
}

impl std::str::FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inbox" | "read" => Ok(Self::Inbox),
            "updates" | "unread" => Ok(Self::Updates),
            other => Err(format!("unknown view '{other}' (expected inbox or updates)")),
        }
    }
}

/// Current page and derived page count of one list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCursor {
    /// 1-based.
    pub page: usize,
    pub total_pages: usize,
}

impl Default for PageCursor {
    fn default() -> Self {
        Self {
            page: 1,
            total_pages: 1,
        }
    }
}

/// Cursors of both lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursors {
    pub inbox: PageCursor,
    pub updates: PageCursor,
}

impl PageCursors {
    pub fn get(&self, view: View) -> PageCursor {
        match view {
            View::Inbox => self.inbox,
            View::Updates => self.updates,
        }
    }

    pub fn get_mut(&mut self, view: View) -> &mut PageCursor {
        match view {
            View::Inbox => &mut self.inbox,
            View::Updates => &mut self.updates,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// `max(1, ceil(count / page_size))`. A zero page size counts as 1.
pub fn total_pages(count: usize, page_size: usize) -> usize {
    count.div_ceil(page_size.max(1)).max(1)
}

/// Clamp a requested page into `[1, total_pages]`. Never rejects.
pub fn clamp_page(requested: i64, total_pages: usize) -> usize {
    let total = total_pages.max(1) as i64;
    requested.clamp(1, total) as usize
}

/// One page of a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<Message>,
    pub cursor: PageCursor,
    /// Size of the whole list, not just this page.
    pub total: usize,
}

/// Slice `items` to the clamped `requested` page.
pub fn paginate(items: Vec<Message>, requested: i64, page_size: usize) -> Page {
    let size = page_size.max(1);
    let total = items.len();
    let total_pages = total_pages(total, size);
    let page = clamp_page(requested, total_pages);
    let start = (page - 1) * size;
    let page_items = items.into_iter().skip(start).take(size).collect();
    Page {
        items: page_items,
        cursor: PageCursor { page, total_pages },
        total,
    }
}

/// What the rendering collaborator receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxView {
    pub read_items: Vec<Message>,
    pub unread_items: Vec<Message>,
    /// Unread messages matching the filter, across all pages.
    pub unread_total_count: usize,
    /// Read messages matching the filter, across all pages.
    #[serde(skip)]
    pub read_total_count: usize,
    /// Cursors after clamping.
    #[serde(skip)]
    pub cursors: PageCursors,
}

/// Filter, split by read state, and paginate each side independently.
///
/// `messages` should already be sorted newest first.
pub fn build_view(
    messages: &[Message],
    spec: &FilterSpec,
    cursors: PageCursors,
    page_size: usize,
    now: DateTime<Local>,
) -> MailboxView {
    let (read, unread): (Vec<Message>, Vec<Message>) = apply_filter(messages, spec, now)
        .into_iter()
        .partition(|m| m.is_read);

    let read_page = paginate(read, cursors.inbox.page as i64, page_size);
    let unread_page = paginate(unread, cursors.updates.page as i64, page_size);

    MailboxView {
        read_total_count: read_page.total,
        unread_total_count: unread_page.total,
        cursors: PageCursors {
            inbox: read_page.cursor,
            updates: unread_page.cursor,
        },
        read_items: read_page.items,
        unread_items: unread_page.items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::identity::derive_id;
    use chrono::{Duration, TimeZone, Utc};

    fn messages(n: usize, read_every: usize) -> Vec<Message> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let at = base - Duration::minutes(i as i64);
                let from = format!("s{i}@x.com");
                let mut m = Message::new_unread(derive_id(&at, &from), "default", &from, None, None, at);
                m.is_read = read_every > 0 && i % read_every == 0;
                m
            })
            .collect()
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0, 20), 1);
        assert_eq!(total_pages(20, 20), 1);
        assert_eq!(total_pages(21, 20), 2);
        assert_eq!(total_pages(5, 0), 5);
    }

    #[test]
    fn test_clamp_page() {
        assert_eq!(clamp_page(0, 3), 1);
        assert_eq!(clamp_page(-7, 3), 1);
        assert_eq!(clamp_page(2, 3), 2);
        assert_eq!(clamp_page(99, 3), 3);
        assert_eq!(clamp_page(5, 0), 1);
    }

    #[test]
    fn test_paginate_last_page() {
        let page = paginate(messages(45, 0), 3, 20);
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.cursor, PageCursor { page: 3, total_pages: 3 });
        assert_eq!(page.total, 45);
        assert_eq!(page.items[0].from, "s40@x.com");
    }

    #[test]
    fn test_paginate_out_of_range_is_clamped() {
        let page = paginate(messages(45, 0), 10, 20);
        assert_eq!(page.cursor.page, 3);
        let page = paginate(Vec::new(), -1, 20);
        assert_eq!(page.cursor, PageCursor::default());
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_build_view_pages_lists_independently() {
        // 30 messages, every third read -> 10 read, 20 unread
        let msgs = messages(30, 3);
        let cursors = PageCursors {
            inbox: PageCursor { page: 2, total_pages: 1 },
            updates: PageCursor { page: 2, total_pages: 1 },
        };
        let view = build_view(&msgs, &FilterSpec::default(), cursors, 8, Local::now());
        assert_eq!(view.read_total_count, 10);
        assert_eq!(view.unread_total_count, 20);
        assert_eq!(view.cursors.inbox, PageCursor { page: 2, total_pages: 2 });
        assert_eq!(view.cursors.updates, PageCursor { page: 2, total_pages: 3 });
        assert_eq!(view.read_items.len(), 2);
        assert_eq!(view.unread_items.len(), 8);
        assert!(view.read_items.iter().all(|m| m.is_read));
        assert!(view.unread_items.iter().all(|m| !m.is_read));
    }

    #[test]
    fn test_view_parse() {
        assert_eq!("inbox".parse::<View>().unwrap(), View::Inbox);
        assert_eq!("Unread".parse::<View>().unwrap(), View::Updates);
        assert!("spam".parse::<View>().is_err());
    }
}
