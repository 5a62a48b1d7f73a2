//! Page chain tracking for social-sync.
//!
//! A [`PageChain`] is the cached result of one query shape: every page
//! fetched so far plus live inserts, in display order. It provides:
//! - A dedup index over the whole chain (visible, filtered and removed ids)
//! - Forward-only cursor tracking (a consumed cursor is never used again)
//! - A generation counter so a page fetched before a refresh is discarded
//! - Relationship filtering that can be re-applied when the filter changes
//!
//! Filtered items stay in the chain (hidden) so they are never resurrected
//! by a later page or live insert, and reappear if the filter is lifted.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use sync_types::{Direction, Item, ItemId, PageCursor};
use thiserror::Error;

/// Persisted form of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPage {
    /// Query cache key the chain belongs to.
    pub collection_key: String,
    /// Every retained item in display order, including filtered ones.
    pub items: Vec<Item>,
    /// Cursor for the next page.
    pub cursor: Option<PageCursor>,
    /// Whether the remote query has more pages.
    pub has_more: bool,
    /// Milliseconds since the Unix epoch of the first-page fetch.
    pub fetched_at: u64,
    /// When the chain stops being served as fresh.
    pub expires_at: u64,
    /// Ids hidden by the relationship filter.
    #[serde(default)]
    pub suppressed: BTreeSet<ItemId>,
    /// Ids removed by live updates; never re-inserted.
    #[serde(default)]
    pub removed: BTreeSet<ItemId>,
    /// Cursors already used to fetch a page.
    #[serde(default)]
    pub consumed: Vec<PageCursor>,
}

/// Errors when appending a fetched page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The chain was replaced after the page was requested.
    #[error("chain was refreshed while the page was loading")]
    StaleCursor,
    /// The page was fetched from a cursor that is no longer the chain's.
    #[error("page cursor already consumed")]
    CursorReused,
}

/// What happened to a live insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    /// Added and visible.
    Inserted,
    /// Already in the chain.
    Duplicate,
    /// Added hidden by the relationship filter.
    Filtered,
    /// Not added: an ascending chain still has pages to load, so the item
    /// will arrive through pagination.
    Deferred,
}

/// Cached pages of one query plus the dedup index.
#[derive(Debug, Clone)]
pub struct PageChain {
    page: CachedPage,
    direction: Direction,
    seen: HashSet<ItemId>,
    generation: u64,
    stale: bool,
    loaded: bool,
}

impl PageChain {
    /// Empty chain that still needs its first page.
    pub fn new(collection_key: impl Into<String>, direction: Direction) -> Self {
        Self {
            page: CachedPage {
                collection_key: collection_key.into(),
                items: Vec::new(),
                cursor: None,
                has_more: true,
                fetched_at: 0,
                expires_at: 0,
                suppressed: BTreeSet::new(),
                removed: BTreeSet::new(),
                consumed: Vec::new(),
            },
            direction,
            seen: HashSet::new(),
            generation: 0,
            stale: false,
            loaded: false,
        }
    }

    /// Rebuild a chain (and its dedup index) from its persisted form.
    pub fn from_cached(page: CachedPage, direction: Direction) -> Self {
        let seen = page
            .items
            .iter()
            .map(|item| item.id.clone())
            .chain(page.removed.iter().cloned())
            .collect();
        Self {
            page,
            direction,
            seen,
            generation: 0,
            stale: false,
            loaded: true,
        }
    }

    /// Persisted form.
    pub fn to_cached(&self) -> CachedPage {
        self.page.clone()
    }

    /// Query cache key.
    pub fn key(&self) -> &str {
        &self.page.collection_key
    }

    /// Current generation; captured before a page request.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Invalidate outstanding page requests (a refresh started).
    pub fn invalidate(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    /// Replace the chain with a fresh first page.
    ///
    /// Returns the visible items.
    pub fn replace(
        &mut self,
        items: Vec<Item>,
        next_cursor: Option<PageCursor>,
        now: u64,
        ttl_ms: u64,
        visible: impl Fn(&Item) -> bool,
    ) -> Vec<Item> {
        self.invalidate();
        self.seen.clear();
        self.page.items.clear();
        self.page.suppressed.clear();
        self.page.removed.clear();
        self.page.consumed.clear();
        self.page.fetched_at = now;
        self.page.expires_at = now.saturating_add(ttl_ms);
        self.stale = false;
        self.loaded = true;
        self.push_page(items, next_cursor, &visible);
        self.visible_items()
    }

    /// Append the page fetched from `start_after` at `generation`.
    ///
    /// Returns the newly visible items.
    pub fn append_page(
        &mut self,
        generation: u64,
        start_after: Option<&PageCursor>,
        items: Vec<Item>,
        next_cursor: Option<PageCursor>,
        visible: impl Fn(&Item) -> bool,
    ) -> Result<Vec<Item>, ChainError> {
        if generation != self.generation {
            return Err(ChainError::StaleCursor);
        }
        if start_after != self.page.cursor.as_ref() {
            return Err(ChainError::CursorReused);
        }
        if let Some(cursor) = start_after {
            self.page.consumed.push(cursor.clone());
        }
        let before: HashSet<ItemId> = self.page.items.iter().map(|i| i.id.clone()).collect();
        self.push_page(items, next_cursor, &visible);
        Ok(self
            .visible_items()
            .into_iter()
            .filter(|item| !before.contains(&item.id))
            .collect())
    }

    /// Merge a live insert.
    ///
    /// Descending chains prepend; ascending chains append, but only once
    /// every page has been loaded.
    pub fn insert_live(&mut self, item: Item, visible: bool) -> LiveOutcome {
        if self.seen.contains(&item.id) {
            return LiveOutcome::Duplicate;
        }
        let at_front = match self.direction {
            Direction::Descending => true,
            Direction::Ascending if self.page.has_more => return LiveOutcome::Deferred,
            Direction::Ascending => false,
        };
        self.seen.insert(item.id.clone());
        if !visible {
            self.page.suppressed.insert(item.id.clone());
        }
        if at_front {
            self.page.items.insert(0, item);
        } else {
            self.page.items.push(item);
        }
        if visible {
            LiveOutcome::Inserted
        } else {
            LiveOutcome::Filtered
        }
    }

    /// Replace an item in place after a live modification.
    ///
    /// Returns true if the chain held the item.
    pub fn update_live(&mut self, item: Item, visible: bool) -> bool {
        let Some(slot) = self.page.items.iter_mut().find(|i| i.id == item.id) else {
            return false;
        };
        if visible {
            self.page.suppressed.remove(&item.id);
        } else {
            self.page.suppressed.insert(item.id.clone());
        }
        *slot = item;
        true
    }

    /// Drop an item after a live removal. It is never re-inserted.
    ///
    /// Returns true if the item was visible.
    pub fn remove(&mut self, id: &ItemId) -> bool {
        let Some(index) = self.page.items.iter().position(|i| &i.id == id) else {
            self.seen.insert(id.clone());
            self.page.removed.insert(id.clone());
            return false;
        };
        self.page.items.remove(index);
        let was_hidden = self.page.suppressed.remove(id);
        self.seen.insert(id.clone());
        self.page.removed.insert(id.clone());
        !was_hidden
    }

    /// Re-apply the relationship filter to every retained item.
    ///
    /// Returns true if the visible set changed.
    pub fn refilter(&mut self, visible: impl Fn(&Item) -> bool) -> bool {
        let next: BTreeSet<ItemId> = self
            .page
            .items
            .iter()
            .filter(|item| !visible(item))
            .map(|item| item.id.clone())
            .collect();
        let changed = next != self.page.suppressed;
        self.page.suppressed = next;
        changed
    }

    /// Visible items in display order, carrying the stale flag.
    pub fn visible_items(&self) -> Vec<Item> {
        self.page
            .items
            .iter()
            .filter(|item| !self.page.suppressed.contains(&item.id))
            .cloned()
            .map(|mut item| {
                item.stale = self.stale;
                item
            })
            .collect()
    }

    /// Whether `id` is anywhere in the dedup index.
    pub fn contains(&self, id: &ItemId) -> bool {
        self.seen.contains(id)
    }

    /// Number of visible items.
    pub fn visible_len(&self) -> usize {
        self.page.items.len().saturating_sub(self.page.suppressed.len())
    }

    /// Cursor for the next page.
    pub fn cursor(&self) -> Option<&PageCursor> {
        self.page.cursor.as_ref()
    }

    /// Whether more pages are available.
    pub fn has_more(&self) -> bool {
        self.page.has_more
    }

    /// Whether a first page has been stored.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Whether the chain is past its TTL at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.page.expires_at
    }

    /// Expiry timestamp.
    pub fn expires_at(&self) -> u64 {
        self.page.expires_at
    }

    /// Mark the chain as served past its TTL.
    pub fn set_stale(&mut self, stale: bool) {
        self.stale = stale;
    }

    /// Whether the chain is being served past its TTL.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    fn push_page(
        &mut self,
        items: Vec<Item>,
        next_cursor: Option<PageCursor>,
        visible: &impl Fn(&Item) -> bool,
    ) {
        for item in items {
            if !self.seen.insert(item.id.clone()) {
                continue;
            }
            if !visible(&item) {
                self.page.suppressed.insert(item.id.clone());
            }
            self.page.items.push(item);
        }
        // A cursor that was already consumed would loop; treat it as the end.
        let next_cursor = next_cursor.filter(|c| !self.page.consumed.contains(c));
        self.page.has_more = next_cursor.is_some();
        self.page.cursor = next_cursor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use sync_types::UserId;

    const TTL: u64 = 1_000;

    fn item(id: &str, owner: &str, ts: u64) -> Item {
        Item {
            id: ItemId::new(id),
            owner_id: UserId::new(owner),
            timestamp: ts,
            stale: false,
            fields: Map::new(),
        }
    }

    fn all(_: &Item) -> bool {
        true
    }

    fn ids(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    fn loaded_chain() -> PageChain {
        let mut chain = PageChain::new("posts", Direction::Descending);
        chain.replace(
            vec![item("a", "u1", 3), item("b", "u2", 2)],
            Some(PageCursor::new("c1")),
            100,
            TTL,
            all,
        );
        chain
    }

    #[test]
    fn replace_sets_first_page() {
        let chain = loaded_chain();
        assert_eq!(ids(&chain.visible_items()), vec!["a", "b"]);
        assert_eq!(chain.cursor(), Some(&PageCursor::new("c1")));
        assert!(chain.has_more());
        assert!(chain.is_loaded());
        assert_eq!(chain.expires_at(), 1_100);
    }

    #[test]
    fn append_advances_cursor() {
        let mut chain = loaded_chain();
        let generation = chain.generation();
        let added = chain
            .append_page(
                generation,
                Some(&PageCursor::new("c1")),
                vec![item("c", "u1", 1)],
                None,
                all,
            )
            .unwrap();
        assert_eq!(ids(&added), vec!["c"]);
        assert!(!chain.has_more());
        assert!(chain.cursor().is_none());
    }

    #[test]
    fn append_skips_duplicates() {
        let mut chain = loaded_chain();
        let generation = chain.generation();
        let added = chain
            .append_page(
                generation,
                Some(&PageCursor::new("c1")),
                vec![item("b", "u2", 2), item("c", "u1", 1)],
                Some(PageCursor::new("c2")),
                all,
            )
            .unwrap();
        assert_eq!(ids(&added), vec!["c"]);
        assert_eq!(ids(&chain.visible_items()), vec!["a", "b", "c"]);
    }

    #[test]
    fn page_from_before_refresh_is_stale() {
        let mut chain = loaded_chain();
        let generation = chain.generation();
        chain.invalidate();
        let result = chain.append_page(
            generation,
            Some(&PageCursor::new("c1")),
            vec![item("c", "u1", 1)],
            None,
            all,
        );
        assert_eq!(result, Err(ChainError::StaleCursor));
        assert_eq!(ids(&chain.visible_items()), vec!["a", "b"]);
    }

    #[test]
    fn cursor_is_never_reused() {
        let mut chain = loaded_chain();
        let generation = chain.generation();
        chain
            .append_page(
                generation,
                Some(&PageCursor::new("c1")),
                vec![item("c", "u1", 1)],
                Some(PageCursor::new("c2")),
                all,
            )
            .unwrap();
        let again = chain.append_page(
            generation,
            Some(&PageCursor::new("c1")),
            vec![item("d", "u1", 0)],
            None,
            all,
        );
        assert_eq!(again, Err(ChainError::CursorReused));
    }

    #[test]
    fn consumed_cursor_returned_again_ends_chain() {
        let mut chain = loaded_chain();
        let generation = chain.generation();
        chain
            .append_page(
                generation,
                Some(&PageCursor::new("c1")),
                vec![item("c", "u1", 1)],
                Some(PageCursor::new("c1")),
                all,
            )
            .unwrap();
        assert!(!chain.has_more());
    }

    #[test]
    fn live_insert_prepends_and_dedups() {
        let mut chain = loaded_chain();
        assert_eq!(chain.insert_live(item("n", "u1", 9), true), LiveOutcome::Inserted);
        assert_eq!(chain.insert_live(item("n", "u1", 9), true), LiveOutcome::Duplicate);
        assert_eq!(chain.insert_live(item("a", "u1", 3), true), LiveOutcome::Duplicate);
        assert_eq!(ids(&chain.visible_items()), vec!["n", "a", "b"]);
    }

    #[test]
    fn live_then_page_does_not_duplicate() {
        let mut chain = loaded_chain();
        chain.insert_live(item("c", "u1", 1), true);
        let generation = chain.generation();
        let added = chain
            .append_page(
                generation,
                Some(&PageCursor::new("c1")),
                vec![item("c", "u1", 1), item("d", "u1", 0)],
                None,
                all,
            )
            .unwrap();
        assert_eq!(ids(&added), vec!["d"]);
        assert_eq!(chain.visible_len(), 4);
    }

    #[test]
    fn filtered_item_is_not_resurrected() {
        let mut chain = loaded_chain();
        assert_eq!(chain.insert_live(item("x", "blocked", 9), false), LiveOutcome::Filtered);
        assert_eq!(chain.insert_live(item("x", "blocked", 9), true), LiveOutcome::Duplicate);
        assert!(!ids(&chain.visible_items()).contains(&"x"));
    }

    #[test]
    fn refilter_hides_and_restores() {
        let mut chain = loaded_chain();
        assert!(chain.refilter(|i| i.owner_id.as_str() != "u2"));
        assert_eq!(ids(&chain.visible_items()), vec!["a"]);
        assert!(!chain.refilter(|i| i.owner_id.as_str() != "u2"));
        assert!(chain.refilter(all));
        assert_eq!(ids(&chain.visible_items()), vec!["a", "b"]);
    }

    #[test]
    fn ascending_chain_defers_live_until_fully_loaded() {
        let mut chain = PageChain::new("msgs", Direction::Ascending);
        chain.replace(vec![item("a", "u", 1)], Some(PageCursor::new("c1")), 100, TTL, all);
        assert_eq!(chain.insert_live(item("z", "u", 9), true), LiveOutcome::Deferred);
        assert!(!chain.contains(&ItemId::new("z")));

        let generation = chain.generation();
        chain
            .append_page(
                generation,
                Some(&PageCursor::new("c1")),
                vec![item("b", "u", 2)],
                None,
                all,
            )
            .unwrap();
        assert_eq!(chain.insert_live(item("z", "u", 9), true), LiveOutcome::Inserted);
        assert_eq!(ids(&chain.visible_items()), vec!["a", "b", "z"]);
    }

    #[test]
    fn update_and_remove() {
        let mut chain = loaded_chain();
        let mut edited = item("a", "u1", 3);
        edited.fields.insert("text".into(), "edited".into());
        assert!(chain.update_live(edited, true));
        assert_eq!(chain.visible_items()[0].field("text"), Some(&"edited".into()));
        assert!(!chain.update_live(item("zz", "u1", 0), true));

        assert!(chain.remove(&ItemId::new("a")));
        assert_eq!(ids(&chain.visible_items()), vec!["b"]);
        assert_eq!(chain.insert_live(item("a", "u1", 3), true), LiveOutcome::Duplicate);
    }

    #[test]
    fn stale_flag_is_carried_by_items() {
        let mut chain = loaded_chain();
        chain.set_stale(true);
        assert!(chain.visible_items().iter().all(|i| i.stale));
        assert!(chain.is_expired(1_100));
        assert!(!chain.is_expired(1_099));
    }

    #[test]
    fn cached_roundtrip_rebuilds_dedup_index() {
        let mut chain = loaded_chain();
        chain.insert_live(item("x", "blocked", 9), false);
        chain.remove(&ItemId::new("a"));

        let encoded = serde_json::to_string(&chain.to_cached()).unwrap();
        let page: CachedPage = serde_json::from_str(&encoded).unwrap();
        let restored = PageChain::from_cached(page, Direction::Descending);

        assert!(restored.contains(&ItemId::new("x")));
        assert!(restored.contains(&ItemId::new("a")));
        assert_eq!(ids(&restored.visible_items()), vec!["b"]);
        assert_eq!(restored.cursor(), Some(&PageCursor::new("c1")));
    }
}
