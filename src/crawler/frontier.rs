//! BFS frontier with a deterministic batch order.

use crate::models::FrontierItem;

/// Bag of queued URLs. Before each batch is taken the bag is stably
/// reordered by (depth, anchored-links-first, URL), which preserves the
/// visual navigation order for anchored links and keeps discovery
/// deterministic for everything else.
#[derive(Debug, Default)]
pub struct Frontier {
    items: Vec<FrontierItem>,
}

impl Frontier {
    pub fn new() -> Self {
        Frontier::default()
    }

    pub fn push(&mut self, item: FrontierItem) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items taken earlier this round but not dispatched (budget guard)
    /// return to the front of the bag.
    pub fn push_front(&mut self, items: Vec<FrontierItem>) {
        let mut merged = items;
        merged.append(&mut self.items);
        self.items = merged;
    }

    /// Sort the bag and remove up to `n` items from the front.
    pub fn take_batch(&mut self, n: usize) -> Vec<FrontierItem> {
        self.items.sort_by(|a, b| {
            a.depth
                .cmp(&b.depth)
                .then_with(|| a.link_title.is_none().cmp(&b.link_title.is_none()))
                .then_with(|| a.url.cmp(&b.url))
        });
        let take = n.min(self.items.len());
        self.items.drain(..take).collect()
    }
}
