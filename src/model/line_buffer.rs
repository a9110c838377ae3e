//! Append-only, block-chunked storage for captured output lines.
//!
//! A `LineBuffer` is a persistent value: `append` returns a new buffer that
//! shares every existing block with the old one, so snapshots handed to
//! observers never change underneath them.

use std::ops::{Bound, RangeBounds};
use std::sync::Arc;

/// Target lines per block and overall retention cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineBufferConfig {
    pub block_size: usize,
    pub max_size: usize,
}

impl Default for LineBufferConfig {
    fn default() -> Self {
        Self {
            block_size: 1000,
            max_size: 100_000,
        }
    }
}

/// One OS read event's worth of lines, never mutated once appended.
pub type Block = Arc<[String]>;

#[derive(Debug)]
struct Node {
    block: Block,
    prev: Option<Arc<Node>>,
}

impl Drop for Node {
    // Unlink iteratively; the default recursive drop overflows the stack
    // on long chains.
    fn drop(&mut self) {
        let mut next = self.prev.take();
        while let Some(mut node) = next.and_then(Arc::into_inner) {
            next = node.prev.take();
        }
    }
}

#[derive(Debug, Clone)]
pub struct LineBuffer {
    /// Newest block first.
    head: Option<Arc<Node>>,
    blocks: usize,
    size: usize,
    evicted: usize,
    config: LineBufferConfig,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(LineBufferConfig::default())
    }
}

impl LineBuffer {
    pub fn new(config: LineBufferConfig) -> Self {
        Self {
            head: None,
            blocks: 0,
            size: 0,
            evicted: 0,
            config,
        }
    }

    pub fn config(&self) -> LineBufferConfig {
        self.config
    }

    /// Return a new buffer with `lines` as one additional trailing block.
    ///
    /// `self` is left untouched. An empty `lines` yields a clone.
    pub fn append(&self, lines: Vec<String>) -> LineBuffer {
        if lines.is_empty() {
            return self.clone();
        }
        let added = lines.len();
        let mut next = LineBuffer {
            head: Some(Arc::new(Node {
                block: lines.into(),
                prev: self.head.clone(),
            })),
            blocks: self.blocks + 1,
            size: self.size + added,
            evicted: self.evicted,
            config: self.config,
        };
        if next.size > next.config.max_size {
            next.evict();
        }
        next
    }

    /// Drop the oldest blocks down to the low-water mark
    /// `max_size - block_size`. The newest block always survives.
    fn evict(&mut self) {
        let low_water = self
            .config
            .max_size
            .saturating_sub(self.config.block_size.min(self.config.max_size));

        let mut kept: Vec<Block> = Vec::new();
        let mut kept_size = 0;
        for block in self.blocks_newest_first() {
            if !kept.is_empty() && kept_size + block.len() > low_water {
                break;
            }
            kept_size += block.len();
            kept.push(block.clone());
        }

        // Rebuild the retained chain oldest-first so the dropped tail is freed.
        let mut head: Option<Arc<Node>> = None;
        for block in kept.iter().rev() {
            head = Some(Arc::new(Node {
                block: block.clone(),
                prev: head,
            }));
        }

        self.evicted += self.size - kept_size;
        self.blocks = kept.len();
        self.size = kept_size;
        self.head = head;
    }

    /// Total retained line count.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of retained blocks.
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// Lines dropped by the retention policy so far.
    pub fn evicted(&self) -> usize {
        self.evicted
    }

    /// Every line ever appended, retained or not.
    pub fn total_appended(&self) -> usize {
        self.evicted + self.size
    }

    fn blocks_newest_first(&self) -> impl Iterator<Item = &Block> + '_ {
        let mut cursor = self.head.as_deref();
        std::iter::from_fn(move || {
            let node = cursor?;
            cursor = node.prev.as_deref();
            Some(&node.block)
        })
    }

    /// Lazily iterate retained lines in insertion order over `range`.
    ///
    /// Bounds are clamped to `0..size()`. Only the blocks overlapping the
    /// range are visited, so tailing the end of a large buffer stays cheap.
    pub fn lines<R: RangeBounds<usize>>(&self, range: R) -> Lines<'_> {
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s.saturating_add(1),
            Bound::Unbounded => 0,
        }
        .min(self.size);
        let end = match range.end_bound() {
            Bound::Included(&e) => e.saturating_add(1),
            Bound::Excluded(&e) => e,
            Bound::Unbounded => self.size,
        }
        .min(self.size)
        .max(start);

        // Walk back from the newest block until the block holding `start`.
        let mut covering: Vec<&Block> = Vec::new();
        let mut first_index = self.size;
        if start < end {
            for block in self.blocks_newest_first() {
                first_index -= block.len();
                covering.push(block);
                if first_index <= start {
                    break;
                }
            }
        }
        covering.reverse();

        Lines {
            blocks: covering,
            block: 0,
            offset: start - first_index.min(start),
            remaining: end - start,
        }
    }

    /// Convenience for the last `count` lines.
    pub fn tail(&self, count: usize) -> Lines<'_> {
        self.lines(self.size.saturating_sub(count)..)
    }
}

/// Iterator returned by [`LineBuffer::lines`].
pub struct Lines<'a> {
    blocks: Vec<&'a Block>,
    block: usize,
    offset: usize,
    remaining: usize,
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        while self.remaining > 0 {
            let block: &'a Block = self.blocks.get(self.block).copied()?;
            if let Some(line) = block.get(self.offset) {
                self.offset += 1;
                self.remaining -= 1;
                return Some(line.as_str());
            }
            self.block += 1;
            self.offset = 0;
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Lines<'_> {}
