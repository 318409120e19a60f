#![forbid(unsafe_code)]

//! Folding a stream of list edits into one contiguous splice.
//!
//! The aggregator tracks a single *window* over the list: the original
//! elements `original[from..from + removed]` have been replaced by `added`.
//! Everything before and after the window is untouched, so at any point
//!
//! ```text
//! current = original[..from] ++ added ++ original[from + removed..]
//! ```
//!
//! An edit that lands outside the window grows it by re-reading the
//! untouched neighbors from the original list. On completion the window is
//! trimmed of any common prefix and suffix with the original, which makes a
//! round trip (insert then remove the same element) vanish.

use std::fmt;

/// One structural edit, in current-list coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEdit<E> {
    Added { at: usize, elements: Vec<E> },
    Removed { at: usize, count: usize },
    Replaced { at: usize, count: usize, elements: Vec<E> },
}

/// A single splice turning the original list into the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListDelta<E> {
    pub at: usize,
    pub removed: usize,
    pub added: Vec<E>,
}

impl<E> ListDelta<E> {
    /// The explicit no-op splice.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            at: 0,
            removed: 0,
            added: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed == 0 && self.added.is_empty()
    }
}

impl<E: Clone> ListDelta<E> {
    /// Apply the splice to `list`.
    ///
    /// # Panics
    ///
    /// Panics if the splice range is out of bounds for `list`.
    pub fn apply_to(&self, list: &mut Vec<E>) {
        list.splice(self.at..self.at + self.removed, self.added.iter().cloned());
    }
}

#[derive(Clone)]
struct Window<E> {
    from: usize,
    removed: usize,
    added: Vec<E>,
}

impl<E: Clone> Window<E> {
    /// Grow the window so it covers `start..end` in current coordinates.
    fn cover(&mut self, start: usize, end: usize, original: &[E]) {
        if start < self.from {
            let lead = &original[start..self.from];
            self.added.splice(0..0, lead.iter().cloned());
            self.removed += self.from - start;
            self.from = start;
        }
        let window_end = self.from + self.added.len();
        if end > window_end {
            let extra = end - window_end;
            let source = self.from + self.removed;
            self.added.extend_from_slice(&original[source..source + extra]);
            self.removed += extra;
        }
    }
}

/// Accumulates [`ListEdit`]s relative to an unchanging original list.
#[derive(Clone, Default)]
pub struct ListChangeAggregator<E> {
    window: Option<Window<E>>,
}

impl<E: fmt::Debug> fmt::Debug for ListChangeAggregator<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.window {
            None => f.write_str("ListChangeAggregator(empty)"),
            Some(w) => f
                .debug_struct("ListChangeAggregator")
                .field("from", &w.from)
                .field("removed", &w.removed)
                .field("added", &w.added)
                .finish(),
        }
    }
}

impl<E: Clone + PartialEq> ListChangeAggregator<E> {
    #[must_use]
    pub fn new() -> Self {
        Self { window: None }
    }

    /// True when no edit has been recorded since the last completion.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_none()
    }

    /// Record `edit`. `original` must be the list as it was at the last
    /// completion.
    pub fn add(&mut self, edit: ListEdit<E>, original: &[E]) {
        match edit {
            ListEdit::Added { at, elements } => self.insert(at, elements, original),
            ListEdit::Removed { at, count } => self.remove(at, count, original),
            ListEdit::Replaced {
                at,
                count,
                elements,
            } => {
                self.remove(at, count, original);
                self.insert(at, elements, original);
            }
        }
    }

    /// The net splice so far, without resetting.
    #[must_use]
    pub fn peek(&self, original: &[E]) -> ListDelta<E> {
        match &self.window {
            None => ListDelta::empty(),
            Some(window) => trimmed(window, original),
        }
    }

    /// The net splice so far; resets the aggregator.
    pub fn complete(&mut self, original: &[E]) -> ListDelta<E> {
        match self.window.take() {
            None => ListDelta::empty(),
            Some(window) => trimmed(&window, original),
        }
    }

    fn insert(&mut self, at: usize, elements: Vec<E>, original: &[E]) {
        if elements.is_empty() {
            return;
        }
        match &mut self.window {
            None => {
                self.window = Some(Window {
                    from: at,
                    removed: 0,
                    added: elements,
                });
            }
            Some(window) => {
                window.cover(at, at, original);
                let offset = at - window.from;
                window.added.splice(offset..offset, elements);
            }
        }
    }

    fn remove(&mut self, at: usize, count: usize, original: &[E]) {
        if count == 0 {
            return;
        }
        match &mut self.window {
            None => {
                self.window = Some(Window {
                    from: at,
                    removed: count,
                    added: Vec::new(),
                });
            }
            Some(window) => {
                window.cover(at, at + count, original);
                let offset = at - window.from;
                window.added.drain(offset..offset + count);
            }
        }
    }
}

fn trimmed<E: Clone + PartialEq>(window: &Window<E>, original: &[E]) -> ListDelta<E> {
    let replaced = &original[window.from..window.from + window.removed];
    let prefix = replaced
        .iter()
        .zip(&window.added)
        .take_while(|(a, b)| a == b)
        .count();
    let replaced = &replaced[prefix..];
    let added = &window.added[prefix..];
    let suffix = replaced
        .iter()
        .rev()
        .zip(added.iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let removed = replaced.len() - suffix;
    let added = &added[..added.len() - suffix];
    if removed == 0 && added.is_empty() {
        return ListDelta::empty();
    }
    ListDelta {
        at: window.from + prefix,
        removed,
        added: added.to_vec(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn replay(original: &[char], edits: Vec<ListEdit<char>>) -> (ListDelta<char>, Vec<char>) {
        let mut agg = ListChangeAggregator::new();
        let mut current = original.to_vec();
        for edit in edits {
            match &edit {
                ListEdit::Added { at, elements } => {
                    current.splice(*at..*at, elements.iter().cloned());
                }
                ListEdit::Removed { at, count } => {
                    current.drain(*at..*at + count);
                }
                ListEdit::Replaced {
                    at,
                    count,
                    elements,
                } => {
                    current.splice(*at..*at + count, elements.iter().cloned());
                }
            }
            agg.add(edit, original);
        }
        let delta = agg.complete(original);
        let mut rebuilt = original.to_vec();
        delta.apply_to(&mut rebuilt);
        assert_eq!(rebuilt, current);
        assert!(agg.is_empty());
        (delta, current)
    }

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn insert_then_remove_is_noop() {
        let (delta, _) = replay(
            &chars("abc"),
            vec![
                ListEdit::Added {
                    at: 1,
                    elements: vec!['x'],
                },
                ListEdit::Removed { at: 1, count: 1 },
            ],
        );
        assert_eq!(delta, ListDelta::empty());
    }

    #[test]
    fn disjoint_edits_merge_into_covering_splice() {
        let (delta, current) = replay(
            &chars("abcdef"),
            vec![
                ListEdit::Removed { at: 4, count: 1 },
                ListEdit::Added {
                    at: 1,
                    elements: vec!['X'],
                },
            ],
        );
        assert_eq!(current, chars("aXbcdf"));
        assert_eq!(
            delta,
            ListDelta {
                at: 1,
                removed: 4,
                added: chars("Xbcd"),
            }
        );
    }

    #[test]
    fn removing_before_window_extends_left() {
        let (delta, current) = replay(
            &chars("abcd"),
            vec![
                ListEdit::Replaced {
                    at: 2,
                    count: 1,
                    elements: vec!['Z'],
                },
                ListEdit::Removed { at: 0, count: 2 },
            ],
        );
        assert_eq!(current, chars("Zd"));
        assert_eq!(
            delta,
            ListDelta {
                at: 0,
                removed: 3,
                added: vec!['Z'],
            }
        );
    }

    #[test]
    fn replacing_with_equal_values_trims_to_nothing() {
        let (delta, _) = replay(
            &chars("abc"),
            vec![ListEdit::Replaced {
                at: 0,
                count: 3,
                elements: chars("abc"),
            }],
        );
        assert!(delta.is_empty());
    }

    #[test]
    fn peek_does_not_reset() {
        let original = chars("ab");
        let mut agg = ListChangeAggregator::new();
        agg.add(
            ListEdit::Added {
                at: 2,
                elements: vec!['c'],
            },
            &original,
        );
        assert_eq!(agg.peek(&original).added, vec!['c']);
        assert!(!agg.is_empty());
        assert_eq!(agg.complete(&original).at, 2);
        assert_eq!(agg.complete(&original), ListDelta::empty());
    }
}
