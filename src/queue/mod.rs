//! Media queue for Playhead
//!
//! An ordered item list with shuffle, repeat modes, and selection
//! navigation. Shuffle stores only a 64-bit seed and derives the permutation
//! on demand, so structural mutations stay O(1) in the unshuffled index
//! space while the shuffle order remains stable until toggled.

use crate::utils::error::{PlayheadError, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// How navigation behaves at the ends of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatMode {
    /// Linear: stop at the ends
    #[default]
    None,

    /// Wrap around at the ends
    Circular,

    /// Re-select the current item
    Single,
}

struct QueueInner<T> {
    items: Vec<T>,
    /// Index into `items`, insertion order
    selection: Option<usize>,
    /// Present while shuffled; the permutation derives from this
    shuffle_seed: Option<u64>,
    repeat_mode: RepeatMode,
}

impl<T> QueueInner<T> {
    /// Navigation order as insertion indices: identity when unshuffled, a
    /// seed-derived permutation otherwise.
    fn navigation_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.items.len()).collect();
        if let Some(seed) = self.shuffle_seed {
            let mut rng = StdRng::seed_from_u64(seed);
            order.shuffle(&mut rng);
        }
        order
    }

    /// Position of the current selection within the navigation order.
    fn navigation_position(&self, order: &[usize]) -> Option<usize> {
        let selected = self.selection?;
        order.iter().position(|&index| index == selected)
    }
}

/// Ordered item list with shuffle, repeat, and selection navigation
///
/// All operations serialize on an internal lock; observers always see the
/// state some complete operation left behind.
pub struct MediaQueue<T> {
    inner: Mutex<QueueInner<T>>,
}

impl<T: Clone + PartialEq> MediaQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: Vec::new(),
                selection: None,
                shuffle_seed: None,
                repeat_mode: RepeatMode::None,
            }),
        }
    }

    /// Items in insertion order.
    pub fn items(&self) -> Vec<T> {
        self.inner.lock().items.clone()
    }

    /// The selected item, if any.
    pub fn selection(&self) -> Option<T> {
        let inner = self.inner.lock();
        inner.selection.map(|index| inner.items[index].clone())
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.inner.lock().repeat_mode
    }

    pub fn set_repeat_mode(&self, mode: RepeatMode) {
        self.inner.lock().repeat_mode = mode;
    }

    pub fn is_shuffled(&self) -> bool {
        self.inner.lock().shuffle_seed.is_some()
    }

    /// Enable or disable shuffle. Enabling always picks a fresh seed;
    /// disabling reverts navigation to insertion order. Selection is
    /// retained either way.
    pub fn set_shuffle_enabled(&self, enabled: bool) {
        let mut inner = self.inner.lock();
        inner.shuffle_seed = if enabled {
            Some(rand::random::<u64>())
        } else {
            None
        };
    }

    /// Append an item. Selection is unchanged.
    pub fn add(&self, item: T) -> Result<()> {
        self.inner.lock().items.push(item);
        Ok(())
    }

    /// Select `item`, or clear the selection if it is not present.
    pub fn select(&self, item: Option<&T>) -> Result<()> {
        let mut inner = self.inner.lock();
        let found =
            item.and_then(|wanted| inner.items.iter().position(|candidate| candidate == wanted));
        inner.selection = found;
        Ok(())
    }

    /// Remove the first occurrence of `item`.
    ///
    /// If it was selected, selection moves to the navigation-order
    /// successor, else the predecessor, else nothing.
    pub fn delete(&self, item: &T) -> Result<()> {
        let mut inner = self.inner.lock();
        let Some(removed) = inner.items.iter().position(|candidate| candidate == item) else {
            return Ok(());
        };

        if inner.selection == Some(removed) {
            let order = inner.navigation_order();
            let position = inner
                .navigation_position(&order)
                .unwrap_or_default();
            inner.selection = order
                .get(position + 1)
                .copied()
                .or_else(|| position.checked_sub(1).map(|previous| order[previous]));
        }

        inner.items.remove(removed);

        // Insertion indices above the removed slot shift down by one.
        inner.selection = match inner.selection {
            Some(index) if index == removed => None,
            Some(index) if index > removed => Some(index - 1),
            other => other,
        };
        Ok(())
    }

    /// Substitute `from` with `to` in place.
    ///
    /// If `from` was selected, the selection becomes `to`.
    pub fn replace(&self, from: &T, to: T) -> Result<()> {
        let mut inner = self.inner.lock();
        let Some(index) = inner.items.iter().position(|candidate| candidate == from) else {
            return Err(PlayheadError::NotFound(
                "item to replace is not in the queue".to_string(),
            ));
        };
        inner.items[index] = to;
        // Selection is index-based, so a selected `from` now points at `to`.
        Ok(())
    }

    /// Empty the queue and clear the selection. Shuffle state and repeat
    /// mode are retained.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.items.clear();
        inner.selection = None;
        Ok(())
    }

    /// Advance the selection in navigation order.
    pub fn next(&self) -> Result<Option<T>> {
        self.step(Direction::Forward)
    }

    /// Move the selection back in navigation order.
    pub fn previous(&self) -> Result<Option<T>> {
        self.step(Direction::Backward)
    }

    fn step(&self, direction: Direction) -> Result<Option<T>> {
        let mut inner = self.inner.lock();
        if inner.items.is_empty() {
            return Ok(None);
        }

        let order = inner.navigation_order();
        let position = inner.navigation_position(&order);

        let target = match (inner.repeat_mode, position) {
            // Re-select the current item, even at the ends.
            (RepeatMode::Single, Some(position)) => Some(order[position]),
            (RepeatMode::Single, None) => None,

            (mode, Some(position)) => {
                let last = order.len() - 1;
                match direction {
                    Direction::Forward if position < last => Some(order[position + 1]),
                    Direction::Forward => match mode {
                        RepeatMode::Circular => Some(order[0]),
                        _ => Some(order[position]),
                    },
                    Direction::Backward if position > 0 => Some(order[position - 1]),
                    Direction::Backward => match mode {
                        RepeatMode::Circular => Some(order[last]),
                        _ => Some(order[position]),
                    },
                }
            }

            // No selection yet: enter the queue at the matching end.
            (_, None) => match direction {
                Direction::Forward => order.first().copied(),
                Direction::Backward => order.last().copied(),
            },
        };

        inner.selection = target;
        Ok(inner.selection.map(|index| inner.items[index].clone()))
    }

    /// Whether `next()` would land on something.
    pub fn has_next(&self) -> bool {
        self.boundary(Direction::Forward)
    }

    /// Whether `previous()` would land on something.
    pub fn has_previous(&self) -> bool {
        self.boundary(Direction::Backward)
    }

    fn boundary(&self, direction: Direction) -> bool {
        let inner = self.inner.lock();
        if inner.items.is_empty() {
            return false;
        }
        match inner.repeat_mode {
            RepeatMode::Circular => true,
            RepeatMode::Single => inner.selection.is_some(),
            RepeatMode::None => {
                let order = inner.navigation_order();
                match inner.navigation_position(&order) {
                    Some(position) => match direction {
                        Direction::Forward => position + 1 < order.len(),
                        Direction::Backward => position > 0,
                    },
                    // Absent selection enters at either end.
                    None => true,
                }
            }
        }
    }
}

impl<T: Clone + PartialEq> Default for MediaQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}
