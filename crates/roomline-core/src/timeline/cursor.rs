//! Per-chunk index counters.
//!
//! A chunk tracks one display counter and one state counter per pagination
//! direction. Each counter is `None` until the first insertion in that
//! direction uses it. Forward insertion steps up, backward insertion steps
//! down; both directions share [`ChunkCursor::advance`] so the two sides
//! cannot drift apart.

use serde::Serialize;

use crate::event::PaginationDirection;

use super::UNLINKED_STATE_INDEX;

/// Counters for one pagination direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirectionSlot {
    pub display_index: Option<i64>,
    pub state_index: Option<i64>,
}

/// Display and state counters for both directions of a chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChunkCursor {
    pub forwards: DirectionSlot,
    pub backwards: DirectionSlot,
}

/// Indices assigned to one linked event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub display_index: i64,
    pub state_index: i64,
}

/// A counter stepped outside the range of linked indices.
///
/// The chunk's cursor is left unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{direction} {counter} index out of range")]
pub struct IndexOverflow {
    pub direction: PaginationDirection,
    pub counter: &'static str,
}

const fn step(direction: PaginationDirection) -> i64 {
    match direction {
        PaginationDirection::Forwards => 1,
        PaginationDirection::Backwards => -1,
    }
}

impl ChunkCursor {
    #[must_use]
    pub const fn slot(&self, direction: PaginationDirection) -> &DirectionSlot {
        match direction {
            PaginationDirection::Forwards => &self.forwards,
            PaginationDirection::Backwards => &self.backwards,
        }
    }

    fn slot_mut(&mut self, direction: PaginationDirection) -> &mut DirectionSlot {
        match direction {
            PaginationDirection::Forwards => &mut self.forwards,
            PaginationDirection::Backwards => &mut self.backwards,
        }
    }

    /// Last display index handed out in `direction`, or `default` if none.
    #[must_use]
    pub fn last_display_index(&self, direction: PaginationDirection, default: i64) -> i64 {
        self.slot(direction).display_index.unwrap_or(default)
    }

    /// Last state index recorded in `direction`, or `default` if none.
    #[must_use]
    pub fn last_state_index(&self, direction: PaginationDirection, default: i64) -> i64 {
        self.slot(direction).state_index.unwrap_or(default)
    }

    /// Assign indices to the next event inserted in `direction`.
    ///
    /// The display counter always steps. The state counter steps only when:
    /// - forwards: the *incoming* event is a state event;
    /// - backwards: the event currently first in the chunk (the previous
    ///   backward insertion, or the oldest event) is a state event.
    ///
    /// `first_is_state` is `None` for an empty chunk. Otherwise the event
    /// inherits the counter unchanged, seeded from `state_index_offset`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexOverflow`] if a counter would leave the `i64` range or
    /// land on [`UNLINKED_STATE_INDEX`]; the cursor is not modified.
    pub fn advance(
        &mut self,
        direction: PaginationDirection,
        is_state: bool,
        first_is_state: Option<bool>,
        state_index_offset: i64,
    ) -> Result<Position, IndexOverflow> {
        let step = step(direction);
        let overflow = |counter| IndexOverflow { direction, counter };

        let display_index = self
            .last_display_index(direction, 0)
            .checked_add(step)
            .ok_or_else(|| overflow("display"))?;

        let bump_state = match direction {
            PaginationDirection::Forwards => is_state,
            PaginationDirection::Backwards => first_is_state == Some(true),
        };
        let last_state = self.last_state_index(direction, state_index_offset);
        let state_index = if bump_state {
            last_state.checked_add(step).ok_or_else(|| overflow("state"))?
        } else {
            last_state
        };
        if state_index == UNLINKED_STATE_INDEX {
            return Err(overflow("state"));
        }

        let slot = self.slot_mut(direction);
        slot.display_index = Some(display_index);
        if bump_state {
            slot.state_index = Some(state_index);
        }

        Ok(Position {
            display_index,
            state_index,
        })
    }
}
