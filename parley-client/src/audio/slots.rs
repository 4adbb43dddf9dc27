//! Rotating frame slots for capture and playback
//!
//! The original rotation scheme kept a fixed array of hardware buffers and
//! tracked their lifetime by hand. Here each slot owns its samples and
//! carries an explicit state tag; the cycle Idle → Armed → Filled →
//! Draining → Idle never skips a state, and a slot cannot be re-armed
//! before it was drained. Error paths reset the whole ring instead of
//! freeing buffers the hardware may still own.

// =============================================================================
// Slot State
// =============================================================================

/// Lifecycle state of one frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Free, holds no useful data
    Idle,
    /// Queued to the hardware, being recorded or rendered into
    Armed,
    /// Hardware signalled completion, data valid
    Filled,
    /// Data being copied out or submitted downstream
    Draining,
}

/// Error manipulating the ring
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotError {
    /// No idle slot available to arm
    NoIdleSlot,
    /// Slot index outside the ring
    OutOfRange(usize),
    /// Requested transition is not the next step of the cycle
    BadTransition {
        /// Slot index
        slot: usize,
        /// Its current state
        from: SlotState,
        /// The state the caller asked for
        to: SlotState,
    },
}

impl std::fmt::Display for SlotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotError::NoIdleSlot => write!(f, "no idle slot available"),
            SlotError::OutOfRange(idx) => write!(f, "slot {} out of range", idx),
            SlotError::BadTransition { slot, from, to } => {
                write!(f, "slot {}: invalid transition {:?} -> {:?}", slot, from, to)
            }
        }
    }
}

// =============================================================================
// Frame Ring
// =============================================================================

struct Slot {
    state: SlotState,
    samples: Vec<i16>,
    /// Arm order, for draining in-flight slots oldest-first
    seq: u64,
}

/// Fixed ring of owned frame buffers with strict state tracking
///
/// Capture uses 4 slots, playback 2. The ring is single-threaded by
/// design: exactly one loop owns it for its lifetime.
pub struct FrameRing {
    slots: Vec<Slot>,
    cursor: usize,
    next_seq: u64,
}

impl FrameRing {
    /// Create a ring of `count` idle slots holding `frame_len` samples each
    pub fn new(count: usize, frame_len: usize) -> Self {
        let slots = (0..count)
            .map(|_| Slot {
                state: SlotState::Idle,
                samples: vec![0i16; frame_len],
                seq: 0,
            })
            .collect();
        Self {
            slots,
            cursor: 0,
            next_seq: 1,
        }
    }

    /// Number of slots in the ring
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the ring has no slots
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current state of a slot
    pub fn state(&self, idx: usize) -> Result<SlotState, SlotError> {
        self.slots
            .get(idx)
            .map(|s| s.state)
            .ok_or(SlotError::OutOfRange(idx))
    }

    /// Slots currently armed or filled (queued to hardware, not yet drained)
    pub fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Armed | SlotState::Filled))
            .count()
    }

    /// Arm the next idle slot in rotation order
    ///
    /// # Errors
    ///
    /// Returns `NoIdleSlot` when every slot is still in flight or draining.
    pub fn arm_next(&mut self) -> Result<usize, SlotError> {
        for offset in 0..self.slots.len() {
            let idx = (self.cursor + offset) % self.slots.len();
            if self.slots[idx].state == SlotState::Idle {
                self.slots[idx].state = SlotState::Armed;
                self.slots[idx].seq = self.next_seq;
                self.next_seq += 1;
                self.cursor = (idx + 1) % self.slots.len();
                return Ok(idx);
            }
        }
        Err(SlotError::NoIdleSlot)
    }

    /// Mutable view of an armed slot's buffer for the hardware to fill
    pub fn armed_buffer_mut(&mut self, idx: usize) -> Result<&mut [i16], SlotError> {
        let slot = self.slots.get_mut(idx).ok_or(SlotError::OutOfRange(idx))?;
        if slot.state != SlotState::Armed {
            return Err(SlotError::BadTransition {
                slot: idx,
                from: slot.state,
                to: SlotState::Filled,
            });
        }
        Ok(&mut slot.samples)
    }

    /// Mark an armed slot as filled (hardware completion)
    pub fn mark_filled(&mut self, idx: usize) -> Result<(), SlotError> {
        self.transition(idx, SlotState::Armed, SlotState::Filled)
    }

    /// Begin draining a filled slot; returns its samples
    pub fn begin_drain(&mut self, idx: usize) -> Result<&[i16], SlotError> {
        self.transition(idx, SlotState::Filled, SlotState::Draining)?;
        Ok(&self.slots[idx].samples)
    }

    /// Return a drained slot to idle
    pub fn retire(&mut self, idx: usize) -> Result<(), SlotError> {
        self.transition(idx, SlotState::Draining, SlotState::Idle)
    }

    /// Oldest slot still armed or filled, by arm order
    ///
    /// Used when draining in-flight frames on key release: frames must go
    /// downstream in the order they were armed.
    pub fn oldest_in_flight(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s.state, SlotState::Armed | SlotState::Filled))
            .min_by_key(|(_, s)| s.seq)
            .map(|(idx, _)| idx)
    }

    /// Force every slot back to idle
    ///
    /// The error-path escape hatch: the caller has already stopped the
    /// device, so no hardware I/O can still land in these buffers.
    pub fn force_reset(&mut self) {
        for slot in &mut self.slots {
            slot.state = SlotState::Idle;
        }
        self.cursor = 0;
    }

    fn transition(
        &mut self,
        idx: usize,
        expect: SlotState,
        to: SlotState,
    ) -> Result<(), SlotError> {
        let slot = self.slots.get_mut(idx).ok_or(SlotError::OutOfRange(idx))?;
        if slot.state != expect {
            return Err(SlotError::BadTransition {
                slot: idx,
                from: slot.state,
                to,
            });
        }
        slot.state = to;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
