//! Trellis (beam search) noise-shaping engine
//!
//! Each input sample extends every surviving path with both output levels,
//! ranks the extensions by accumulated filtered-error energy and keeps the
//! best `num`. A decision becomes final once it is `latency` samples old; it
//! is read from the best path, and paths that disagree with it are dropped.
//!
//! Paths live in a fixed arena of slots. Every buffer is allocated at
//! construction; steady-state processing does not touch the heap.

use crate::filter::LoopFilter;
use crate::settings::TrellisParams;
use tracing::warn;

/// Filter state magnitude beyond which the loop is treated as unstable
const STATE_LIMIT: f64 = 100.0;

/// Saturate a cost so ranking and renormalization stay finite
#[inline]
fn bounded(cost: f64) -> f64 {
    if cost.is_finite() {
        cost
    } else {
        f64::MAX
    }
}

/// One extension of a surviving path
#[derive(Debug, Clone, Copy)]
struct Candidate {
    parent: usize,
    bit: bool,
    cost: f64,
    recent: u64,
}

#[inline]
fn history_bit(history: &[u64], words: usize, ring_bits: usize, slot: usize, pos: u64) -> bool {
    let p = (pos % ring_bits as u64) as usize;
    (history[slot * words + p / 64] >> (p % 64)) & 1 == 1
}

pub(crate) struct TrellisEngine {
    filter: LoopFilter,
    width: usize,
    latency: usize,
    /// Selects the recent bits that identify a trellis state
    mask: u64,
    state_len: usize,
    /// History words per slot
    words: usize,
    ring_bits: usize,

    // Path arena, indexed by slot
    states: Vec<f64>,
    costs: Vec<f64>,
    recent: Vec<u64>,
    history: Vec<u64>,
    /// Live slots, best first
    active: Vec<usize>,

    // Per-sample scratch
    candidates: Vec<Candidate>,
    candidate_states: Vec<f64>,
    ranking: Vec<usize>,
    survivors: Vec<usize>,
    targets: Vec<usize>,
    claimed: Vec<bool>,

    extended: u64,
    finalized: u64,
    cost_offset: f64,
    resets: u64,
}

impl TrellisEngine {
    /// Build an engine; `params` must already be validated
    pub(crate) fn new(filter: LoopFilter, params: TrellisParams) -> Self {
        let width = params.num as usize;
        let latency = params.latency as usize;
        let state_len = filter.order();
        let words = (latency + 1).div_ceil(64);
        let mask = if params.order >= 64 {
            u64::MAX
        } else {
            (1u64 << params.order) - 1
        };

        let mut active = Vec::with_capacity(width);
        active.push(0);

        Self {
            filter,
            width,
            latency,
            mask,
            state_len,
            words,
            ring_bits: words * 64,
            states: vec![0.0; width * state_len],
            costs: vec![0.0; width],
            recent: vec![0; width],
            history: vec![0; width * words],
            active,
            candidates: Vec::with_capacity(2 * width),
            candidate_states: vec![0.0; 2 * width * state_len],
            ranking: Vec::with_capacity(2 * width),
            survivors: Vec::with_capacity(width),
            targets: Vec::with_capacity(width),
            claimed: vec![false; width],
            extended: 0,
            finalized: 0,
            cost_offset: 0.0,
            resets: 0,
        }
    }

    pub(crate) fn filter(&self) -> &LoopFilter {
        &self.filter
    }

    pub(crate) fn latency(&self) -> usize {
        self.latency
    }

    /// Decisions made but not yet final
    pub(crate) fn pending(&self) -> usize {
        (self.extended - self.finalized) as usize
    }

    /// Number of live candidate paths
    pub(crate) fn candidates(&self) -> usize {
        self.active.len()
    }

    /// Total filtered-error energy of the best path
    pub(crate) fn accumulated_cost(&self) -> f64 {
        self.cost_offset + self.active.first().map_or(0.0, |&slot| self.costs[slot])
    }

    /// Times the stability guard cleared the loop filter
    pub(crate) fn resets(&self) -> u64 {
        self.resets
    }

    /// Feed one sample (already scaled); returns the bit finalized by it
    pub(crate) fn push(&mut self, x: f64) -> Option<bool> {
        self.extend(x);
        self.prune();
        self.commit();
        self.extended += 1;
        self.finalize()
    }

    /// Finalize the oldest undecided bit of the best path without new input
    ///
    /// Returns `None` once every decision has been emitted; the candidate
    /// set is empty from then on.
    pub(crate) fn flush_one(&mut self) -> Option<bool> {
        self.active.truncate(1);

        if self.finalized == self.extended {
            self.active.clear();
            return None;
        }

        let &best = self.active.first()?;
        let bit = history_bit(
            &self.history,
            self.words,
            self.ring_bits,
            best,
            self.finalized,
        );
        self.finalized += 1;
        Some(bit)
    }

    fn extend(&mut self, x: f64) {
        let sl = self.state_len;
        self.candidates.clear();

        for i in 0..self.active.len() {
            let slot = self.active[i];
            for bit in [false, true] {
                let level = if bit { 1.0 } else { -1.0 };
                let index = self.candidates.len();
                let state = &mut self.candidate_states[index * sl..(index + 1) * sl];
                state.copy_from_slice(&self.states[slot * sl..(slot + 1) * sl]);

                let e = self.filter.filter_error(state, level - x);
                self.candidates.push(Candidate {
                    parent: slot,
                    bit,
                    cost: bounded(self.costs[slot] + e * e),
                    recent: ((self.recent[slot] << 1) | u64::from(bit)) & self.mask,
                });
            }
        }
    }

    /// Rank by cost (ties by generation order), merge equal trellis states
    fn prune(&mut self) {
        let candidates = &self.candidates;

        self.ranking.clear();
        self.ranking.extend(0..candidates.len());
        self.ranking.sort_unstable_by(|&a, &b| {
            candidates[a]
                .cost
                .total_cmp(&candidates[b].cost)
                .then(a.cmp(&b))
        });

        self.survivors.clear();
        for &index in &self.ranking {
            let recent = candidates[index].recent;
            if self
                .survivors
                .iter()
                .any(|&kept| candidates[kept].recent == recent)
            {
                continue;
            }
            self.survivors.push(index);
            if self.survivors.len() == self.width {
                break;
            }
        }
    }

    /// Move survivors into arena slots
    fn commit(&mut self) {
        let sl = self.state_len;
        let words = self.words;

        // The first surviving child of a path inherits its slot and history
        self.claimed.fill(false);
        self.targets.clear();
        for &index in &self.survivors {
            let parent = self.candidates[index].parent;
            if self.claimed[parent] {
                self.targets.push(usize::MAX);
            } else {
                self.claimed[parent] = true;
                self.targets.push(parent);
            }
        }

        // Other children fork into slots no survivor descends from
        let mut free = 0;
        for i in 0..self.survivors.len() {
            if self.targets[i] != usize::MAX {
                continue;
            }
            while self.claimed[free] {
                free += 1;
            }
            self.claimed[free] = true;
            self.targets[i] = free;

            let parent = self.candidates[self.survivors[i]].parent;
            self.history
                .copy_within(parent * words..(parent + 1) * words, free * words);
        }

        let pos = (self.extended % self.ring_bits as u64) as usize;
        let (word, bit_mask) = (pos / 64, 1u64 << (pos % 64));

        self.active.clear();
        for i in 0..self.survivors.len() {
            let index = self.survivors[i];
            let candidate = self.candidates[index];
            let slot = self.targets[i];

            self.states[slot * sl..(slot + 1) * sl]
                .copy_from_slice(&self.candidate_states[index * sl..(index + 1) * sl]);
            self.costs[slot] = candidate.cost;
            self.recent[slot] = candidate.recent;

            let cell = &mut self.history[slot * words + word];
            if candidate.bit {
                *cell |= bit_mask;
            } else {
                *cell &= !bit_mask;
            }

            self.active.push(slot);
        }

        let base = self.costs[self.active[0]];
        for &slot in &self.active {
            self.costs[slot] -= base;
        }
        self.cost_offset = bounded(self.cost_offset + base);

        let best = self.active[0];
        if self.states[best * sl..(best + 1) * sl]
            .iter()
            .any(|s| !s.is_finite() || s.abs() > STATE_LIMIT)
        {
            for &slot in &self.active {
                self.states[slot * sl..(slot + 1) * sl].fill(0.0);
            }
            self.resets += 1;
            warn!(
                filter = self.filter.name(),
                sample = self.extended,
                "Loop filter unstable, state cleared"
            );
        }
    }

    fn finalize(&mut self) -> Option<bool> {
        if self.extended <= self.latency as u64 {
            return None;
        }

        let pos = self.finalized;
        let (words, ring_bits) = (self.words, self.ring_bits);
        let history = &self.history;
        let bit = history_bit(history, words, ring_bits, self.active[0], pos);

        // Paths that chose otherwise no longer describe the emitted stream
        self.active
            .retain(|&slot| history_bit(history, words, ring_bits, slot, pos) == bit);

        self.finalized += 1;
        Some(bit)
    }

    #[cfg(test)]
    fn live_slots_agree_at(&self, pos: u64) -> bool {
        let bit_of = |slot| history_bit(&self.history, self.words, self.ring_bits, slot, pos);
        let first = bit_of(self.active[0]);
        self.active.iter().all(|&slot| bit_of(slot) == first)
    }

    #[cfg(test)]
    fn live_states_cleared(&self) -> bool {
        let sl = self.state_len;
        self.active
            .iter()
            .all(|&slot| self.states[slot * sl..(slot + 1) * sl].iter().all(|s| *s == 0.0))
    }
}
