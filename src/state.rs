//! Recurrent hidden state carried between frames.

use crate::tensor::{Tensor, TensorLedger};

/// Number of recurrent tensors the matting network threads through frames.
pub const RECURRENT_TENSORS: usize = 4;

/// The four hidden-state tensors `r1..r4`.
#[derive(Debug)]
pub struct RecurrentState {
    tensors: [Tensor; RECURRENT_TENSORS],
}

impl RecurrentState {
    pub fn new(r1: Tensor, r2: Tensor, r3: Tensor, r4: Tensor) -> Self {
        Self {
            tensors: [r1, r2, r3, r4],
        }
    }

    /// Scalar zero for each of r1..r4, meaning "no prior state".
    pub fn placeholder(ledger: &TensorLedger) -> Self {
        Self::new(
            ledger.scalar(0.0),
            ledger.scalar(0.0),
            ledger.scalar(0.0),
            ledger.scalar(0.0),
        )
    }

    /// Hidden tensor `r{index + 1}`.
    ///
    /// # Panics
    /// If `index >= 4`.
    pub fn get(&self, index: usize) -> &Tensor {
        &self.tensors[index]
    }

    pub fn tensors(&self) -> &[Tensor; RECURRENT_TENSORS] {
        &self.tensors
    }

    pub fn is_placeholder(&self) -> bool {
        self.tensors.iter().all(Tensor::is_placeholder)
    }

    pub fn shapes(&self) -> [Vec<usize>; RECURRENT_TENSORS] {
        [0, 1, 2, 3].map(|i| self.tensors[i].shape().to_vec())
    }

    pub fn into_tensors(self) -> [Tensor; RECURRENT_TENSORS] {
        self.tensors
    }
}

/// Sole holder of the current [`RecurrentState`].
///
/// Always holds exactly one state. `promote` and `reset` take `&mut self`, so
/// whoever owns the store is its only writer, and the state returned by
/// `current` cannot be released while it is borrowed.
#[derive(Debug)]
pub struct RecurrentStore {
    current: RecurrentState,
    ledger: TensorLedger,
    generation: u64,
}

impl RecurrentStore {
    pub fn new(ledger: &TensorLedger) -> Self {
        Self {
            current: RecurrentState::placeholder(ledger),
            ledger: ledger.clone(),
            generation: 0,
        }
    }

    pub fn current(&self) -> &RecurrentState {
        &self.current
    }

    /// Install `next` as current and release the state it replaces.
    pub fn promote(&mut self, next: RecurrentState) {
        let stale = std::mem::replace(&mut self.current, next);
        let released = self.ledger.release_all(stale.into_tensors());
        self.generation += 1;
        tracing::trace!(generation = self.generation, released, "recurrent state promoted");
    }

    /// Release the current state and go back to the placeholder.
    pub fn reset(&mut self) {
        let stale = std::mem::replace(&mut self.current, RecurrentState::placeholder(&self.ledger));
        self.ledger.release_all(stale.into_tensors());
        self.generation = 0;
        tracing::debug!("recurrent state reset to placeholder");
    }

    /// Number of promotions since construction or the last reset.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn state_filled(ledger: &TensorLedger, value: f32, channels: [usize; 4]) -> RecurrentState {
        let [c1, c2, c3, c4] = channels;
        RecurrentState::new(
            ledger.track(Array4::from_elem((1, 32, 32, c1), value)),
            ledger.track(Array4::from_elem((1, 16, 16, c2), value)),
            ledger.track(Array4::from_elem((1, 8, 8, c3), value)),
            ledger.track(Array4::from_elem((1, 4, 4, c4), value)),
        )
    }

    #[test]
    fn starts_with_scalar_zero_placeholders() {
        let ledger = TensorLedger::new();
        let store = RecurrentStore::new(&ledger);

        assert!(store.current().is_placeholder());
        for tensor in store.current().tensors() {
            assert_eq!(tensor.ndim(), 0);
            assert_eq!(tensor.array().first().copied(), Some(0.0));
        }
        assert_eq!(ledger.outstanding(), 4);
    }

    #[test]
    fn promote_releases_previous_state_once() {
        let ledger = TensorLedger::new();
        let mut store = RecurrentStore::new(&ledger);

        store.promote(state_filled(&ledger, 0.5, [16, 20, 40, 64]));
        assert_eq!(ledger.allocated(), 8);
        assert_eq!(ledger.released(), 4);
        assert_eq!(ledger.outstanding(), 4);
        assert_eq!(store.generation(), 1);
        assert_eq!(store.current().get(2).shape(), &[1, 8, 8, 40]);

        store.promote(state_filled(&ledger, 0.25, [16, 20, 40, 64]));
        assert_eq!(ledger.outstanding(), 4);
        assert_eq!(store.generation(), 2);
    }

    #[test]
    fn reset_returns_to_placeholder() {
        let ledger = TensorLedger::new();
        let mut store = RecurrentStore::new(&ledger);
        store.promote(state_filled(&ledger, 1.0, [4, 4, 4, 4]));

        store.reset();
        assert!(store.current().is_placeholder());
        assert_eq!(store.generation(), 0);
        assert_eq!(ledger.outstanding(), 4);

        drop(store);
        assert_eq!(ledger.outstanding(), 0);
    }
}
