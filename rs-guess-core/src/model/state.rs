use std::collections::BTreeMap;

use rand::Rng;

use serde::{Deserialize, Serialize};

/// Raw observation counts for one context, accumulated during training.
///
/// Conceptually, this is a node in a Markov chain whose outgoing edges are
/// weighted by their number of observations. Counts are turned into a
/// [`State`] once the whole corpus has been scanned.
///
/// ## Invariants
/// - Each transition occurrence count is strictly positive
#[derive(Clone, Debug, Default)]
pub(crate) struct TransitionCounts {
	/// Example: { 'e' => 42, 'a' => 3 }
	transitions: BTreeMap<char, usize>,
}

impl TransitionCounts {
	/// Records an occurrence of a transition toward `next_char`.
	pub(crate) fn add_transition(&mut self, next_char: char) {
		*self.transitions.entry(next_char).or_insert(0) += 1;
	}

	/// Merges counts gathered by another worker for the same context.
	pub(crate) fn merge(&mut self, other: &Self) {
		for (next_char, occurrence) in &other.transitions {
			*self.transitions.entry(*next_char).or_insert(0) += *occurrence;
		}
	}

	/// Divides every count by the context total.
	pub(crate) fn normalize(&self) -> State {
		let total: usize = self.transitions.values().sum();
		let transitions = self
			.transitions
			.iter()
			.map(|(next_char, occurrence)| (*next_char, *occurrence as f64 / total as f64))
			.collect();
		State { transitions }
	}
}

/// Normalized next-character distribution of one context.
///
/// Serialized transparently as `{ character: weight }` so the persisted
/// transition table reads as `context -> { character -> weight }`.
///
/// ## Invariants
/// - Weights are strictly positive and sum to 1 (within float tolerance)
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct State {
	transitions: BTreeMap<char, f64>,
}

impl State {
	/// Iterates over `(character, weight)` pairs in character order.
	pub fn transitions(&self) -> impl Iterator<Item = (char, f64)> + '_ {
		self.transitions.iter().map(|(c, w)| (*c, *w))
	}

	/// Weight of a single outcome, `None` if it was never observed.
	pub fn weight(&self, next_char: char) -> Option<f64> {
		self.transitions.get(&next_char).copied()
	}

	/// Sum of all outcome weights.
	pub fn total_weight(&self) -> f64 {
		self.transitions.values().sum()
	}

	pub fn is_empty(&self) -> bool {
		self.transitions.is_empty()
	}

	/// Picks the next character using weighted random sampling.
	///
	/// Walks the outcomes subtracting weights from a uniform draw scaled to
	/// the total weight. Returns `None` if the state has no transitions.
	pub fn predict<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<char> {
		let total = self.total_weight();
		if self.transitions.is_empty() || total <= 0.0 {
			return None;
		}

		let mut r = rng.random::<f64>() * total;

		let mut fallback: Option<char> = None;
		for (next_char, weight) in &self.transitions {
			if r < *weight {
				return Some(*next_char);
			}
			r -= weight;
			fallback = Some(*next_char);
		}

		// Float rounding can leave a tiny remainder past the last bucket
		fallback
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	fn counts(chars: &str) -> TransitionCounts {
		let mut counts = TransitionCounts::default();
		for c in chars.chars() {
			counts.add_transition(c);
		}
		counts
	}

	#[test]
	fn normalize_divides_by_context_total() {
		let state = counts("aab").normalize();
		assert!((state.weight('a').unwrap() - 2.0 / 3.0).abs() < 1e-12);
		assert!((state.weight('b').unwrap() - 1.0 / 3.0).abs() < 1e-12);
		assert!((state.total_weight() - 1.0).abs() < 1e-9);
	}

	#[test]
	fn merge_sums_counts() {
		let mut left = counts("ab");
		left.merge(&counts("bb"));
		let state = left.normalize();
		assert!((state.weight('b').unwrap() - 0.75).abs() < 1e-12);
	}

	#[test]
	fn predict_only_returns_observed_characters() {
		let state = counts("xyz").normalize();
		let mut rng = StdRng::seed_from_u64(7);
		for _ in 0..200 {
			let c = state.predict(&mut rng).unwrap();
			assert!("xyz".contains(c));
		}
	}

	#[test]
	fn predict_on_empty_state_is_none() {
		let state = State::default();
		assert!(state.predict(&mut StdRng::seed_from_u64(1)).is_none());
	}

	#[test]
	fn serializes_as_plain_map() {
		let state = counts("ab").normalize();
		let json = serde_json::to_string(&state).unwrap();
		assert_eq!(json, r#"{"a":0.5,"b":0.5}"#);
	}
}
