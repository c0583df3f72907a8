use std::sync::LazyLock;
use levenshtein_automata::{Distance, LevenshteinAutomatonBuilder, DFA};

// Building the parametric tables is the expensive part, so one builder per distance
static BUILDER_D1: LazyLock<LevenshteinAutomatonBuilder> =
    LazyLock::new(|| LevenshteinAutomatonBuilder::new(1, false));
static BUILDER_D2: LazyLock<LevenshteinAutomatonBuilder> =
    LazyLock::new(|| LevenshteinAutomatonBuilder::new(2, false));

/// Terms shorter than five characters tolerate one edit, longer ones two
pub fn fuzziness(term: &str) -> u8 {
    if term.chars().count() < 5 { 1 } else { 2 }
}

/// Automaton for fuzzy matching with edit distance
pub struct FuzzyAutomaton {
    /// The target term to match
    term: String,

    /// Maximum allowed edit distance (1 or 2)
    max_edit_distance: u8,

    dfa: DFA,
}

impl FuzzyAutomaton {
    pub fn new(term: impl Into<String>, max_edit_distance: u8) -> Self {
        let term = term.into();
        let max_edit_distance = max_edit_distance.clamp(1, 2);
        let builder = if max_edit_distance == 1 { &*BUILDER_D1 } else { &*BUILDER_D2 };
        let dfa = builder.build_dfa(&term);

        Self {
            term,
            max_edit_distance,
            dfa,
        }
    }

    /// Automaton with the default fuzziness for the term's length
    pub fn for_term(term: impl Into<String>) -> Self {
        let term = term.into();
        let distance = fuzziness(&term);
        Self::new(term, distance)
    }

    /// Edit distance to `candidate` if it is within range
    pub fn distance(&self, candidate: &str) -> Option<u8> {
        // Cheap length filter before walking the DFA
        let (a, b) = (self.term.chars().count(), candidate.chars().count());
        if a.abs_diff(b) > self.max_edit_distance as usize {
            return None;
        }

        let mut state = self.dfa.initial_state();
        for &byte in candidate.as_bytes() {
            state = self.dfa.transition(state, byte);
        }

        match self.dfa.distance(state) {
            Distance::Exact(d) if d <= self.max_edit_distance => Some(d),
            _ => None,
        }
    }
}
