use std::collections::{BTreeMap, HashMap};
use roaring::RoaringBitmap;
use crate::analysis::token::Token;
use crate::search::fuzzy::FuzzyAutomaton;

/// Documents containing a term and where the term sits in each
#[derive(Debug, Default)]
pub struct PostingList {
    pub docs: RoaringBitmap,
    pub positions: HashMap<u32, Vec<u32>>,  // ordinal -> sorted positions
}

impl PostingList {
    pub fn doc_freq(&self) -> u64 {
        self.docs.len()
    }

    pub fn term_freq(&self, ordinal: u32) -> u32 {
        self.positions.get(&ordinal).map_or(0, |p| p.len() as u32)
    }
}

/// Matching documents with their scores
#[derive(Debug, Default)]
pub struct Hits {
    pub docs: RoaringBitmap,
    pub scores: HashMap<u32, f32>,
}

impl Hits {
    fn add(&mut self, ordinal: u32, score: f32) {
        self.docs.insert(ordinal);
        *self.scores.entry(ordinal).or_insert(0.0) += score;
    }

    /// Union, summing scores
    pub fn merge(&mut self, other: Hits) {
        for (ordinal, score) in other.scores {
            self.add(ordinal, score);
        }
    }

    /// Intersection, summing scores of the survivors
    pub fn intersect(&mut self, other: &Hits) {
        self.docs &= &other.docs;
        let docs = &self.docs;
        self.scores.retain(|ordinal, _| docs.contains(*ordinal));
        for (ordinal, score) in self.scores.iter_mut() {
            *score += other.scores.get(ordinal).copied().unwrap_or(0.0);
        }
    }

    pub fn scaled(mut self, factor: f32) -> Hits {
        for score in self.scores.values_mut() {
            *score *= factor;
        }
        self
    }
}

/// BM25 parameters
const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Positional inverted index for one text field
#[derive(Debug, Default)]
pub struct FieldIndex {
    terms: BTreeMap<String, PostingList>,
    doc_terms: HashMap<u32, Vec<String>>,  // ordinal -> distinct terms, for removal
    lengths: HashMap<u32, u32>,            // ordinal -> token count
    total_length: u64,
}

impl FieldIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&mut self, ordinal: u32, tokens: &[Token]) {
        self.remove_document(ordinal);

        let mut term_positions: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
        for token in tokens {
            term_positions.entry(token.text.as_str())
                .or_default()
                .push(token.position);
        }

        let mut distinct = Vec::with_capacity(term_positions.len());
        for (term, mut positions) in term_positions {
            positions.sort_unstable();
            let list = self.terms.entry(term.to_string()).or_default();
            list.docs.insert(ordinal);
            list.positions.insert(ordinal, positions);
            distinct.push(term.to_string());
        }

        self.doc_terms.insert(ordinal, distinct);
        self.lengths.insert(ordinal, tokens.len() as u32);
        self.total_length += tokens.len() as u64;
    }

    pub fn remove_document(&mut self, ordinal: u32) {
        let Some(terms) = self.doc_terms.remove(&ordinal) else {
            return;
        };

        for term in terms {
            if let Some(list) = self.terms.get_mut(&term) {
                list.docs.remove(ordinal);
                list.positions.remove(&ordinal);
                if list.docs.is_empty() {
                    self.terms.remove(&term);
                }
            }
        }

        if let Some(len) = self.lengths.remove(&ordinal) {
            self.total_length -= len as u64;
        }
    }

    pub fn doc_count(&self) -> usize {
        self.lengths.len()
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn postings(&self, term: &str) -> Option<&PostingList> {
        self.terms.get(term)
    }

    fn avg_length(&self) -> f32 {
        if self.lengths.is_empty() {
            return 1.0;
        }
        self.total_length as f32 / self.lengths.len() as f32
    }

    fn idf(&self, doc_freq: u64) -> f32 {
        let n = self.doc_count() as f32;
        let df = doc_freq as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    fn bm25(&self, idf: f32, tf: u32, ordinal: u32) -> f32 {
        let tf = tf as f32;
        let doc_len = self.lengths.get(&ordinal).copied().unwrap_or(0) as f32;
        let norm = 1.0 - B + B * (doc_len / self.avg_length());
        idf * tf * (K1 + 1.0) / (tf + K1 * norm)
    }

    /// Documents holding any term within the automaton's edit distance.
    /// Closer variants weigh more.
    pub fn fuzzy(&self, automaton: &FuzzyAutomaton) -> Hits {
        let mut hits = Hits::default();

        for (term, list) in &self.terms {
            let Some(distance) = automaton.distance(term) else {
                continue;
            };
            let idf = self.idf(list.doc_freq());
            let weight = 1.0 / (1.0 + distance as f32);
            for ordinal in &list.docs {
                hits.add(ordinal, weight * self.bm25(idf, list.term_freq(ordinal), ordinal));
            }
        }

        hits
    }

    /// Documents where `terms` occur at consecutive positions
    pub fn phrase(&self, terms: &[String]) -> Hits {
        let mut hits = Hits::default();
        if terms.is_empty() {
            return hits;
        }

        let mut lists = Vec::with_capacity(terms.len());
        for term in terms {
            match self.terms.get(term) {
                Some(list) => lists.push(list),
                None => return hits,
            }
        }

        let mut candidates = lists[0].docs.clone();
        for list in &lists[1..] {
            candidates &= &list.docs;
        }

        let idf: f32 = lists.iter().map(|l| self.idf(l.doc_freq())).sum();
        for ordinal in &candidates {
            let term_positions: Vec<&[u32]> = lists.iter()
                .map(|l| l.positions.get(&ordinal).map_or(&[][..], Vec::as_slice))
                .collect();
            let occurrences = count_adjacent(&term_positions);
            if occurrences > 0 {
                hits.add(ordinal, self.bm25(idf, occurrences, ordinal));
            }
        }

        hits
    }
}

/// Number of start positions from which every following term appears one
/// position later than the previous
fn count_adjacent(term_positions: &[&[u32]]) -> u32 {
    let Some((first, rest)) = term_positions.split_first() else {
        return 0;
    };

    first.iter()
        .filter(|&&start| {
            rest.iter()
                .enumerate()
                .all(|(i, positions)| positions.binary_search(&(start + i as u32 + 1)).is_ok())
        })
        .count() as u32
}
