use std::sync::LazyLock;
use regex::Regex;
use crate::analysis::analyzer::Analyzer;

static QUOTE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([^"]+)""#).unwrap());

/// Raw split of a user query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    pub phrases: Vec<String>,
    pub tokens: Vec<String>,
}

impl ParsedQuery {
    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty() && self.tokens.is_empty()
    }
}

/// Split a query into quoted phrases and bare tokens.
///
/// Only matched quote pairs form phrases; a dangling quote stays part of
/// the surrounding token text. Tokens shorter than two characters are
/// dropped. Everything is lowercased.
pub fn parse_search_query(query: &str) -> ParsedQuery {
    let phrases = QUOTE_RE.captures_iter(query)
        .map(|caps| caps[1].to_lowercase())
        .collect();

    let stripped = QUOTE_RE.replace_all(query, " ").to_lowercase();
    let tokens = stripped.split_whitespace()
        .filter(|t| t.chars().count() >= 2)
        .map(String::from)
        .collect();

    ParsedQuery { phrases, tokens }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Content,
}

/// Leaf query against one field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldQuery {
    /// Terms at consecutive positions
    Phrase { field: Field, terms: Vec<String>, boost: f32 },
    /// Any indexed term within the edit distance of `term`
    Fuzzy { field: Field, term: String, boost: f32 },
}

impl FieldQuery {
    pub fn field(&self) -> Field {
        match self {
            FieldQuery::Phrase { field, .. } | FieldQuery::Fuzzy { field, .. } => *field,
        }
    }

    pub fn boost(&self) -> f32 {
        match self {
            FieldQuery::Phrase { boost, .. } | FieldQuery::Fuzzy { boost, .. } => *boost,
        }
    }
}

/// Matches when any alternative matches; scores add up
#[derive(Debug, Clone, PartialEq)]
pub struct Disjunction {
    pub alternatives: Vec<FieldQuery>,
}

/// Every clause must match
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    pub clauses: Vec<Disjunction>,
}

impl SearchQuery {
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// Turns query text into a conjunction of title-or-content clauses
pub struct QueryParser {
    pub analyzer: Analyzer,
    pub title_boost: f32,
}

impl QueryParser {
    pub fn new(title_boost: f32) -> Self {
        QueryParser {
            analyzer: Analyzer::standard(),
            title_boost,
        }
    }

    pub fn parse(&self, input: &str) -> SearchQuery {
        self.build(&parse_search_query(input))
    }

    pub fn build(&self, parsed: &ParsedQuery) -> SearchQuery {
        let mut clauses = Vec::new();

        for phrase in &parsed.phrases {
            let phrase = phrase.trim();
            if phrase.is_empty() {
                continue;
            }
            // Same analysis as indexing so positions line up
            let terms: Vec<String> = self.analyzer.analyze(phrase)
                .into_iter()
                .map(|t| t.text)
                .collect();
            clauses.push(self.either_field(|field, boost| FieldQuery::Phrase {
                field,
                terms: terms.clone(),
                boost,
            }));
        }

        for token in &parsed.tokens {
            clauses.push(self.either_field(|field, boost| FieldQuery::Fuzzy {
                field,
                term: token.clone(),
                boost,
            }));
        }

        SearchQuery { clauses }
    }

    fn either_field(&self, leaf: impl Fn(Field, f32) -> FieldQuery) -> Disjunction {
        Disjunction {
            alternatives: vec![
                leaf(Field::Title, self.title_boost),
                leaf(Field::Content, 1.0),
            ],
        }
    }
}
