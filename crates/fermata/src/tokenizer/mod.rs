//! Tokenizer vocabulary: categorization oracle and note decoding.
//!
//! The generation core treats the tokenizer as an oracle: given a token id it
//! reports the token's grammatical category and decodes it into musical
//! symbol fragments. The oracle is consumed through the
//! [`TokenCategoryOracle`] trait so tests and alternative vocabularies can
//! stand in for the file-backed [`MidiTokenizer`].
//!
//! A token decodes to one or more *symbols* (multi-symbol decoding covers
//! merged vocabularies, where one model token stands for a run of base
//! symbols). Each symbol carries a category and a value: a pitch number, a
//! velocity, a duration or time-shift in lib ticks, or a position within the
//! current bar.

mod converter;

pub use converter::{ConverterConfig, NoteConverter};

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::TokenizerError;
use crate::range_group::RangeGroup;

/// A token id in the model's vocabulary.
pub type Token = i32;

/// A decoded symbol id in the tokenizer's base symbol table.
pub type SymbolId = i32;

/// Grammatical category of a decoded symbol (and, via its first symbol, of a
/// token).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenCategory {
    /// A note pitch.
    Pitch,
    /// A note velocity.
    Velocity,
    /// A note duration.
    Duration,
    /// A relative time advance.
    TimeShift,
    /// An absolute position within the current bar.
    Position,
    /// A bar boundary marker.
    BarBoundary,
    /// Anything else (padding, specials, unrecognized).
    Other,
}

/// One entry of the base symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    /// The symbol's category.
    pub kind: TokenCategory,
    /// Category-dependent value: MIDI pitch for [`TokenCategory::Pitch`],
    /// velocity for [`TokenCategory::Velocity`], lib ticks for
    /// [`TokenCategory::Duration`] / [`TokenCategory::TimeShift`] /
    /// [`TokenCategory::Position`]. Unused otherwise.
    #[serde(default)]
    pub value: i64,
}

/// Serialized form of a tokenizer vocabulary.
///
/// When `decoded` is absent, token ids map one-to-one onto symbol ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// The base symbol table; symbol id is the index.
    pub symbols: Vec<Symbol>,

    /// Per-token decode table: token id to the symbols it expands to.
    #[serde(default)]
    pub decoded: Option<Vec<Vec<SymbolId>>>,

    /// Whether the grammar includes velocity tokens after each pitch.
    #[serde(default = "default_true")]
    pub use_velocities: bool,

    /// Whether the grammar includes duration tokens after each pitch (or
    /// velocity, when enabled).
    #[serde(default = "default_true")]
    pub use_durations: bool,
}

fn default_true() -> bool {
    true
}

/// Categorization oracle over the model vocabulary.
///
/// Implementations must be cheap to query: the sampling pipeline calls
/// [`token_pitch`](Self::token_pitch) and
/// [`token_time_shift`](Self::token_time_shift) for every candidate token of
/// every step.
pub trait TokenCategoryOracle: Send + Sync {
    /// Size of the token vocabulary.
    fn vocab_size(&self) -> usize;

    /// The symbols a token decodes to, in decode order. Empty for unknown
    /// token ids.
    fn decode_token(&self, token: Token) -> &[SymbolId];

    /// Looks up a symbol by id.
    fn symbol(&self, id: SymbolId) -> Option<Symbol>;

    /// Whether the grammar includes velocity tokens.
    fn use_velocities(&self) -> bool;

    /// Whether the grammar includes duration tokens.
    fn use_durations(&self) -> bool;

    /// Category of a decoded symbol.
    fn category_of(&self, id: SymbolId) -> TokenCategory {
        self.symbol(id).map_or(TokenCategory::Other, |s| s.kind)
    }

    /// Pitch of a decoded symbol, if it is a pitch symbol.
    fn pitch_of(&self, id: SymbolId) -> Option<i32> {
        self.symbol(id).and_then(|s| match s.kind {
            TokenCategory::Pitch => Some(s.value as i32),
            _ => None,
        })
    }

    /// Category of a token as a whole: the category of its first decoded
    /// symbol, [`TokenCategory::Other`] when it decodes to nothing.
    fn token_category(&self, token: Token) -> TokenCategory {
        self.decode_token(token)
            .first()
            .map_or(TokenCategory::Other, |&s| self.category_of(s))
    }

    /// The pitch a token starts with, if its first decoded symbol is a pitch.
    fn token_pitch(&self, token: Token) -> Option<i32> {
        self.decode_token(token)
            .first()
            .and_then(|&s| self.pitch_of(s))
    }

    /// The time-shift amount a token starts with, if its first decoded symbol
    /// is a time-shift.
    fn token_time_shift(&self, token: Token) -> Option<i64> {
        let &first = self.decode_token(token).first()?;
        self.symbol(first).and_then(|s| match s.kind {
            TokenCategory::TimeShift => Some(s.value),
            _ => None,
        })
    }
}

/// File-backed tokenizer vocabulary.
///
/// Loaded once per configuration; the category range groups derived from it
/// are built at worker initialization and never mutated afterwards.
pub struct MidiTokenizer {
    symbols: Vec<Symbol>,
    decode: Vec<Vec<SymbolId>>,
    tokens_by_category: FxHashMap<TokenCategory, Vec<Token>>,
    use_velocities: bool,
    use_durations: bool,
}

impl MidiTokenizer {
    /// Builds a tokenizer from a parsed configuration, validating the decode
    /// table against the symbol table.
    pub fn from_config(config: TokenizerConfig) -> Result<Self, TokenizerError> {
        if config.symbols.is_empty() {
            return Err(TokenizerError::EmptyVocabulary);
        }
        let decode = config.decoded.unwrap_or_else(|| {
            (0..config.symbols.len() as SymbolId).map(|s| vec![s]).collect()
        });
        for (token, symbols) in decode.iter().enumerate() {
            for &s in symbols {
                if s < 0 || s as usize >= config.symbols.len() {
                    return Err(TokenizerError::UnknownSymbol {
                        token: token as Token,
                        symbol: s,
                    });
                }
            }
        }

        let mut tokens_by_category: FxHashMap<TokenCategory, Vec<Token>> = FxHashMap::default();
        for (token, symbols) in decode.iter().enumerate() {
            let category = symbols
                .first()
                .map_or(TokenCategory::Other, |&s| config.symbols[s as usize].kind);
            tokens_by_category.entry(category).or_default().push(token as Token);
        }

        Ok(Self {
            symbols: config.symbols,
            decode,
            tokens_by_category,
            use_velocities: config.use_velocities,
            use_durations: config.use_durations,
        })
    }

    /// Loads and validates a vocabulary from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TokenizerError> {
        let file = File::open(path)?;
        let config: TokenizerConfig = serde_json::from_reader(BufReader::new(file))?;
        Self::from_config(config)
    }

    /// Builds a range group of every token whose first decoded symbol has the
    /// given category. The returned group's cache is not yet refreshed;
    /// callers compose groups and call
    /// [`RangeGroup::update_cache`] once composition is done.
    pub fn add_tokens_starting_by(&self, category: TokenCategory, group: &mut RangeGroup) {
        if let Some(tokens) = self.tokens_by_category.get(&category) {
            for &t in tokens {
                group.insert_id(t);
            }
        }
    }
}

impl TokenCategoryOracle for MidiTokenizer {
    fn vocab_size(&self) -> usize {
        self.decode.len()
    }

    fn decode_token(&self, token: Token) -> &[SymbolId] {
        if token < 0 {
            return &[];
        }
        self.decode.get(token as usize).map_or(&[], Vec::as_slice)
    }

    fn symbol(&self, id: SymbolId) -> Option<Symbol> {
        if id < 0 {
            return None;
        }
        self.symbols.get(id as usize).copied()
    }

    fn use_velocities(&self) -> bool {
        self.use_velocities
    }

    fn use_durations(&self) -> bool {
        self.use_durations
    }
}
