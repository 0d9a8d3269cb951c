//! Deterministic content splitting.
//!
//! The content-defined mode uses a gear rolling hash: a boundary is placed
//! where the top bits of the hash are all zero, so an edit only moves the
//! boundaries near it and unchanged regions keep their chunk ids.

use serde::{Deserialize, Serialize};

/// How content is cut into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SplitterConfig {
    /// Equal-sized pieces (last one may be shorter).
    Fixed { size: usize },
    /// Gear-hash boundaries with size bounds.
    ContentDefined {
        min_size: usize,
        avg_size: usize,
        max_size: usize,
    },
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self::ContentDefined {
            min_size: 4 * 1024,
            avg_size: 16 * 1024,
            max_size: 64 * 1024,
        }
    }
}

impl SplitterConfig {
    /// Checks the size bounds.
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            Self::Fixed { size } if size == 0 => Err("fixed chunk size must be > 0".into()),
            Self::Fixed { .. } => Ok(()),
            Self::ContentDefined {
                min_size,
                avg_size,
                max_size,
            } => {
                if min_size == 0 || !(min_size <= avg_size && avg_size <= max_size) {
                    Err(format!(
                        "chunk sizes must satisfy 0 < min <= avg <= max (got {min_size}/{avg_size}/{max_size})"
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Splits content according to a [`SplitterConfig`].
#[derive(Debug, Clone)]
pub struct Splitter {
    config: SplitterConfig,
}

impl Splitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> SplitterConfig {
        self.config
    }

    /// Cuts `content` into pieces. Empty content yields no pieces.
    pub fn split<'a>(&self, content: &'a [u8]) -> Vec<&'a [u8]> {
        let mut pieces = Vec::new();
        let mut rest = content;
        while !rest.is_empty() {
            let cut = match self.config {
                SplitterConfig::Fixed { size } => rest.len().min(size.max(1)),
                SplitterConfig::ContentDefined {
                    min_size,
                    avg_size,
                    max_size,
                } => gear_cut(rest, min_size.max(1), avg_size, max_size.max(1)),
            };
            let (piece, tail) = rest.split_at(cut);
            pieces.push(piece);
            rest = tail;
        }
        pieces
    }
}

/// Concatenates pieces back into the original content.
pub fn join<T: AsRef<[u8]>>(pieces: &[T]) -> Vec<u8> {
    let total = pieces.iter().map(|p| p.as_ref().len()).sum();
    let mut out = Vec::with_capacity(total);
    for piece in pieces {
        out.extend_from_slice(piece.as_ref());
    }
    out
}

fn gear_cut(data: &[u8], min_size: usize, avg_size: usize, max_size: usize) -> usize {
    let len = data.len();
    if len <= min_size {
        return len;
    }
    let end = len.min(max_size.max(min_size));
    let bits = avg_size.max(2).next_power_of_two().trailing_zeros();
    let shift = 64 - bits;

    let mut hash = 0u64;
    for (i, &byte) in data.iter().enumerate().take(end).skip(min_size) {
        hash = (hash << 1).wrapping_add(GEAR[byte as usize]);
        if hash >> shift == 0 {
            return i + 1;
        }
    }
    end
}

const fn splitmix64(state: u64) -> (u64, u64) {
    let state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    (state, z ^ (z >> 31))
}

const fn gear_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut state = 0x5641_554C_5453_594Eu64;
    let mut i = 0;
    while i < 256 {
        let (next, value) = splitmix64(state);
        state = next;
        table[i] = value;
        i += 1;
    }
    table
}

static GEAR: [u64; 256] = gear_table();
