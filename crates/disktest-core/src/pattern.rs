//! Test patterns and the deterministic byte generator
//!
//! Four fixed-byte patterns fill every byte with a constant. The random pattern
//! is a counter-based SplitMix64 stream: byte `p` of a stream is byte `p % 8`
//! of `mix(key + (p / 8 + 1) * GAMMA)`. Every byte is a pure function of the
//! key and its position, so a generator can jump to any offset in O(1). That
//! is what lets verification restart in the middle of a file after a resume.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Golden-ratio increment used by SplitMix64
const GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// A byte pattern written to and verified against the test files.
///
/// Declaration order is the canonical run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PatternKind {
    /// Every byte 0x00
    #[serde(rename = "00")]
    Zero,
    /// Every byte 0xFF
    #[serde(rename = "FF")]
    One,
    /// Every byte 0xAA (10101010)
    #[serde(rename = "AA")]
    AltAA,
    /// Every byte 0x55 (01010101)
    #[serde(rename = "55")]
    Alt55,
    /// Seeded pseudo-random stream
    #[serde(rename = "RND")]
    Random,
}

impl PatternKind {
    /// All patterns in canonical order
    pub const ALL: [PatternKind; 5] = [
        PatternKind::Zero,
        PatternKind::One,
        PatternKind::AltAA,
        PatternKind::Alt55,
        PatternKind::Random,
    ];

    /// Short persisted name ("00", "FF", "AA", "55", "RND")
    pub fn short_name(self) -> &'static str {
        match self {
            PatternKind::Zero => "00",
            PatternKind::One => "FF",
            PatternKind::AltAA => "AA",
            PatternKind::Alt55 => "55",
            PatternKind::Random => "RND",
        }
    }

    /// Human-readable name
    pub fn display_name(self) -> &'static str {
        match self {
            PatternKind::Zero => "0x00 (Zero)",
            PatternKind::One => "0xFF (One)",
            PatternKind::AltAA => "0xAA (Alternating 10101010)",
            PatternKind::Alt55 => "0x55 (Alternating 01010101)",
            PatternKind::Random => "Random",
        }
    }

    /// The constant byte of a fixed pattern, `None` for random
    pub fn fill_byte(self) -> Option<u8> {
        match self {
            PatternKind::Zero => Some(0x00),
            PatternKind::One => Some(0xFF),
            PatternKind::AltAA => Some(0xAA),
            PatternKind::Alt55 => Some(0x55),
            PatternKind::Random => None,
        }
    }

    /// Whether this pattern depends on a seed
    pub fn is_random(self) -> bool {
        self == PatternKind::Random
    }

    /// The fixed pattern whose constant is `byte`, if any
    pub fn from_fill_byte(byte: u8) -> Option<PatternKind> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.fill_byte() == Some(byte))
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for PatternKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "00" | "zero" | "zeros" | "0x00" => Ok(PatternKind::Zero),
            "ff" | "one" | "ones" | "0xff" => Ok(PatternKind::One),
            "aa" | "0xaa" => Ok(PatternKind::AltAA),
            "55" | "0x55" => Ok(PatternKind::Alt55),
            "rnd" | "random" => Ok(PatternKind::Random),
            other => Err(Error::InvalidConfig(format!(
                "unknown pattern '{}' (expected one of 00, FF, AA, 55, RND)",
                other
            ))),
        }
    }
}

/// Sort a pattern selection into canonical order and drop duplicates
pub fn canonical_order(selected: &[PatternKind]) -> Vec<PatternKind> {
    let mut ordered = selected.to_vec();
    ordered.sort_unstable();
    ordered.dedup();
    ordered
}

/// Parse a comma-separated pattern list such as `"00,FF,RND"`
pub fn parse_pattern_list(s: &str) -> Result<Vec<PatternKind>> {
    let patterns = s
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(PatternKind::from_str)
        .collect::<Result<Vec<_>>>()?;
    if patterns.is_empty() {
        return Err(Error::InvalidConfig(
            "at least one pattern must be selected".to_string(),
        ));
    }
    Ok(canonical_order(&patterns))
}

/// Draw a fresh seed for the random pattern
pub fn generate_seed() -> u64 {
    rand::random::<u64>()
}

#[inline]
fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Key of the sub-stream used for one file
fn file_stream_key(seed: u64, file_index: usize) -> u64 {
    mix(seed ^ mix((file_index as u64).wrapping_add(1).wrapping_mul(GAMMA)))
}

#[inline]
fn word_at(key: u64, word_index: u64) -> [u8; 8] {
    mix(key.wrapping_add(word_index.wrapping_add(1).wrapping_mul(GAMMA))).to_le_bytes()
}

fn fill_random(key: u64, position: u64, buf: &mut [u8]) {
    let mut word_index = position / 8;
    let lead = (position % 8) as usize;
    let mut start = 0;

    if lead != 0 {
        let word = word_at(key, word_index);
        let take = (8 - lead).min(buf.len());
        buf[..take].copy_from_slice(&word[lead..lead + take]);
        start = take;
        word_index += 1;
    }

    let mut words = buf[start..].chunks_exact_mut(8);
    for slot in &mut words {
        slot.copy_from_slice(&word_at(key, word_index));
        word_index += 1;
    }
    let tail = words.into_remainder();
    if !tail.is_empty() {
        let word = word_at(key, word_index);
        let len = tail.len();
        tail.copy_from_slice(&word[..len]);
    }
}

/// Deterministic byte source for one pattern.
///
/// Output is a pure function of (kind, key, bytes produced since the last reset).
#[derive(Debug, Clone)]
pub struct PatternGenerator {
    kind: PatternKind,
    seed: u64,
    key: u64,
    position: u64,
}

impl PatternGenerator {
    /// Generator over the pattern's base stream
    pub fn new(kind: PatternKind, seed: u64) -> Self {
        Self {
            kind,
            seed,
            key: seed,
            position: 0,
        }
    }

    /// Generator over the stream the engine writes into file `file_index`
    pub fn for_file(kind: PatternKind, seed: u64, file_index: usize) -> Self {
        Self {
            kind,
            seed,
            key: file_stream_key(seed, file_index),
            position: 0,
        }
    }

    /// Pattern kind
    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    /// Seed this generator was built from
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Bytes produced since the last reset
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Rewind to the start of the stream
    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Advance by `bytes` without producing output
    pub fn skip(&mut self, bytes: u64) {
        self.position += bytes;
    }

    /// Produce exactly `n` bytes
    pub fn generate_chunk(&mut self, n: usize) -> Vec<u8> {
        let mut chunk = vec![0u8; n];
        self.fill(&mut chunk);
        chunk
    }

    /// Fill `buf` with the next `buf.len()` bytes
    pub fn fill(&mut self, buf: &mut [u8]) {
        match self.kind.fill_byte() {
            Some(byte) => buf.fill(byte),
            None => fill_random(self.key, self.position, buf),
        }
        self.position += buf.len() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    // -------------------------------------------------------------------------
    // PatternKind tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_fixed_fill_bytes() {
        assert_eq!(PatternKind::Zero.fill_byte(), Some(0x00));
        assert_eq!(PatternKind::One.fill_byte(), Some(0xFF));
        assert_eq!(PatternKind::AltAA.fill_byte(), Some(0xAA));
        assert_eq!(PatternKind::Alt55.fill_byte(), Some(0x55));
        assert_eq!(PatternKind::Random.fill_byte(), None);
    }

    #[test]
    fn test_short_names_roundtrip_through_from_str() {
        for kind in PatternKind::ALL {
            assert_eq!(kind.short_name().parse::<PatternKind>().unwrap(), kind);
        }
        assert_eq!("random".parse::<PatternKind>().unwrap(), PatternKind::Random);
        assert!("0x12".parse::<PatternKind>().is_err());
    }

    #[test]
    fn test_serde_uses_short_names() {
        let json = serde_json::to_string(&PatternKind::Random).unwrap();
        assert_eq!(json, "\"RND\"");
        let kind: PatternKind = serde_json::from_str("\"AA\"").unwrap();
        assert_eq!(kind, PatternKind::AltAA);
    }

    #[test]
    fn test_canonical_order() {
        let ordered = canonical_order(&[
            PatternKind::Random,
            PatternKind::Zero,
            PatternKind::Alt55,
            PatternKind::Zero,
        ]);
        assert_eq!(
            ordered,
            vec![PatternKind::Zero, PatternKind::Alt55, PatternKind::Random]
        );
    }

    #[test]
    fn test_parse_pattern_list() {
        let patterns = parse_pattern_list("RND, 00").unwrap();
        assert_eq!(patterns, vec![PatternKind::Zero, PatternKind::Random]);
        assert!(parse_pattern_list("").is_err());
        assert!(parse_pattern_list("00,XX").is_err());
    }

    #[test]
    fn test_from_fill_byte() {
        assert_eq!(PatternKind::from_fill_byte(0xAA), Some(PatternKind::AltAA));
        assert_eq!(PatternKind::from_fill_byte(0x12), None);
    }

    // -------------------------------------------------------------------------
    // Generator tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_fixed_generator() {
        let mut generator = PatternGenerator::new(PatternKind::AltAA, 0);
        let chunk = generator.generate_chunk(4096);
        assert!(chunk.iter().all(|&b| b == 0xAA));
        assert_eq!(generator.position(), 4096);
    }

    #[test]
    fn test_random_is_deterministic() {
        let mut a = PatternGenerator::new(PatternKind::Random, 42);
        let mut b = PatternGenerator::new(PatternKind::Random, 42);
        assert_eq!(a.generate_chunk(10_000), b.generate_chunk(10_000));
    }

    #[test]
    fn test_random_seed_changes_output() {
        let mut a = PatternGenerator::new(PatternKind::Random, 1);
        let mut b = PatternGenerator::new(PatternKind::Random, 2);
        assert_ne!(a.generate_chunk(256), b.generate_chunk(256));
    }

    #[test]
    fn test_reset_reproduces_stream() {
        let mut generator = PatternGenerator::for_file(PatternKind::Random, 7, 3);
        let first = generator.generate_chunk(5000);
        generator.reset();
        assert_eq!(generator.position(), 0);
        assert_eq!(generator.generate_chunk(5000), first);
    }

    #[test]
    fn test_split_calls_match_single_call() {
        let mut whole = PatternGenerator::new(PatternKind::Random, 99);
        let expected = whole.generate_chunk(1000);

        let mut pieces = PatternGenerator::new(PatternKind::Random, 99);
        let mut got = Vec::new();
        for size in [3, 5, 8, 13, 1, 970] {
            got.extend(pieces.generate_chunk(size));
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn test_file_streams_differ() {
        let mut f0 = PatternGenerator::for_file(PatternKind::Random, 5, 0);
        let mut f1 = PatternGenerator::for_file(PatternKind::Random, 5, 1);
        assert_ne!(f0.generate_chunk(1024), f1.generate_chunk(1024));
    }

    #[test]
    fn test_random_sample_is_diverse() {
        let mut generator = PatternGenerator::for_file(PatternKind::Random, 12345, 0);
        let sample = generator.generate_chunk(1024);
        let unique: HashSet<u8> = sample.iter().copied().collect();
        assert!(unique.len() > 10);
    }

    #[test]
    fn test_empty_chunk() {
        let mut generator = PatternGenerator::new(PatternKind::Random, 1);
        assert!(generator.generate_chunk(0).is_empty());
        assert_eq!(generator.position(), 0);
    }

    proptest! {
        #[test]
        fn prop_skip_equals_discard(seed: u64, file in 0usize..1000, skip in 0u64..100_000, len in 0usize..4096) {
            let mut replay = PatternGenerator::for_file(PatternKind::Random, seed, file);
            replay.generate_chunk(skip as usize);
            let expected = replay.generate_chunk(len);

            let mut jumped = PatternGenerator::for_file(PatternKind::Random, seed, file);
            jumped.skip(skip);
            prop_assert_eq!(jumped.generate_chunk(len), expected);
        }

        #[test]
        fn prop_fixed_patterns_constant(idx in 0usize..4, len in 0usize..10_000) {
            let kind = PatternKind::ALL[idx];
            let mut generator = PatternGenerator::new(kind, 0);
            let chunk = generator.generate_chunk(len);
            let byte = kind.fill_byte().unwrap();
            prop_assert!(chunk.iter().all(|&b| b == byte));
        }
    }
}
