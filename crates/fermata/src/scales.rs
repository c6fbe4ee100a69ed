//! Musical scale presets for the scale penalty.
//!
//! A scale is a set of pitch classes (`0..12`, C = 0). The sampling pipeline
//! penalizes pitch tokens whose pitch class falls outside the configured
//! scale; see [`crate::sampling::SamplerConfig::scale`].

/// Pitch classes of the C major scale.
pub const C_MAJOR: [i32; 7] = [0, 2, 4, 5, 7, 9, 11];

/// Pitch classes of the major (Ionian) scale rooted at `root` (a pitch class
/// or any MIDI pitch; only its class is used).
pub fn major(root: i32) -> [i32; 7] {
    C_MAJOR.map(|step| (step + root).rem_euclid(12))
}

/// Pitch classes of the natural minor (Aeolian) scale rooted at `root`.
pub fn natural_minor(root: i32) -> [i32; 7] {
    [0, 2, 3, 5, 7, 8, 10].map(|step| (step + root).rem_euclid(12))
}
