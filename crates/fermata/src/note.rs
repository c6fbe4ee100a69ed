/// A decoded musical event.
///
/// Notes are produced incrementally from the generated token stream. `tick`
/// and `duration` are expressed in the generator's internal tick space ("lib
/// ticks") until translated through [`crate::clock::ClockBridge`]. Notes are
/// emitted in token order, which is not necessarily ascending tick order; the
/// playback boundary is responsible for ordering guarantees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    /// Onset, in lib ticks.
    pub tick: i64,

    /// Length, in lib ticks.
    pub duration: i64,

    /// MIDI pitch number.
    pub pitch: i32,

    /// MIDI velocity.
    pub velocity: i32,
}
