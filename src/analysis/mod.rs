// Signal analysis module
// Turns played audio into the loudness signal that drives haptics and visuals

pub mod loudness;

pub use loudness::LoudnessAnalyzer;
