// Haptic feedback module
// Hardware seam plus the synchronizer that mirrors loudness into the actuator

pub mod engine;
pub mod synchronizer;

pub use engine::{HapticEngine, HapticParameters, NullHapticEngine, ResetNotifier};
pub use synchronizer::{HapticChannelState, HapticMapping, HapticSynchronizer};
