use crate::datastructures::common::TimeInterval;

/// Measured relation of the local clock to its current master. Written by
/// the master selection (steps_removed) and by the servo (offset and delay).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CurrentDS {
    pub steps_removed: u32,
    pub offset_from_master: TimeInterval,
    pub mean_path_delay: TimeInterval,
}

impl CurrentDS {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}
