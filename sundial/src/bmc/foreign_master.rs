//! Tracking of the foreign masters visible on a port

use arrayvec::ArrayVec;

use super::dataset_comparison::ComparisonDataset;
use crate::datastructures::{common::PortIdentity, messages::AnnounceMessage};
use crate::time::{Interval, Timestamp};

/// The number of announce arrival timestamps kept per foreign master. A
/// foreign master stays alive as long as at least one of them falls inside
/// the announce window.
pub(crate) const ANNOUNCE_WINDOW: usize = 4;

/// The maximum number of foreign masters tracked per port. The list cleans
/// itself up as masters stop announcing, so a small bound suffices.
pub(crate) const MAX_FOREIGN_MASTERS: usize = 5;

/// One foreign master as seen by one port: the most recent announce message
/// plus a ring of the last few arrival timestamps.
#[derive(Debug, Clone)]
pub(crate) struct ForeignMaster {
    source_port_identity: PortIdentity,
    destination_port_identity: PortIdentity,
    announce_timestamps: [Option<Timestamp>; ANNOUNCE_WINDOW],
    write_index: usize,
    valid_in_window: usize,
    last_announce: AnnounceMessage,
}

impl ForeignMaster {
    fn new(
        announce: &AnnounceMessage,
        destination_port_identity: PortIdentity,
        arrival: Timestamp,
    ) -> Self {
        let mut announce_timestamps = [None; ANNOUNCE_WINDOW];
        announce_timestamps[0] = Some(arrival);

        Self {
            source_port_identity: announce.header.source_port_identity,
            destination_port_identity,
            announce_timestamps,
            write_index: 1 % ANNOUNCE_WINDOW,
            valid_in_window: 1,
            last_announce: *announce,
        }
    }

    pub(crate) fn source_port_identity(&self) -> PortIdentity {
        self.source_port_identity
    }

    pub(crate) fn destination_port_identity(&self) -> PortIdentity {
        self.destination_port_identity
    }

    pub(crate) fn announce(&self) -> &AnnounceMessage {
        &self.last_announce
    }

    fn register(&mut self, announce: &AnnounceMessage, arrival: Timestamp) {
        self.announce_timestamps[self.write_index] = Some(arrival);
        self.write_index = (self.write_index + 1) % ANNOUNCE_WINDOW;
        self.last_announce = *announce;
    }

    /// Recount the arrival timestamps that fall inside the announce window
    /// ending at `current_time`. Returns false once none are left.
    ///
    /// The window is `announce_receipt_timeout` times the announce interval
    /// this master advertised in its last message.
    fn refresh_window(&mut self, current_time: Timestamp, announce_receipt_timeout: u8) -> bool {
        let window = Interval::from_log_2(self.last_announce.header.log_message_interval)
            .as_timestamp()
            .mul_small(announce_receipt_timeout as u32);
        let horizon = current_time - window;

        self.valid_in_window = self
            .announce_timestamps
            .iter()
            .flatten()
            .filter(|&&arrival| arrival >= horizon)
            .count();

        self.valid_in_window > 0
    }
}

/// All foreign masters currently visible on one port.
#[derive(Debug, Clone)]
pub(crate) struct ForeignMasterList {
    foreign_masters: ArrayVec<ForeignMaster, MAX_FOREIGN_MASTERS>,
    own_port_identity: PortIdentity,
}

impl ForeignMasterList {
    pub(crate) fn new(own_port_identity: PortIdentity) -> Self {
        Self {
            foreign_masters: ArrayVec::new(),
            own_port_identity,
        }
    }

    /// Record a received announce message, either updating the entry for
    /// its sender or creating a new one if there is room.
    pub(crate) fn register_announce_message(
        &mut self,
        announce: &AnnounceMessage,
        arrival: Timestamp,
    ) {
        let source = announce.header.source_port_identity;

        if let Some(foreign_master) = self
            .foreign_masters
            .iter_mut()
            .find(|fm| fm.source_port_identity == source)
        {
            foreign_master.register(announce, arrival);
        } else if self.foreign_masters.len() < MAX_FOREIGN_MASTERS {
            self.foreign_masters.push(ForeignMaster::new(
                announce,
                self.own_port_identity,
                arrival,
            ));
        } else {
            log::debug!("list of foreign masters on {} full", self.own_port_identity);
        }
    }

    /// Drop every foreign master that has not announced within the window
    /// `announce_receipt_timeout × 2^log_announce_interval`.
    pub(crate) fn age(&mut self, current_time: Timestamp, announce_receipt_timeout: u8) {
        self.foreign_masters.retain(|foreign_master| {
            let alive = foreign_master.refresh_window(current_time, announce_receipt_timeout);
            if !alive {
                log::debug!(
                    "removing foreign master {}",
                    foreign_master.source_port_identity
                );
            }
            alive
        });
    }

    /// The best foreign master currently visible on this port, if any.
    pub(crate) fn erbest(&self) -> Option<&ForeignMaster> {
        let mut candidates = self.foreign_masters.iter();
        let mut best = candidates.next()?;

        for candidate in candidates {
            let candidate_dataset = ComparisonDataset::from_announce_message(
                candidate.announce(),
                candidate.destination_port_identity,
            );
            let best_dataset = ComparisonDataset::from_announce_message(
                best.announce(),
                best.destination_port_identity,
            );

            if candidate_dataset.compare(&best_dataset).is_better() {
                best = candidate;
            }
        }

        Some(best)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.foreign_masters.len()
    }
}
