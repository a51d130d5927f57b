//! The state decision algorithm of the best master clock selection, see
//! *IEEE1588-2008 section 9.3.3*

use super::dataset_comparison::ComparisonDataset;
use super::foreign_master::ForeignMaster;
use crate::datastructures::{
    common::PortIdentity,
    datasets::{DefaultDS, ParentDS},
    messages::AnnounceMessage,
};

/// The qualified announce message competing for mastership on a port,
/// together with the identity of the port that received it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BestAnnounce {
    pub(crate) message: AnnounceMessage,
    pub(crate) received_by: PortIdentity,
}

impl BestAnnounce {
    pub(crate) fn from_foreign_master(foreign_master: &ForeignMaster) -> Self {
        Self {
            message: *foreign_master.announce(),
            received_by: foreign_master.destination_port_identity(),
        }
    }

    fn comparison_dataset(&self) -> ComparisonDataset {
        ComparisonDataset::from_announce_message(&self.message, self.received_by)
    }
}

/// Whether the local clock is currently steered by its own oscillator or by
/// a foreign master somewhere in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    LocalMaster,
    ForeignMaster,
}

/// The six possible outcomes of the state decision algorithm for a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recommendation {
    M1,
    M2,
    M3,
    P1,
    P2,
    S1,
}

/// Select Ebest: the index of the port whose Erbest beats all others.
pub(crate) fn find_ebest(erbests: &[Option<BestAnnounce>]) -> Option<usize> {
    let mut best: Option<usize> = None;

    for (index, erbest) in erbests.iter().enumerate() {
        let Some(candidate) = erbest else { continue };

        match best {
            None => best = Some(index),
            Some(best_index) => {
                let best_announce = erbests[best_index].as_ref().unwrap();
                if candidate
                    .comparison_dataset()
                    .compare(&best_announce.comparison_dataset())
                    .is_better()
                {
                    best = Some(index);
                }
            }
        }
    }

    best
}

/// Run the state decision tree for one port. Returns `None` when the port
/// should stay in LISTENING because no foreign master has shown up yet and
/// the announce receipt timeout is still pending.
#[allow(clippy::too_many_arguments)]
pub(crate) fn state_decision(
    default_ds: &DefaultDS,
    parent_ds: &ParentDS,
    clock_state: ClockState,
    erbest: Option<&BestAnnounce>,
    ebest: Option<&BestAnnounce>,
    ebest_on_this_port: bool,
    listening: bool,
    announce_receipt_expired: bool,
) -> Option<Recommendation> {
    if erbest.is_none() && listening && !announce_receipt_expired {
        // Remain in LISTENING until either an announce arrives or the
        // receipt timeout allows the port to claim mastership
        return None;
    }

    let d0 = ComparisonDataset::from_own_data(default_ds);

    let gm_class = parent_ds.grandmaster_clock_quality.clock_class;
    if (1..=127).contains(&gm_class) && clock_state == ClockState::LocalMaster {
        match erbest {
            None => Some(Recommendation::M1),
            Some(erbest) => {
                if d0.compare(&erbest.comparison_dataset()).is_better() {
                    Some(Recommendation::M1)
                } else {
                    Some(Recommendation::P1)
                }
            }
        }
    } else {
        match ebest {
            None => Some(Recommendation::M2),
            Some(ebest_announce) => {
                if d0.compare(&ebest_announce.comparison_dataset()).is_better() {
                    Some(Recommendation::M2)
                } else if ebest_on_this_port {
                    Some(Recommendation::S1)
                } else {
                    match erbest {
                        Some(erbest) => {
                            use super::dataset_comparison::DatasetOrdering;

                            let ordering = ebest_announce
                                .comparison_dataset()
                                .compare(&erbest.comparison_dataset());
                            if ordering == DatasetOrdering::BetterByTopology {
                                Some(Recommendation::P2)
                            } else {
                                Some(Recommendation::M3)
                            }
                        }
                        None => Some(Recommendation::M3),
                    }
                }
            }
        }
    }
}
