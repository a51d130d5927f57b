//! Implementation of the data set comparison algorithm, see *IEEE1588-2008
//! section 9.3.4*

use core::cmp::Ordering;

use crate::datastructures::{
    common::{ClockIdentity, ClockQuality, PortIdentity},
    datasets::DefaultDS,
    messages::AnnounceMessage,
};

/// A collection of data gathered from an announce message or from the local
/// default dataset. When gathered from two different sources, the
/// [compare](ComparisonDataset::compare) method finds out which source is
/// the better master according to the dataset comparison algorithm.
#[derive(Eq, PartialEq, Debug)]
pub(crate) struct ComparisonDataset {
    gm_priority_1: u8,
    gm_identity: ClockIdentity,
    gm_clock_quality: ClockQuality,
    gm_priority_2: u8,
    steps_removed: u16,
    identity_of_sender: ClockIdentity,
    /// The port that received the announce message. The dataset built from
    /// the local clock itself (the D0 of the state decision algorithm) has
    /// no receiving port.
    identity_of_receiver: Option<PortIdentity>,
}

impl ComparisonDataset {
    /// Create a ComparisonDataset from the data in an announce message and
    /// the identity of the port that received it
    pub(crate) fn from_announce_message(
        message: &AnnounceMessage,
        port_receiver_identity: PortIdentity,
    ) -> Self {
        Self {
            gm_priority_1: message.grandmaster_priority_1,
            gm_identity: message.grandmaster_identity,
            gm_clock_quality: message.grandmaster_clock_quality,
            gm_priority_2: message.grandmaster_priority_2,
            steps_removed: message.steps_removed,
            identity_of_sender: message.header.source_port_identity.clock_identity,
            identity_of_receiver: Some(port_receiver_identity),
        }
    }

    pub(crate) fn from_own_data(data: &DefaultDS) -> Self {
        Self {
            gm_priority_1: data.priority_1,
            gm_identity: data.clock_identity,
            gm_clock_quality: data.clock_quality,
            gm_priority_2: data.priority_2,
            steps_removed: 0,
            identity_of_sender: data.clock_identity,
            identity_of_receiver: None,
        }
    }

    /// Returns the ordering of `self` in comparison to other.
    pub(crate) fn compare(&self, other: &Self) -> DatasetOrdering {
        if self.gm_identity == other.gm_identity {
            self.compare_same_identity(other)
        } else {
            self.compare_different_identity(other)
        }
    }

    /// The grandmasters are different clocks, pick the better grandmaster
    fn compare_different_identity(&self, other: &Self) -> DatasetOrdering {
        let self_quality = self.gm_clock_quality;
        let other_quality = other.gm_clock_quality;

        let ordering = (self.gm_priority_1.cmp(&other.gm_priority_1))
            .then_with(|| self_quality.clock_class.cmp(&other_quality.clock_class))
            .then_with(|| {
                self_quality
                    .clock_accuracy
                    .cmp_numeric(&other_quality.clock_accuracy)
            })
            .then_with(|| {
                self_quality
                    .offset_scaled_log_variance
                    .cmp(&other_quality.offset_scaled_log_variance)
            })
            .then_with(|| self.gm_priority_2.cmp(&other.gm_priority_2))
            .then_with(|| self.gm_identity.cmp(&other.gm_identity));

        match ordering {
            Ordering::Equal => unreachable!("gm_identity is guaranteed to be different"),
            Ordering::Greater => DatasetOrdering::Worse,
            Ordering::Less => DatasetOrdering::Better,
        }
    }

    /// Potentially the same grandmaster seen over different paths, compare
    /// by topology
    fn compare_same_identity(&self, other: &Self) -> DatasetOrdering {
        let steps_removed_difference = self.steps_removed as i32 - other.steps_removed as i32;

        match steps_removed_difference {
            2..=i32::MAX => DatasetOrdering::Worse,
            i32::MIN..=-2 => DatasetOrdering::Better,
            1 => match self.identity_of_receiver {
                Some(receiver) => {
                    match Ord::cmp(&receiver.clock_identity, &self.identity_of_sender) {
                        Ordering::Less => DatasetOrdering::Worse,
                        Ordering::Equal => DatasetOrdering::Error1,
                        Ordering::Greater => DatasetOrdering::WorseByTopology,
                    }
                }
                // No receiver to consult on our side, the other side wins
                // on topology
                None => DatasetOrdering::WorseByTopology,
            },
            -1 => match other.identity_of_receiver {
                Some(receiver) => {
                    match Ord::cmp(&receiver.clock_identity, &other.identity_of_sender) {
                        Ordering::Less => DatasetOrdering::Better,
                        Ordering::Equal => DatasetOrdering::Error1,
                        Ordering::Greater => DatasetOrdering::BetterByTopology,
                    }
                }
                None => DatasetOrdering::BetterByTopology,
            },
            0 => {
                match self.identity_of_sender.cmp(&other.identity_of_sender) {
                    Ordering::Less => return DatasetOrdering::BetterByTopology,
                    Ordering::Greater => return DatasetOrdering::WorseByTopology,
                    Ordering::Equal => {}
                }

                match (self.identity_of_receiver, other.identity_of_receiver) {
                    (Some(self_receiver), Some(other_receiver)) => {
                        // Tie-break on the receiving port number, then on
                        // the receiving clock identity so that the result
                        // stays a total order
                        match (self_receiver.port_number.cmp(&other_receiver.port_number))
                            .then_with(|| {
                                self_receiver
                                    .clock_identity
                                    .cmp(&other_receiver.clock_identity)
                            }) {
                            Ordering::Less => DatasetOrdering::BetterByTopology,
                            Ordering::Greater => DatasetOrdering::WorseByTopology,
                            Ordering::Equal => DatasetOrdering::Error2,
                        }
                    }
                    // The side without a receiver is the local clock itself
                    (None, Some(_)) => DatasetOrdering::BetterByTopology,
                    (Some(_), None) => DatasetOrdering::WorseByTopology,
                    (None, None) => DatasetOrdering::Error2,
                }
            }
        }
    }
}

/// The ordering result of the dataset comparison algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DatasetOrdering {
    /// The [ComparisonDataset] is better than the one being compared against
    Better,
    /// The [ComparisonDataset] is of equal quality as the one being compared
    /// against, but is preferred because of the network topology
    BetterByTopology,
    /// The [ComparisonDataset] is equal in quality and topology
    Error1,
    /// The [ComparisonDataset] is probably based on the same set of data
    Error2,
    /// The [ComparisonDataset] is of equal quality as the one being compared
    /// against, but is not preferred because of the network topology
    WorseByTopology,
    /// The [ComparisonDataset] is worse than the one being compared against
    Worse,
}

impl DatasetOrdering {
    /// Whether this result elects the dataset, either outright or through
    /// the topology tie-break
    pub(crate) fn is_better(self) -> bool {
        matches!(
            self,
            DatasetOrdering::Better | DatasetOrdering::BetterByTopology
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastructures::common::ClockAccuracy;

    const IDENTITY_A: ClockIdentity = ClockIdentity([1, 1, 1, 1, 1, 1, 1, 1]);
    const IDENTITY_B: ClockIdentity = ClockIdentity([2, 2, 2, 2, 2, 2, 2, 2]);
    const IDENTITY_C: ClockIdentity = ClockIdentity([3, 3, 3, 3, 3, 3, 3, 3]);

    fn identical_datasets() -> (ComparisonDataset, ComparisonDataset) {
        let make = || ComparisonDataset {
            gm_priority_1: 0,
            gm_identity: ClockIdentity::default(),
            gm_clock_quality: ClockQuality {
                clock_class: 0,
                clock_accuracy: ClockAccuracy::Other(0),
                offset_scaled_log_variance: 0,
            },
            gm_priority_2: 0,
            steps_removed: 0,
            identity_of_sender: ClockIdentity::default(),
            identity_of_receiver: Some(PortIdentity::default()),
        };
        (make(), make())
    }

    #[test]
    fn different_grandmasters() {
        // Work bottom up through the comparison attributes, flipping which
        // side wins each time so the previous result cannot leak through
        let (mut a, mut b) = identical_datasets();

        a.gm_identity = IDENTITY_A;
        b.gm_identity = IDENTITY_B;

        assert_eq!(a.compare(&b), DatasetOrdering::Better);
        assert_eq!(b.compare(&a), DatasetOrdering::Worse);

        a.gm_priority_2 = 1;
        b.gm_priority_2 = 0;

        assert_eq!(a.compare(&b), DatasetOrdering::Worse);
        assert_eq!(b.compare(&a), DatasetOrdering::Better);

        a.gm_clock_quality.offset_scaled_log_variance = 0;
        b.gm_clock_quality.offset_scaled_log_variance = 1;

        assert_eq!(a.compare(&b), DatasetOrdering::Better);
        assert_eq!(b.compare(&a), DatasetOrdering::Worse);

        a.gm_clock_quality.clock_accuracy = ClockAccuracy::US1;
        b.gm_clock_quality.clock_accuracy = ClockAccuracy::NS25;

        assert_eq!(a.compare(&b), DatasetOrdering::Worse);
        assert_eq!(b.compare(&a), DatasetOrdering::Better);

        a.gm_clock_quality.clock_class = 0;
        b.gm_clock_quality.clock_class = 1;

        assert_eq!(a.compare(&b), DatasetOrdering::Better);
        assert_eq!(b.compare(&a), DatasetOrdering::Worse);

        a.gm_priority_1 = 1;
        b.gm_priority_1 = 0;

        assert_eq!(a.compare(&b), DatasetOrdering::Worse);
        assert_eq!(b.compare(&a), DatasetOrdering::Better);
    }

    #[test]
    fn same_grandmaster_topology() {
        let (mut a, mut b) = identical_datasets();

        assert_eq!(a.compare(&b), DatasetOrdering::Error2);
        assert_eq!(b.compare(&a), DatasetOrdering::Error2);

        a.identity_of_receiver.as_mut().unwrap().port_number = 1;
        b.identity_of_receiver.as_mut().unwrap().port_number = 0;

        assert_eq!(a.compare(&b), DatasetOrdering::WorseByTopology);
        assert_eq!(b.compare(&a), DatasetOrdering::BetterByTopology);

        a.identity_of_sender = IDENTITY_A;
        b.identity_of_sender = IDENTITY_B;

        assert_eq!(a.compare(&b), DatasetOrdering::BetterByTopology);
        assert_eq!(b.compare(&a), DatasetOrdering::WorseByTopology);

        a.steps_removed = 0;
        a.identity_of_receiver.as_mut().unwrap().clock_identity = IDENTITY_A;
        b.steps_removed = 1;
        b.identity_of_receiver.as_mut().unwrap().clock_identity = IDENTITY_B;

        assert_eq!(a.compare(&b), DatasetOrdering::Error1);
        assert_eq!(b.compare(&a), DatasetOrdering::Error1);

        a.identity_of_receiver.as_mut().unwrap().clock_identity = IDENTITY_B;
        b.identity_of_receiver.as_mut().unwrap().clock_identity = IDENTITY_C;

        assert_eq!(a.compare(&b), DatasetOrdering::BetterByTopology);
        assert_eq!(b.compare(&a), DatasetOrdering::WorseByTopology);

        // the inverse of the identity_of_sender
        a.identity_of_receiver.as_mut().unwrap().clock_identity = IDENTITY_B;
        b.identity_of_receiver.as_mut().unwrap().clock_identity = IDENTITY_A;

        assert_eq!(a.compare(&b), DatasetOrdering::Better);
        assert_eq!(b.compare(&a), DatasetOrdering::Worse);

        a.steps_removed = 0;
        b.steps_removed = 2;

        assert_eq!(a.compare(&b), DatasetOrdering::Better);
        assert_eq!(b.compare(&a), DatasetOrdering::Worse);
    }

    #[test]
    fn equal_everything_breaks_tie_on_receiver_identity() {
        let (mut a, mut b) = identical_datasets();

        a.identity_of_receiver.as_mut().unwrap().clock_identity = IDENTITY_A;
        b.identity_of_receiver.as_mut().unwrap().clock_identity = IDENTITY_B;

        assert_eq!(a.compare(&b), DatasetOrdering::BetterByTopology);
        assert_eq!(b.compare(&a), DatasetOrdering::WorseByTopology);
    }

    #[test]
    fn local_dataset_wins_the_topology_tie_breaks() {
        let (mut a, b) = identical_datasets();
        a.identity_of_receiver = None;

        // equal steps, equal senders: the side without a receiving port is
        // the local clock and wins on topology
        assert_eq!(a.compare(&b), DatasetOrdering::BetterByTopology);
        assert_eq!(b.compare(&a), DatasetOrdering::WorseByTopology);
    }
}
