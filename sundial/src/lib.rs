//! A software-only implementation of an IEEE 1588-2008 (PTP version 2)
//! ordinary clock.
//!
//! The crate contains the full protocol engine: the wire format of the PTP
//! messages, the per-port state machines, the best master clock selection,
//! and the servo that disciplines the local clock to an elected master. What
//! it deliberately does not contain is hardware access: the system clock and
//! the network are reached through the [`clock::Clock`] and
//! [`network::PacketInterface`] traits, to be provided by the embedder. A
//! Linux implementation of both lives in the `sundial-linux` crate.
//!
//! Everything runs on one thread: construct a [`ptp_instance::PtpInstance`],
//! add a port per network interface, and call
//! [`run`](ptp_instance::PtpInstance::run).

pub mod bmc;
pub mod clock;
pub mod config;
pub mod datastructures;
pub mod network;
pub mod port;
pub mod ptp_instance;
pub mod servo;
pub mod time;
