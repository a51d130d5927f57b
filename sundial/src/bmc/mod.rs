//! Best master clock selection: per-port foreign master tracking, announce
//! comparison, and the state decision algorithm.

pub mod bmca;
pub mod dataset_comparison;
pub mod foreign_master;
