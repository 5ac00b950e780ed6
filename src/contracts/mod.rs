// Contracts Module - ABIs mínimos leídos por el chain reader y el price oracle

pub mod aggregator_v3_interface;
pub mod hypervisor;
pub mod rewarder;

pub use aggregator_v3_interface::AggregatorV3Interface;
pub use hypervisor::{Hypervisor, HYPERVISOR_ABI};
pub use rewarder::Rewarder;
