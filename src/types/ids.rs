//! Deterministic document and queue identities.
//!
//! Every builder is a pure function of its arguments. Addresses are
//! lower-cased so that checksummed and plain inputs collapse to one id.

use crate::types::conversions::normalize_address;

/// `status` collection: one snapshot per hypervisor and block.
pub fn hypervisor_status_id(hypervisor: &str, block: u64) -> String {
    format!("{}_{}", normalize_address(hypervisor), block)
}

/// `rewards_status` collection.
pub fn reward_status_id(hypervisor: &str, rewarder: &str, reward_token: &str, block: u64) -> String {
    format!(
        "{}_{}_{}_{}",
        normalize_address(hypervisor),
        normalize_address(rewarder),
        normalize_address(reward_token),
        block
    )
}

/// `rewards_static` collection.
pub fn reward_static_id(hypervisor: &str, rewarder: &str, reward_token: &str) -> String {
    format!(
        "{}_{}_{}",
        normalize_address(hypervisor),
        normalize_address(rewarder),
        normalize_address(reward_token)
    )
}

/// Global `prices` collection.
pub fn price_id(network: &str, block: u64, token: &str) -> String {
    format!("{}_{}_{}", network, block, normalize_address(token))
}

/// Global `blocks` collection.
pub fn block_id(network: &str, block: u64) -> String {
    format!("{}_{}", network, block)
}

/// `operations` collection.
pub fn operation_id(log_index: u64, transaction_hash: &str) -> String {
    format!("{}_{}", log_index, transaction_hash.trim().to_lowercase())
}

/// Queue identity: the type tag always leads so ids never collide across types.
pub fn queue_id(type_tag: &str, block: u64, address: &str, disambiguators: &[&str]) -> String {
    let mut id = format!("{}_{}_{}", type_tag, block, normalize_address(address));
    for part in disambiguators {
        id.push('_');
        id.push_str(&part.trim().to_lowercase());
    }
    id
}
