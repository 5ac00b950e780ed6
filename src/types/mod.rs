/// Numeric and address conversions
pub mod conversions;
/// Deterministic identity builders
pub mod ids;
/// Persisted documents (statics, snapshots, prices, blocks, operations)
pub mod records;

pub use records::{
    BlockRecord, HypervisorStatic, HypervisorStatus, OperationRecord, PriceRecord, RawOperation,
    RewardStatic, RewardStatus, TokenInfo, TotalAmounts, OPERATION_TOPICS,
};
