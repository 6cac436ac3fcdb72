use candid::{CandidType, Deserialize};
use serde::Serialize;

// Like assert_eq, but returns an error instead of panicking.
macro_rules! ensure_eq {
    ($lhs:expr, $rhs:expr, $msg:expr $(, $args:expr)* $(,)*) => {
        if $lhs != $rhs {
            return Err(format!("{} ({:?}) != {} ({:?}): {}",
                               std::stringify!($lhs), $lhs,
                               std::stringify!($rhs), $rhs,
                               format!($msg $(,$args)*)));
        }
    }
}

macro_rules! ensure {
    ($cond:expr, $msg:expr $(, $args:expr)* $(,)*) => {
        if !$cond {
            return Err(format!("Condition {} is false: {}",
                               std::stringify!($cond),
                               format!($msg $(,$args)*)));
        }
    }
}

pub mod accrual;
pub mod event;
pub mod liquidity;
pub mod logs;
pub mod node;
pub mod numeric;
pub mod redemption;
pub mod state;
pub mod storage;
pub mod tick;


pub use crate::logs::{DEBUG, INFO};
pub use crate::state::{mutate_state, read_state, Mode};

pub const SEC_NANOS: u64 = 1_000_000_000;

/// Shares withheld from the first depositor of a node and never redeemable.
pub const LOCKED_SHARES: u128 = 1_000_000;
/// Upper bound on the number of nodes a single borrow may draw from.
pub const MAX_NUM_NODES: usize = 32;
/// Upper bound on fulfilled redemption records replayed per `redemption_available` call.
pub const MAX_REDEMPTION_SCAN: usize = 150;
/// Minimum spacing between neighboring absolute ticks, relative to the lower limit.
pub const ABSOLUTE_TICK_LIMIT_SPACING_BPS: u128 = 1_000;
/// Minimum spacing between neighboring ratio ticks, in absolute basis points.
pub const RATIO_TICK_LIMIT_SPACING_BPS: u128 = 500;
pub const DEFAULT_IMPAIRED_THRESHOLD_BPS: u16 = 500;

#[derive(CandidType, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerArg {
    Init(InitArg),
    Upgrade(UpgradeArg),
}

#[derive(CandidType, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitArg {
    /// Share price, in basis points of the unit price, below which a node is impaired.
    pub impaired_threshold_bps: Option<u16>,
}

#[derive(CandidType, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeArg {
    pub mode: Option<Mode>,
    pub impaired_threshold_bps: Option<u16>,
}

#[derive(CandidType, Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum LedgerError {
    InvalidTick,
    InsufficientTickSpacing,
    InsufficientLiquidity,
    InsufficientShares,
    InactiveLiquidity,
    InvalidArgument { reason: String },
    AnonymousCallerNotAllowed,
    TemporarilyUnavailable(String),
}

impl LedgerError {
    pub(crate) fn invalid_argument(reason: &str) -> Self {
        Self::InvalidArgument {
            reason: reason.to_string(),
        }
    }
}

/// One node's contribution to a borrow, as computed by `source`.
#[derive(CandidType, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSource {
    pub tick: u128,
    pub used: u128,
    pub pending: u128,
}

#[derive(CandidType, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceResult {
    pub sources: Vec<NodeSource>,
    pub count: u16,
}

#[derive(CandidType, Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SourceArg {
    pub amount: u128,
    pub ticks: Vec<u128>,
    pub multiplier: u128,
    pub duration_class: u8,
    pub reference_price: u128,
}

#[derive(CandidType, Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct UseArg {
    pub tick: u128,
    pub used: u128,
    pub pending: u128,
    pub duration: u64,
}

#[derive(CandidType, Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RestoreArg {
    pub tick: u128,
    pub used: u128,
    pub pending: u128,
    pub restored: u128,
    pub duration: u64,
    pub elapsed: u64,
}

/// Queue position handed back to a redeemer; it is the only record of the claim.
#[derive(CandidType, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemSuccess {
    pub index: u64,
    pub target: u128,
}

#[derive(CandidType, Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RedemptionAvailableArg {
    pub tick: u128,
    pub pending: u128,
    pub index: u64,
    pub target: u128,
}

#[derive(CandidType, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionAvailability {
    pub shares: u128,
    pub amount: u128,
    pub processed_indices: u64,
    pub processed_shares: u128,
}

#[derive(CandidType, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub tick: u128,
    pub value: u128,
    pub shares: u128,
    pub available: u128,
    pub pending: u128,
    pub redemptions_pending: u128,
    pub redemptions_index: u64,
    pub accrued: u128,
    pub rate: u128,
    pub accrual_timestamp: u64,
    pub prev: u128,
    pub next: u128,
    pub active: bool,
}

#[derive(CandidType, Deserialize, Debug)]
pub struct LedgerStatus {
    pub mode: Mode,
    pub active_nodes: u64,
    pub total_value: u128,
    pub total_available: u128,
    pub total_pending: u128,
    pub impaired_threshold_bps: u16,
}

#[derive(CandidType, Deserialize)]
pub struct GetEventsArg {
    pub start: u64,
    pub length: u64,
}
