use crate::liquidity::Liquidity;
use crate::numeric::{fixed_from_bps, to_percent, BASIS_POINTS_SCALE};
use crate::{InitArg, LedgerStatus, UpgradeArg, DEFAULT_IMPAIRED_THRESHOLD_BPS, INFO};
use ic_canister_log::log;
use serde::Serialize;
use std::cell::RefCell;
use std::fmt;

/// Controls which operations the ledger can perform.
#[derive(candid::CandidType, Clone, Debug, PartialEq, Eq, serde::Deserialize, Serialize, Copy)]
pub enum Mode {
    /// Ledger state is read-only.
    ReadOnly,
    /// No restrictions on the ledger interactions.
    GeneralAvailability,
}

impl Mode {
    pub fn is_available(&self) -> bool {
        match self {
            Mode::ReadOnly => false,
            Mode::GeneralAvailability => true,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::ReadOnly => write!(f, "Read-only"),
            Mode::GeneralAvailability => write!(f, "General availability"),
        }
    }
}

impl Default for Mode {
    fn default() -> Self {
        Self::GeneralAvailability
    }
}

thread_local! {
    static __STATE: RefCell<Option<State>> = RefCell::default();
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct State {
    pub liquidity: Liquidity,
    pub mode: Mode,
}

impl From<InitArg> for State {
    fn from(args: InitArg) -> Self {
        Self {
            liquidity: Liquidity::new(
                args.impaired_threshold_bps
                    .unwrap_or(DEFAULT_IMPAIRED_THRESHOLD_BPS),
            ),
            mode: Mode::GeneralAvailability,
        }
    }
}

/// Rejects impairment thresholds above a unit share price.
pub fn validate_impaired_threshold(bps: Option<u16>) -> Result<(), String> {
    match bps {
        Some(bps) if bps as u128 > BASIS_POINTS_SCALE => Err(format!(
            "impaired_threshold_bps must not exceed {BASIS_POINTS_SCALE}, got {bps}"
        )),
        _ => Ok(()),
    }
}

impl State {
    pub fn upgrade(&mut self, args: UpgradeArg) {
        if let Some(mode) = args.mode {
            log!(INFO, "[upgrade] switched to {mode} mode");
            self.mode = mode;
        }
        if let Some(bps) = args.impaired_threshold_bps {
            log!(
                INFO,
                "[upgrade] impaired threshold changed from {} to {bps} bps ({}% of a unit share)",
                self.liquidity.impaired_threshold_bps(),
                to_percent(fixed_from_bps(bps))
            );
            self.liquidity.set_impaired_threshold_bps(bps);
        }
    }

    pub fn status(&self) -> LedgerStatus {
        let active = self.liquidity.active_ticks();
        let (total_value, total_available, total_pending) = self
            .liquidity
            .iter_nodes()
            .fold((0u128, 0u128, 0u128), |(value, available, pending), (_, node)| {
                (
                    value.saturating_add(node.value),
                    available.saturating_add(node.available),
                    pending.saturating_add(node.pending),
                )
            });
        LedgerStatus {
            mode: self.mode,
            active_nodes: active.len() as u64,
            total_value,
            total_available,
            total_pending,
            impaired_threshold_bps: self.liquidity.impaired_threshold_bps(),
        }
    }

    pub fn total_redemptions_pending(&self) -> u128 {
        self.liquidity
            .iter_nodes()
            .fold(0u128, |total, (_, node)| {
                total.saturating_add(node.redemptions.pending)
            })
    }

    /// Checks whether the internal state of the ledger is consistent.
    pub fn check_invariants(&self) -> Result<(), String> {
        validate_impaired_threshold(Some(self.liquidity.impaired_threshold_bps()))?;
        self.liquidity.check_invariants()
    }

    /// Checks that `self` and `other` hold the same ledger, field by field.
    pub fn check_semantically_eq(&self, other: &Self) -> Result<(), String> {
        ensure_eq!(self.mode, other.mode, "mode does not match");
        ensure_eq!(
            self.liquidity.impaired_threshold_bps(),
            other.liquidity.impaired_threshold_bps(),
            "impaired threshold does not match"
        );
        ensure_eq!(
            self.liquidity.active_ticks(),
            other.liquidity.active_ticks(),
            "active ticks do not match"
        );
        for (tick, node) in self.liquidity.iter_nodes() {
            ensure_eq!(
                *node,
                other.liquidity.node(tick),
                "node at tick {} does not match",
                tick
            );
        }
        ensure_eq!(
            self.liquidity.iter_nodes().count(),
            other.liquidity.iter_nodes().count(),
            "node count does not match"
        );
        Ok(())
    }
}

/// Mutates (part of) the current state using `f`.
///
/// Panics if there is no state.
pub fn mutate_state<F, R>(f: F) -> R
where
    F: FnOnce(&mut State) -> R,
{
    __STATE.with(|s| f(s.borrow_mut().as_mut().expect("State not initialized!")))
}

/// Read (part of) the current state using `f`.
///
/// Panics if there is no state.
pub fn read_state<F, R>(f: F) -> R
where
    F: FnOnce(&State) -> R,
{
    __STATE.with(|s| f(s.borrow().as_ref().expect("State not initialized!")))
}

/// Replaces the current state.
pub fn replace_state(state: State) {
    __STATE.with(|s| {
        *s.borrow_mut() = Some(state);
    });
}
