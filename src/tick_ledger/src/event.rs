use crate::state::State;
use crate::storage::record_event;
use crate::{InitArg, LedgerError, RedeemSuccess, UpgradeArg};
use candid::CandidType;
use serde::{Deserialize, Serialize};

/// A successful ledger state modification.
///
/// Every event carries the timestamp (seconds) the operation ran at, so replaying the
/// log reproduces accrual exactly.
#[derive(CandidType, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    #[serde(rename = "init")]
    Init(InitArg),

    #[serde(rename = "upgrade")]
    Upgrade(UpgradeArg),

    #[serde(rename = "deposit")]
    Deposit {
        tick: u128,
        amount: u128,
        timestamp: u64,
    },

    #[serde(rename = "use_liquidity")]
    UseLiquidity {
        tick: u128,
        used: u128,
        pending: u128,
        duration: u64,
        timestamp: u64,
    },

    #[serde(rename = "restore")]
    Restore {
        tick: u128,
        used: u128,
        pending: u128,
        restored: u128,
        duration: u64,
        elapsed: u64,
        timestamp: u64,
    },

    #[serde(rename = "redeem")]
    Redeem {
        tick: u128,
        shares: u128,
        timestamp: u64,
    },
}

impl Event {
    /// The tick the event touched, if any.
    pub fn tick(&self) -> Option<u128> {
        match self {
            Event::Init(_) | Event::Upgrade(_) => None,
            Event::Deposit { tick, .. }
            | Event::UseLiquidity { tick, .. }
            | Event::Restore { tick, .. }
            | Event::Redeem { tick, .. } => Some(*tick),
        }
    }
}

#[derive(Debug)]
pub enum ReplayLogError {
    /// There are no events in the event log.
    EmptyLog,
    /// The event log is inconsistent.
    InconsistentLog(String),
}

fn inconsistent(index: usize, tick: Option<u128>, error: LedgerError) -> ReplayLogError {
    let target = tick.map(|t| format!(" on tick {t}")).unwrap_or_default();
    ReplayLogError::InconsistentLog(format!(
        "event #{index}{target} failed to apply: {error:?}"
    ))
}

pub fn replay(mut events: impl Iterator<Item = Event>) -> Result<State, ReplayLogError> {
    let mut state = match events.next() {
        Some(Event::Init(args)) => State::from(args),
        Some(evt) => {
            return Err(ReplayLogError::InconsistentLog(format!(
                "The first event is not Init: {:?}",
                evt
            )))
        }
        None => return Err(ReplayLogError::EmptyLog),
    };
    for (index, event) in events.enumerate().map(|(i, e)| (i + 1, e)) {
        let touched = event.tick();
        match event {
            Event::Init(_) => {
                return Err(ReplayLogError::InconsistentLog(format!(
                    "event #{index} is a second Init"
                )))
            }
            Event::Upgrade(upgrade_args) => state.upgrade(upgrade_args),
            Event::Deposit {
                tick,
                amount,
                timestamp,
            } => {
                state
                    .liquidity
                    .deposit(tick, amount, timestamp)
                    .map_err(|e| inconsistent(index, touched, e))?;
            }
            Event::UseLiquidity {
                tick,
                used,
                pending,
                duration,
                timestamp,
            } => state
                .liquidity
                .use_liquidity(tick, used, pending, duration, timestamp)
                .map_err(|e| inconsistent(index, touched, e))?,
            Event::Restore {
                tick,
                used,
                pending,
                restored,
                duration,
                elapsed,
                timestamp,
            } => state
                .liquidity
                .restore(tick, used, pending, restored, duration, elapsed, timestamp)
                .map_err(|e| inconsistent(index, touched, e))?,
            Event::Redeem {
                tick,
                shares,
                timestamp,
            } => {
                state
                    .liquidity
                    .redeem(tick, shares, timestamp)
                    .map_err(|e| inconsistent(index, touched, e))?;
            }
        }
    }
    Ok(state)
}

pub fn record_deposit(
    state: &mut State,
    tick: u128,
    amount: u128,
    now: u64,
) -> Result<u128, LedgerError> {
    let shares = state.liquidity.deposit(tick, amount, now)?;
    record_event(&Event::Deposit {
        tick,
        amount,
        timestamp: now,
    });
    Ok(shares)
}

pub fn record_use_liquidity(
    state: &mut State,
    tick: u128,
    used: u128,
    pending: u128,
    duration: u64,
    now: u64,
) -> Result<(), LedgerError> {
    state
        .liquidity
        .use_liquidity(tick, used, pending, duration, now)?;
    record_event(&Event::UseLiquidity {
        tick,
        used,
        pending,
        duration,
        timestamp: now,
    });
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn record_restore(
    state: &mut State,
    tick: u128,
    used: u128,
    pending: u128,
    restored: u128,
    duration: u64,
    elapsed: u64,
    now: u64,
) -> Result<(), LedgerError> {
    state
        .liquidity
        .restore(tick, used, pending, restored, duration, elapsed, now)?;
    record_event(&Event::Restore {
        tick,
        used,
        pending,
        restored,
        duration,
        elapsed,
        timestamp: now,
    });
    Ok(())
}

pub fn record_redeem(
    state: &mut State,
    tick: u128,
    shares: u128,
    now: u64,
) -> Result<RedeemSuccess, LedgerError> {
    let success = state.liquidity.redeem(tick, shares, now)?;
    record_event(&Event::Redeem {
        tick,
        shares,
        timestamp: now,
    });
    Ok(success)
}
