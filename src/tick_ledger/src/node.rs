use crate::accrual::Accrual;
use crate::numeric::{mul_div, FIXED_POINT_SCALE};
use crate::redemption::{Fulfillment, Redemptions};
use crate::{NodeInfo, LOCKED_SHARES};

/// One liquidity bucket, addressed by its tick key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Node {
    /// Basis for share pricing.
    pub value: u128,
    pub shares: u128,
    /// Cash on hand.
    pub available: u128,
    /// Principal plus interest owed by loans drawing on this node.
    pub pending: u128,
    pub prev: u128,
    pub next: u128,
    pub redemptions: Redemptions,
    pub accrual: Accrual,
}

impl Node {
    pub fn is_active(&self) -> bool {
        self.prev != 0 || self.next != 0
    }

    pub fn is_empty(&self) -> bool {
        self.shares <= LOCKED_SHARES && self.pending == 0
    }

    /// `threshold` is a fixed-point share price.
    pub fn is_impaired(&self, threshold: u128) -> bool {
        self.shares != 0 && self.redemption_price() < threshold
    }

    /// Price at which new shares are minted. Discounts interest that has not accrued yet
    /// and never exceeds what the node would hold if every loan repaid in full.
    pub fn deposit_price(&self, now: u64) -> u128 {
        if self.shares == 0 {
            return FIXED_POINT_SCALE;
        }
        let backing = self
            .value
            .saturating_add(self.accrual.accrued_at(now))
            .min(self.available.saturating_add(self.pending));
        mul_div(backing, FIXED_POINT_SCALE, self.shares)
    }

    pub fn redemption_price(&self) -> u128 {
        if self.shares == 0 {
            return 0;
        }
        mul_div(self.value, FIXED_POINT_SCALE, self.shares)
    }

    /// Pays out as much of the redemption queue as the node can afford right now.
    pub fn process_redemptions(&mut self) -> Option<Fulfillment> {
        let fulfillment = self.redemptions.process(
            self.value,
            self.shares,
            self.available,
            self.pending != 0,
        )?;
        match fulfillment {
            Fulfillment::Paid { shares, amount } => {
                self.shares -= shares;
                self.value = self.value.saturating_sub(amount);
                self.available = self.available.saturating_sub(amount);
            }
            Fulfillment::WrittenOff { shares } => {
                self.shares -= shares;
                self.value = 0;
                self.available = 0;
                if self.shares <= LOCKED_SHARES {
                    self.shares = 0;
                }
            }
        }
        Some(fulfillment)
    }

    pub fn to_info(&self, tick: u128) -> NodeInfo {
        NodeInfo {
            tick,
            value: self.value,
            shares: self.shares,
            available: self.available,
            pending: self.pending,
            redemptions_pending: self.redemptions.pending,
            redemptions_index: self.redemptions.index(),
            accrued: self.accrual.accrued,
            rate: self.accrual.rate,
            accrual_timestamp: self.accrual.timestamp,
            prev: self.prev,
            next: self.next,
            active: self.is_active(),
        }
    }
}
