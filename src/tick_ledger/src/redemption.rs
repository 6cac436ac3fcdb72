use crate::numeric::{mul_div, FIXED_POINT_SCALE};
use crate::{RedemptionAvailability, MAX_REDEMPTION_SCAN};

/// One step of progress through a node's redemption queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FulfilledRedemption {
    pub shares: u128,
    pub amount: u128,
}

/// FIFO queue of shares waiting to be paid out of a node.
///
/// Redeemers are not stored. Each one keeps the `(index, target)` pair returned when
/// they joined: the first record they may draw from, and the number of queued shares
/// ahead of them at that record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Redemptions {
    pub pending: u128,
    pub fulfilled: Vec<FulfilledRedemption>,
}

/// Outcome of running the queue against a node's balances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fulfillment {
    /// `shares` were paid `amount` out of available cash.
    Paid { shares: u128, amount: u128 },
    /// The node is worthless; `shares` were written off for nothing.
    WrittenOff { shares: u128 },
}

impl Redemptions {
    /// Index of the next record to be written.
    pub fn index(&self) -> u64 {
        self.fulfilled.len() as u64
    }

    /// Queues `shares` and returns the snapshot the redeemer must keep.
    pub fn enqueue(&mut self, shares: u128) -> (u64, u128) {
        let snapshot = (self.index(), self.pending);
        self.pending += shares;
        snapshot
    }

    /// Decides how much of the queue can be fulfilled given the node's balances, and
    /// records it. The caller applies the returned fulfillment to the node.
    pub fn process(
        &mut self,
        value: u128,
        shares: u128,
        available: u128,
        loans_outstanding: bool,
    ) -> Option<Fulfillment> {
        if self.pending == 0 || shares == 0 {
            return None;
        }

        let price = mul_div(value, FIXED_POINT_SCALE, shares);
        if price == 0 {
            // Outstanding repayments may still restore value.
            if loans_outstanding {
                return None;
            }
            let written_off = self.pending;
            self.record(written_off, 0);
            return Some(Fulfillment::WrittenOff {
                shares: written_off,
            });
        }

        let redeemable = mul_div(available, FIXED_POINT_SCALE, price).min(self.pending);
        if redeemable == 0 {
            return None;
        }
        let amount = mul_div(redeemable, price, FIXED_POINT_SCALE);
        self.record(redeemable, amount);
        Some(Fulfillment::Paid {
            shares: redeemable,
            amount,
        })
    }

    fn record(&mut self, shares: u128, amount: u128) {
        self.fulfilled.push(FulfilledRedemption { shares, amount });
        self.pending -= shares;
    }

    /// Replays fulfilled records for a redeemer holding `pending` shares queued at
    /// `(index, target)`.
    ///
    /// At most [`MAX_REDEMPTION_SCAN`] records are visited. To continue a partial scan,
    /// call again with `index + processed_indices`, `target - processed_shares` and
    /// `pending - shares`.
    pub fn available(&self, pending: u128, index: u64, target: u128) -> RedemptionAvailability {
        let mut result = RedemptionAvailability::default();
        let mut target = target;

        let start = usize::try_from(index).unwrap_or(usize::MAX);
        for fulfilled in self
            .fulfilled
            .iter()
            .skip(start)
            .take(MAX_REDEMPTION_SCAN)
        {
            if result.shares == pending {
                break;
            }
            if target < fulfilled.shares {
                let shares = (pending - result.shares).min(fulfilled.shares - target);
                result.shares += shares;
                result.amount += mul_div(shares, fulfilled.amount, fulfilled.shares);
                result.processed_shares += target;
                target = 0;
            } else {
                result.processed_shares += fulfilled.shares;
                target -= fulfilled.shares;
            }
            result.processed_indices += 1;
        }

        result
    }
}
