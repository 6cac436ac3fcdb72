//! The node store and the operations a lending orchestrator performs against it.
//!
//! Nodes live in an arena keyed by tick. Active nodes form a doubly linked list ordered by
//! (limit type, limit), threaded between the [`HEAD`] and [`TAIL`] sentinel entries. Every
//! operation validates before touching the arena, so an `Err` leaves it untouched.

use crate::logs::{DEBUG, INFO};
use crate::node::Node;
use crate::numeric::{fixed_from_bps, mul_div, BASIS_POINTS_SCALE, FIXED_POINT_SCALE};
use crate::redemption::Fulfillment;
use crate::tick::{self, LimitType, Tick};
use crate::{
    LedgerError, NodeInfo, NodeSource, RedeemSuccess, RedemptionAvailability, SourceResult,
    ABSOLUTE_TICK_LIMIT_SPACING_BPS, LOCKED_SHARES, MAX_NUM_NODES,
    RATIO_TICK_LIMIT_SPACING_BPS,
};
use ic_canister_log::log;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const HEAD: u128 = 0;
pub const TAIL: u128 = u128::MAX;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Liquidity {
    nodes: BTreeMap<u128, Node>,
    impaired_threshold_bps: u16,
}

impl Liquidity {
    pub fn new(impaired_threshold_bps: u16) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            HEAD,
            Node {
                next: TAIL,
                ..Default::default()
            },
        );
        nodes.insert(
            TAIL,
            Node {
                prev: HEAD,
                ..Default::default()
            },
        );
        Self {
            nodes,
            impaired_threshold_bps,
        }
    }

    pub fn impaired_threshold_bps(&self) -> u16 {
        self.impaired_threshold_bps
    }

    pub fn set_impaired_threshold_bps(&mut self, bps: u16) {
        self.impaired_threshold_bps = bps;
    }

    fn impaired_threshold(&self) -> u128 {
        fixed_from_bps(self.impaired_threshold_bps)
    }

    /// Returns the node at `tick`, or an uninstantiated one if nothing was ever
    /// deposited there.
    pub fn node(&self, tick: u128) -> Node {
        self.nodes.get(&tick).cloned().unwrap_or_default()
    }

    pub fn node_info(&self, tick: u128) -> NodeInfo {
        self.node(tick).to_info(tick)
    }

    pub fn is_active(&self, tick: u128) -> bool {
        tick != HEAD && tick != TAIL && self.nodes.get(&tick).is_some_and(Node::is_active)
    }

    /// Ticks of all active nodes, in ledger order.
    pub fn active_ticks(&self) -> Vec<u128> {
        let mut ticks = vec![];
        let mut cursor = self.nodes[&HEAD].next;
        while cursor != TAIL {
            ticks.push(cursor);
            cursor = self.nodes[&cursor].next;
        }
        ticks
    }

    /// Active nodes from `start` through `end` inclusive, following ledger order.
    ///
    /// `start == HEAD` begins at the first active node and `end == TAIL` runs to the
    /// last. An inactive `start` yields nothing.
    pub fn nodes_in_range(&self, start: u128, end: u128) -> Vec<NodeInfo> {
        let mut cursor = if start == HEAD {
            self.nodes[&HEAD].next
        } else if self.is_active(start) {
            start
        } else {
            return vec![];
        };

        let mut infos = vec![];
        while cursor != TAIL {
            let node = &self.nodes[&cursor];
            infos.push(node.to_info(cursor));
            if cursor == end {
                break;
            }
            cursor = node.next;
        }
        infos
    }

    /// Iterates over every instantiated node, sentinels excluded.
    pub fn iter_nodes(&self) -> impl Iterator<Item = (u128, &Node)> {
        self.nodes
            .iter()
            .filter(|(tick, _)| **tick != HEAD && **tick != TAIL)
            .map(|(tick, node)| (*tick, node))
    }

    pub fn deposit_share_price(&self, tick: u128, now: u64) -> u128 {
        self.node(tick).deposit_price(now)
    }

    pub fn redemption_share_price(&self, tick: u128) -> u128 {
        self.node(tick).redemption_price()
    }

    /// Works out where `tick` would be linked. `None` means it is already active.
    fn plan_instantiate(&self, tick: u128) -> Result<Option<(u128, u128)>, LedgerError> {
        let node = self.node(tick);
        if node.is_active() {
            return Ok(None);
        }
        if !node.is_empty() {
            return Err(LedgerError::InactiveLiquidity);
        }

        let new = tick::decode(tick, BASIS_POINTS_SCALE)?;

        let mut prev = HEAD;
        let mut next = self.nodes[&HEAD].next;
        while next != TAIL {
            let current = tick::decode(next, BASIS_POINTS_SCALE)?;
            match new.cmp_order(&current) {
                Ordering::Greater => {
                    prev = next;
                    next = self.nodes[&next].next;
                }
                Ordering::Equal => return Err(LedgerError::InsufficientTickSpacing),
                Ordering::Less => break,
            }
        }

        if prev != HEAD {
            let lower = tick::decode(prev, BASIS_POINTS_SCALE)?;
            if lower.limit_type == new.limit_type
                && !sufficiently_spaced(new.limit_type, lower.limit, new.limit)
            {
                return Err(LedgerError::InsufficientTickSpacing);
            }
        }
        if next != TAIL {
            let upper = tick::decode(next, BASIS_POINTS_SCALE)?;
            if upper.limit_type == new.limit_type
                && !sufficiently_spaced(new.limit_type, new.limit, upper.limit)
            {
                return Err(LedgerError::InsufficientTickSpacing);
            }
        }

        Ok(Some((prev, next)))
    }

    fn link(&mut self, tick: u128, prev: u128, next: u128) {
        if let Some(node) = self.nodes.get_mut(&prev) {
            node.next = tick;
        }
        if let Some(node) = self.nodes.get_mut(&next) {
            node.prev = tick;
        }
        let node = self.nodes.entry(tick).or_default();
        node.prev = prev;
        node.next = next;
        log!(INFO, "[instantiate] linked tick {tick} between {prev} and {next}");
    }

    fn unlink(&mut self, tick: u128) {
        let Some(node) = self.nodes.get_mut(&tick) else {
            return;
        };
        let (prev, next) = (node.prev, node.next);
        node.prev = 0;
        node.next = 0;
        if let Some(node) = self.nodes.get_mut(&prev) {
            node.next = next;
        }
        if let Some(node) = self.nodes.get_mut(&next) {
            node.prev = prev;
        }
    }

    /// Unlinks `tick` if it is active but impaired or empty. Balances and redemption
    /// records stay in the arena.
    fn garbage_collect(&mut self, tick: u128) {
        let threshold = self.impaired_threshold();
        let Some(node) = self.nodes.get(&tick) else {
            return;
        };
        if !node.is_active() {
            return;
        }
        let impaired = node.is_impaired(threshold);
        let empty = node.is_empty();
        if impaired || empty {
            self.unlink(tick);
            log!(
                INFO,
                "[garbage_collect] deactivated tick {tick} (impaired: {impaired}, empty: {empty})"
            );
        }
    }

    fn process_redemptions(&mut self, tick: u128) {
        let Some(node) = self.nodes.get_mut(&tick) else {
            return;
        };
        match node.process_redemptions() {
            Some(Fulfillment::Paid { shares, amount }) => log!(
                DEBUG,
                "[process_redemptions] tick {tick}: redeemed {shares} shares for {amount}"
            ),
            Some(Fulfillment::WrittenOff { shares }) => log!(
                INFO,
                "[process_redemptions] tick {tick}: wrote off {shares} shares of an insolvent node"
            ),
            None => return,
        }
        self.garbage_collect(tick);
    }

    /// Deposits `amount` at `tick`, instantiating the node if needed, and returns the
    /// shares credited to the depositor.
    pub fn deposit(&mut self, tick: u128, amount: u128, now: u64) -> Result<u128, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::invalid_argument("deposit amount must be positive"));
        }
        tick::validate(tick, None, 0, BASIS_POINTS_SCALE)?;
        let insertion = self.plan_instantiate(tick)?;

        let node = self.node(tick);
        let price = node.deposit_price(now);
        if price == 0 {
            return Err(LedgerError::InactiveLiquidity);
        }
        let shares = mul_div(amount, FIXED_POINT_SCALE, price);
        let first_deposit = node.shares == 0;
        if shares == 0 || (first_deposit && shares <= LOCKED_SHARES) {
            return Err(LedgerError::InsufficientShares);
        }

        let value = node.value.checked_add(amount).ok_or_else(overflow)?;
        let total_shares = node.shares.checked_add(shares).ok_or_else(overflow)?;
        let available = node.available.checked_add(amount).ok_or_else(overflow)?;

        if let Some((prev, next)) = insertion {
            self.link(tick, prev, next);
        }
        let node = self.nodes.entry(tick).or_default();
        node.accrual.accrue(now);
        node.value = value;
        node.shares = total_shares;
        node.available = available;
        self.process_redemptions(tick);

        log!(
            DEBUG,
            "[deposit] tick {tick}: {amount} for {shares} shares at price {price}"
        );

        Ok(if first_deposit {
            shares - LOCKED_SHARES
        } else {
            shares
        })
    }

    /// Draws `used` out of the node's cash against a loan that will repay `pending` over
    /// `duration` seconds.
    pub fn use_liquidity(
        &mut self,
        tick: u128,
        used: u128,
        pending: u128,
        duration: u64,
        now: u64,
    ) -> Result<(), LedgerError> {
        if !self.is_active(tick) {
            return Err(LedgerError::InactiveLiquidity);
        }
        if pending < used {
            return Err(LedgerError::invalid_argument("pending must cover used"));
        }
        if duration == 0 {
            return Err(LedgerError::invalid_argument("duration must be positive"));
        }
        let Some(node) = self.nodes.get_mut(&tick) else {
            return Err(LedgerError::InactiveLiquidity);
        };
        if used > node.available {
            return Err(LedgerError::InsufficientLiquidity);
        }
        let total_pending = node.pending.checked_add(pending).ok_or_else(overflow)?;
        if node.accrual.rate_with_loan(pending - used, duration).is_none() {
            return Err(overflow());
        }

        node.available -= used;
        node.pending = total_pending;
        node.accrual.accrue(now);
        node.accrual.add_loan(pending - used, duration);
        Ok(())
    }

    /// Settles a loan previously drawn with `use_liquidity(tick, used, pending, duration)`.
    /// `restored` is what actually came back, which may fall short of `pending`.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        &mut self,
        tick: u128,
        used: u128,
        pending: u128,
        restored: u128,
        duration: u64,
        elapsed: u64,
        now: u64,
    ) -> Result<(), LedgerError> {
        tick::validate(tick, None, 0, BASIS_POINTS_SCALE)?;
        if pending < used {
            return Err(LedgerError::invalid_argument("pending must cover used"));
        }
        if duration == 0 {
            return Err(LedgerError::invalid_argument("duration must be positive"));
        }
        let Some(node) = self.nodes.get_mut(&tick) else {
            return Err(LedgerError::InactiveLiquidity);
        };
        if pending > node.pending {
            return Err(LedgerError::invalid_argument(
                "restoring more pending than outstanding",
            ));
        }

        let value = node.value.checked_add(restored).ok_or_else(overflow)?;
        let available = node.available.checked_add(restored).ok_or_else(overflow)?;

        node.value = value.saturating_sub(used);
        node.available = available;
        node.pending -= pending;

        self.garbage_collect(tick);
        self.process_redemptions(tick);

        if let Some(node) = self.nodes.get_mut(&tick) {
            node.accrual.accrue(now);
            node.accrual.remove_loan(pending - used, duration, elapsed);
        }

        log!(
            DEBUG,
            "[restore] tick {tick}: used {used}, pending {pending}, restored {restored}"
        );
        Ok(())
    }

    /// Queues `shares` for redemption and returns the position the redeemer must keep
    /// to later claim proceeds through [`Liquidity::redemption_available`].
    pub fn redeem(
        &mut self,
        tick: u128,
        shares: u128,
        now: u64,
    ) -> Result<RedeemSuccess, LedgerError> {
        tick::validate(tick, None, 0, BASIS_POINTS_SCALE)?;
        let Some(node) = self.nodes.get_mut(&tick) else {
            return Err(LedgerError::InsufficientShares);
        };
        let redeemable = node
            .shares
            .saturating_sub(LOCKED_SHARES)
            .saturating_sub(node.redemptions.pending);
        if shares == 0 || shares > redeemable {
            return Err(LedgerError::InsufficientShares);
        }

        node.accrual.accrue(now);
        let (index, target) = node.redemptions.enqueue(shares);
        self.process_redemptions(tick);

        log!(
            DEBUG,
            "[redeem] tick {tick}: queued {shares} shares at index {index}, target {target}"
        );
        Ok(RedeemSuccess { index, target })
    }

    pub fn redemption_available(
        &self,
        tick: u128,
        pending: u128,
        index: u64,
        target: u128,
    ) -> RedemptionAvailability {
        match self.nodes.get(&tick) {
            Some(node) => node.redemptions.available(pending, index, target),
            None => RedemptionAvailability::default(),
        }
    }

    /// Plans how to source `amount` from `ticks`, a strictly ascending sequence chosen by
    /// the caller. Each node contributes at most `limit * multiplier` cumulatively, so
    /// later nodes absorb what the lower ones may not. Inactive nodes contribute nothing.
    pub fn source(
        &self,
        amount: u128,
        ticks: &[u128],
        multiplier: u128,
        duration_class: u8,
        reference_price: u128,
    ) -> Result<SourceResult, LedgerError> {
        let mut sources = vec![];
        let mut taken: u128 = 0;
        let mut previous = None;

        for &tick in ticks {
            if taken == amount {
                break;
            }
            if sources.len() == MAX_NUM_NODES {
                return Err(LedgerError::InsufficientLiquidity);
            }
            let limit = tick::validate(tick, previous, duration_class, reference_price)?;
            previous = Some(tick);

            let available = if self.is_active(tick) {
                self.nodes[&tick].available
            } else {
                0
            };
            let used = limit
                .saturating_mul(multiplier)
                .saturating_sub(taken)
                .min(available)
                .min(amount - taken);
            sources.push(NodeSource {
                tick,
                used,
                pending: 0,
            });
            taken += used;
        }

        if taken < amount {
            return Err(LedgerError::InsufficientLiquidity);
        }
        Ok(SourceResult {
            count: sources.len() as u16,
            sources,
        })
    }

    /// Checks the linked list against the arena: links are mutual, every linked node is
    /// reachable from the head, and neighbors respect ordering and spacing.
    pub fn check_invariants(&self) -> Result<(), String> {
        let head = self
            .nodes
            .get(&HEAD)
            .ok_or_else(|| "head sentinel is missing".to_string())?;
        ensure!(self.nodes.contains_key(&TAIL), "tail sentinel is missing");

        let mut visited = 0;
        let mut prev = HEAD;
        let mut cursor = head.next;
        while cursor != TAIL {
            let node = self
                .nodes
                .get(&cursor)
                .ok_or_else(|| format!("linked tick {cursor} is not in the arena"))?;
            ensure_eq!(node.prev, prev, "broken back link at tick {}", cursor);

            if prev != HEAD {
                let lower = tick::decode(prev, BASIS_POINTS_SCALE).map_err(|e| format!("{e:?}"))?;
                let upper =
                    tick::decode(cursor, BASIS_POINTS_SCALE).map_err(|e| format!("{e:?}"))?;
                ensure!(
                    upper.cmp_order(&lower) == Ordering::Greater,
                    "tick {} is not ordered after {}",
                    cursor,
                    prev
                );
                ensure!(
                    lower.limit_type != upper.limit_type
                        || sufficiently_spaced(upper.limit_type, lower.limit, upper.limit),
                    "ticks {} and {} are too close",
                    prev,
                    cursor
                );
            }

            visited += 1;
            ensure!(visited < self.nodes.len(), "cycle in the node list");
            prev = cursor;
            cursor = node.next;
        }
        ensure_eq!(self.nodes[&TAIL].prev, prev, "broken tail link");

        let linked = self.iter_nodes().filter(|(_, node)| node.is_active()).count();
        ensure_eq!(linked, visited, "linked nodes unreachable from the head");

        for (tick, node) in self.iter_nodes() {
            ensure!(
                node.redemptions.pending <= node.shares,
                "tick {} queues more shares than it has",
                tick
            );
        }
        Ok(())
    }
}

/// Whether `upper` is far enough above `lower` for two ticks of the same type to coexist.
fn overflow() -> LedgerError {
    LedgerError::invalid_argument("amount overflows the node balances")
}

fn sufficiently_spaced(limit_type: LimitType, lower: u128, upper: u128) -> bool {
    match limit_type {
        LimitType::Absolute => {
            upper
                >= mul_div(
                    lower,
                    BASIS_POINTS_SCALE + ABSOLUTE_TICK_LIMIT_SPACING_BPS,
                    BASIS_POINTS_SCALE,
                )
        }
        LimitType::Ratio => upper >= lower.saturating_add(RATIO_TICK_LIMIT_SPACING_BPS),
    }
}

/// Convenience for building keys in tests and tooling.
pub fn absolute_tick(limit: u128, duration_class: u8, rate_class: u8) -> u128 {
    Tick::absolute(limit, duration_class, rate_class).key()
}

pub fn ratio_tick(limit_bps: u128, duration_class: u8, rate_class: u8) -> u128 {
    Tick::ratio(limit_bps, duration_class, rate_class).key()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const ONE: u128 = FIXED_POINT_SCALE;
    const DAY: u64 = 86_400;

    fn liquidity() -> Liquidity {
        Liquidity::new(crate::DEFAULT_IMPAIRED_THRESHOLD_BPS)
    }

    fn abs(limit: u128) -> u128 {
        absolute_tick(limit * ONE, 0, 0)
    }

    #[test]
    fn deposit_instantiates_with_locked_shares() {
        let mut liquidity = liquidity();
        let tick = abs(10);
        let shares = liquidity.deposit(tick, 5 * ONE, 0).unwrap();
        assert_eq!(shares, 5 * ONE - LOCKED_SHARES);

        let node = liquidity.node(tick);
        assert_eq!(node.value, 5 * ONE);
        assert_eq!(node.shares, 5 * ONE);
        assert_eq!(node.available, 5 * ONE);
        assert!(node.is_active());
        assert_eq!(liquidity.active_ticks(), vec![tick]);

        // second deposit is priced at 1.0 and keeps every share
        assert_eq!(liquidity.deposit(tick, ONE, 0), Ok(ONE));
    }

    #[test]
    fn deposit_rejects_bad_input() {
        let mut liquidity = liquidity();
        assert_matches!(
            liquidity.deposit(abs(10), 0, 0),
            Err(LedgerError::InvalidArgument { .. })
        );
        assert_matches!(liquidity.deposit(0, ONE, 0), Err(LedgerError::InvalidTick));
        assert_matches!(liquidity.deposit(TAIL, ONE, 0), Err(LedgerError::InvalidTick));
        assert_matches!(
            liquidity.deposit(abs(10), LOCKED_SHARES, 0),
            Err(LedgerError::InsufficientShares)
        );
        assert_eq!(liquidity, self::liquidity());
    }

    #[test]
    fn nodes_are_kept_in_tick_order() {
        let mut liquidity = liquidity();
        let ticks = [abs(50), ratio_tick(1_000, 0, 0), abs(10), ratio_tick(500, 0, 0), abs(20)];
        for tick in ticks {
            liquidity.deposit(tick, ONE, 0).unwrap();
        }
        assert_eq!(
            liquidity.active_ticks(),
            vec![
                ratio_tick(500, 0, 0),
                ratio_tick(1_000, 0, 0),
                abs(10),
                abs(20),
                abs(50)
            ]
        );
        liquidity.check_invariants().unwrap();
    }

    #[test]
    fn absolute_spacing_is_ten_percent() {
        let mut liquidity = liquidity();
        liquidity.deposit(abs(100), ONE, 0).unwrap();

        assert_matches!(
            liquidity.deposit(abs(103), ONE, 0),
            Err(LedgerError::InsufficientTickSpacing)
        );
        assert_matches!(
            liquidity.deposit(abs(95), ONE, 0),
            Err(LedgerError::InsufficientTickSpacing)
        );
        liquidity.deposit(abs(110), ONE, 0).unwrap();
        liquidity.deposit(abs(90), ONE, 0).unwrap();
        liquidity.check_invariants().unwrap();
    }

    #[test]
    fn equal_limits_with_other_classes_collide() {
        let mut liquidity = liquidity();
        liquidity.deposit(absolute_tick(100 * ONE, 1, 1), ONE, 0).unwrap();
        assert_matches!(
            liquidity.deposit(absolute_tick(100 * ONE, 2, 0), ONE, 0),
            Err(LedgerError::InsufficientTickSpacing)
        );
    }

    #[test]
    fn ratio_spacing_is_five_hundred_bps() {
        let mut liquidity = liquidity();
        liquidity.deposit(ratio_tick(500, 0, 0), ONE, 0).unwrap();
        assert_matches!(
            liquidity.deposit(ratio_tick(502, 0, 0), ONE, 0),
            Err(LedgerError::InsufficientTickSpacing)
        );
        liquidity.deposit(ratio_tick(1_000, 0, 0), ONE, 0).unwrap();

        // spacing is only enforced between ticks of the same type
        liquidity.deposit(abs(1), ONE, 0).unwrap();
        liquidity.check_invariants().unwrap();
    }

    #[test]
    fn use_and_restore_round_trip() {
        let mut liquidity = liquidity();
        let tick = abs(10);
        let duration = 30 * DAY;
        liquidity.deposit(tick, 5 * ONE, 0).unwrap();

        liquidity
            .use_liquidity(tick, 3 * ONE, 32 * ONE / 10, duration, 0)
            .unwrap();
        let node = liquidity.node(tick);
        assert_eq!(node.available, 2 * ONE);
        assert_eq!(node.pending, 32 * ONE / 10);
        assert_eq!(node.accrual.rate, (2 * ONE / 10) / duration as u128);

        liquidity
            .restore(tick, 3 * ONE, 32 * ONE / 10, 32 * ONE / 10, duration, duration, duration)
            .unwrap();
        let node = liquidity.node(tick);
        assert_eq!(node.value, 52 * ONE / 10);
        assert_eq!(node.available, 52 * ONE / 10);
        assert_eq!(node.shares, 5 * ONE);
        assert_eq!(node.pending, 0);
        assert_eq!(node.accrual.rate, 0);
        assert_eq!(node.accrual.accrued, 0);
        assert!(node.is_active());
    }

    #[test]
    fn zero_interest_loan_leaves_no_trace() {
        let mut liquidity = liquidity();
        let tick = abs(10);
        liquidity.deposit(tick, 5 * ONE, 0).unwrap();
        let before = liquidity.node(tick);

        liquidity.use_liquidity(tick, 2 * ONE, 2 * ONE, DAY, 10).unwrap();
        liquidity
            .restore(tick, 2 * ONE, 2 * ONE, 2 * ONE, DAY, 5, 15)
            .unwrap();

        let after = liquidity.node(tick);
        assert_eq!(after.value, before.value);
        assert_eq!(after.shares, before.shares);
        assert_eq!(after.available, before.available);
        assert_eq!(after.accrual.accrued, 0);
        assert_eq!(after.accrual.rate, 0);
    }

    #[test]
    fn use_liquidity_checks() {
        let mut liquidity = liquidity();
        let tick = abs(10);
        assert_matches!(
            liquidity.use_liquidity(tick, ONE, ONE, DAY, 0),
            Err(LedgerError::InactiveLiquidity)
        );
        liquidity.deposit(tick, 5 * ONE, 0).unwrap();
        let snapshot = liquidity.clone();

        assert_matches!(
            liquidity.use_liquidity(tick, 6 * ONE, 7 * ONE, DAY, 0),
            Err(LedgerError::InsufficientLiquidity)
        );
        assert_matches!(
            liquidity.use_liquidity(tick, 2 * ONE, ONE, DAY, 0),
            Err(LedgerError::InvalidArgument { .. })
        );
        assert_matches!(
            liquidity.use_liquidity(tick, ONE, ONE, 0, 0),
            Err(LedgerError::InvalidArgument { .. })
        );
        assert_matches!(
            liquidity.restore(tick, ONE, ONE, ONE, DAY, 0, 0),
            Err(LedgerError::InvalidArgument { .. })
        );
        // sentinels are never addressable
        assert_matches!(
            liquidity.restore(HEAD, 0, 0, ONE, DAY, 0, 0),
            Err(LedgerError::InvalidTick)
        );
        assert_matches!(liquidity.redeem(TAIL, ONE, 0), Err(LedgerError::InvalidTick));
        assert_eq!(liquidity, snapshot);
    }

    #[test]
    fn redemptions_are_fifo_as_cash_arrives() {
        let mut liquidity = liquidity();
        let tick = abs(10);
        liquidity.deposit(tick, 10 * ONE, 0).unwrap();
        liquidity.use_liquidity(tick, 10 * ONE, 10 * ONE, DAY, 0).unwrap();

        let first = liquidity.redeem(tick, 3 * ONE, 1).unwrap();
        let second = liquidity.redeem(tick, 2 * ONE, 1).unwrap();
        assert_eq!(first, RedeemSuccess { index: 0, target: 0 });
        assert_eq!(second, RedeemSuccess { index: 0, target: 3 * ONE });

        // nothing to pay yet
        let availability = liquidity.redemption_available(tick, 3 * ONE, 0, 0);
        assert_eq!(availability.shares, 0);

        // a partial repayment of 4 pays the first redeemer fully and the second by one
        liquidity.restore(tick, 4 * ONE, 4 * ONE, 4 * ONE, DAY, 1, 2).unwrap();
        let first_claim = liquidity.redemption_available(tick, 3 * ONE, first.index, first.target);
        assert_eq!(first_claim.shares, 3 * ONE);
        assert_eq!(first_claim.amount, 3 * ONE);
        let second_claim =
            liquidity.redemption_available(tick, 2 * ONE, second.index, second.target);
        assert_eq!(second_claim.shares, ONE);
        assert_eq!(second_claim.amount, ONE);

        // the rest arrives and the second redeemer resumes where they left off
        liquidity.restore(tick, 6 * ONE, 6 * ONE, 6 * ONE, DAY, 1, 3).unwrap();
        let resumed = liquidity.redemption_available(
            tick,
            2 * ONE - second_claim.shares,
            second.index + second_claim.processed_indices,
            second.target - second_claim.processed_shares,
        );
        assert_eq!(resumed.shares, ONE);
        assert_eq!(resumed.amount, ONE);
        assert_eq!(liquidity.node(tick).redemptions.pending, 0);
    }

    #[test]
    fn redeem_checks_share_balance() {
        let mut liquidity = liquidity();
        let tick = abs(10);
        assert_matches!(liquidity.redeem(tick, ONE, 0), Err(LedgerError::InsufficientShares));
        liquidity.deposit(tick, 2 * ONE, 0).unwrap();
        assert_matches!(liquidity.redeem(tick, 0, 0), Err(LedgerError::InsufficientShares));
        liquidity.use_liquidity(tick, 2 * ONE, 2 * ONE, DAY, 0).unwrap();
        liquidity.redeem(tick, ONE, 0).unwrap();
        assert_matches!(
            liquidity.redeem(tick, ONE - LOCKED_SHARES + 1, 0),
            Err(LedgerError::InsufficientShares)
        );
    }

    #[test]
    fn locked_shares_cannot_be_redeemed() {
        let mut liquidity = liquidity();
        let tick = abs(10);
        let minted = liquidity.deposit(tick, 2 * ONE, 0).unwrap();
        assert_eq!(liquidity.node(tick).shares, 2 * ONE);
        assert_matches!(
            liquidity.redeem(tick, 2 * ONE, 0),
            Err(LedgerError::InsufficientShares)
        );

        liquidity.redeem(tick, minted, 0).unwrap();
        let node = liquidity.node(tick);
        assert_eq!(node.shares, LOCKED_SHARES);
        assert_eq!(node.value, LOCKED_SHARES);
        assert_matches!(liquidity.redeem(tick, 1, 0), Err(LedgerError::InsufficientShares));
    }

    #[test]
    fn overflowing_amounts_are_rejected_untouched() {
        let mut liquidity = liquidity();
        let tick = abs(10);
        liquidity.deposit(tick, 2 * ONE, 0).unwrap();
        liquidity.use_liquidity(tick, ONE, ONE, DAY, 0).unwrap();
        let snapshot = liquidity.clone();

        assert_matches!(
            liquidity.deposit(tick, u128::MAX - ONE, 0),
            Err(LedgerError::InvalidArgument { .. })
        );
        assert_matches!(
            liquidity.use_liquidity(tick, 0, u128::MAX, DAY, 0),
            Err(LedgerError::InvalidArgument { .. })
        );
        assert_matches!(
            liquidity.restore(tick, ONE, ONE, u128::MAX, DAY, 0, 0),
            Err(LedgerError::InvalidArgument { .. })
        );
        assert_eq!(liquidity, snapshot);
        liquidity.check_invariants().unwrap();
    }

    #[test]
    fn default_write_off_leaves_node_inactive() {
        let mut liquidity = liquidity();
        let tick = abs(10);
        liquidity.deposit(tick, 4 * ONE, 0).unwrap();
        liquidity.use_liquidity(tick, 4 * ONE, 5 * ONE, DAY, 0).unwrap();
        let queued = liquidity.redeem(tick, 4 * ONE - LOCKED_SHARES, 0).unwrap();

        // loan defaults with nothing recovered
        liquidity.restore(tick, 4 * ONE, 5 * ONE, 0, DAY, DAY, DAY).unwrap();

        let node = liquidity.node(tick);
        assert_eq!(node.value, 0);
        assert_eq!(node.available, 0);
        assert_eq!(node.shares, 0);
        assert_eq!(node.redemptions.pending, 0);
        assert!(!node.is_active());
        assert!(liquidity.active_ticks().is_empty());

        let claim =
            liquidity.redemption_available(tick, 4 * ONE - LOCKED_SHARES, queued.index, queued.target);
        assert_eq!(claim.shares, 4 * ONE - LOCKED_SHARES);
        assert_eq!(claim.amount, 0);

        // the reset node can be instantiated again
        assert_eq!(liquidity.deposit(tick, ONE, DAY), Ok(ONE - LOCKED_SHARES));
        assert!(liquidity.is_active(tick));
    }

    #[test]
    fn impaired_node_is_collected_and_refuses_deposits() {
        let mut liquidity = liquidity();
        let tick = abs(10);
        liquidity.deposit(tick, 10 * ONE, 0).unwrap();
        liquidity.use_liquidity(tick, 10 * ONE, 10 * ONE, DAY, 0).unwrap();
        liquidity.restore(tick, 10 * ONE, 10 * ONE, ONE / 10, DAY, DAY, DAY).unwrap();

        assert!(!liquidity.is_active(tick));
        assert_eq!(liquidity.node(tick).value, ONE / 10);
        assert_matches!(
            liquidity.deposit(tick, ONE, DAY),
            Err(LedgerError::InactiveLiquidity)
        );
        liquidity.check_invariants().unwrap();
    }

    #[test]
    fn empty_node_is_collected_after_full_redemption() {
        let mut liquidity = liquidity();
        let tick = abs(10);
        liquidity.deposit(tick, 2 * ONE, 0).unwrap();
        liquidity.use_liquidity(tick, ONE, ONE, DAY, 0).unwrap();
        liquidity.redeem(tick, 2 * ONE - LOCKED_SHARES, 0).unwrap();
        liquidity.restore(tick, ONE, ONE, ONE, DAY, 0, 0).unwrap();

        let node = liquidity.node(tick);
        assert_eq!(node.shares, LOCKED_SHARES);
        assert!(!node.is_active());

        liquidity.deposit(tick, ONE, 1).unwrap();
        assert!(liquidity.is_active(tick));
        liquidity.check_invariants().unwrap();
    }

    #[test]
    fn source_walks_ticks_cumulatively() {
        let mut liquidity = liquidity();
        let ticks: Vec<u128> = [10, 20, 30, 40].into_iter().map(abs).collect();
        for &tick in &ticks {
            liquidity.deposit(tick, 50 * ONE, 0).unwrap();
        }

        let result = liquidity.source(15 * ONE, &ticks, 1, 0, ONE).unwrap();
        assert_eq!(result.count, 2);
        assert_eq!(
            result.sources,
            vec![
                NodeSource { tick: ticks[0], used: 10 * ONE, pending: 0 },
                NodeSource { tick: ticks[1], used: 5 * ONE, pending: 0 },
            ]
        );

        assert_matches!(
            liquidity.source(500 * ONE, &ticks, 1, 0, ONE),
            Err(LedgerError::InsufficientLiquidity)
        );
        let unordered = vec![ticks[1], ticks[0]];
        assert_matches!(
            liquidity.source(25 * ONE, &unordered, 1, 0, ONE),
            Err(LedgerError::InvalidTick)
        );
        assert_matches!(
            liquidity.source(15 * ONE, &ticks, 1, 1, ONE),
            Err(LedgerError::InvalidTick)
        );
    }

    #[test]
    fn source_skips_inactive_nodes_holding_cash() {
        let mut liquidity = liquidity();
        let impaired = abs(10);
        let healthy = abs(20);
        liquidity.deposit(impaired, 10 * ONE, 0).unwrap();
        liquidity.deposit(healthy, 50 * ONE, 0).unwrap();
        liquidity.use_liquidity(impaired, 10 * ONE, 10 * ONE, DAY, 0).unwrap();
        liquidity
            .restore(impaired, 10 * ONE, 10 * ONE, ONE / 10, DAY, DAY, DAY)
            .unwrap();
        assert!(!liquidity.is_active(impaired));
        assert_eq!(liquidity.node(impaired).available, ONE / 10);

        let result = liquidity
            .source(5 * ONE, &[impaired, healthy], 1, 0, ONE)
            .unwrap();
        assert_eq!(
            result.sources,
            vec![
                NodeSource { tick: impaired, used: 0, pending: 0 },
                NodeSource { tick: healthy, used: 5 * ONE, pending: 0 },
            ]
        );
    }

    #[test]
    fn source_is_bounded_by_node_count() {
        let mut liquidity = liquidity();
        let mut ticks = vec![];
        let mut limit = ONE;
        for _ in 0..=MAX_NUM_NODES {
            let tick = absolute_tick(limit, 0, 0);
            liquidity.deposit(tick, ONE / 1_000, 0).unwrap();
            ticks.push(tick);
            limit *= 2;
        }
        let per_node = ONE / 1_000;

        let fits = liquidity
            .source(per_node * MAX_NUM_NODES as u128, &ticks, 1, 0, ONE)
            .unwrap();
        assert_eq!(fits.count as usize, MAX_NUM_NODES);

        assert_matches!(
            liquidity.source(per_node * (MAX_NUM_NODES as u128 + 1), &ticks, 1, 0, ONE),
            Err(LedgerError::InsufficientLiquidity)
        );
    }

    #[test]
    fn nodes_in_range_follows_links() {
        let mut liquidity = liquidity();
        let ticks: Vec<u128> = [10, 20, 30].into_iter().map(abs).collect();
        for &tick in &ticks {
            liquidity.deposit(tick, ONE, 0).unwrap();
        }
        let all: Vec<u128> = liquidity
            .nodes_in_range(HEAD, TAIL)
            .into_iter()
            .map(|info| info.tick)
            .collect();
        assert_eq!(all, ticks);

        let middle = liquidity.nodes_in_range(ticks[1], ticks[1]);
        assert_eq!(middle.len(), 1);
        assert_eq!(middle[0].tick, ticks[1]);

        assert!(liquidity.nodes_in_range(abs(1000), TAIL).is_empty());
    }

    #[test]
    fn deposit_price_discounts_unearned_interest() {
        let mut liquidity = liquidity();
        let tick = abs(10);
        liquidity.deposit(tick, 10 * ONE, 0).unwrap();
        liquidity.use_liquidity(tick, 10 * ONE, 11 * ONE, 100, 0).unwrap();

        assert_eq!(liquidity.deposit_share_price(tick, 0), ONE);
        assert_eq!(liquidity.deposit_share_price(tick, 50), ONE + ONE / 20);
        assert_eq!(liquidity.deposit_share_price(tick, 500), ONE + ONE / 10);
        assert_eq!(liquidity.redemption_share_price(tick), ONE);
    }
}
