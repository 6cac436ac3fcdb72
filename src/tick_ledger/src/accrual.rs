/// Linear interest recognition for one node.
///
/// `accrued` and `rate` are only meaningful as of `timestamp`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Accrual {
    pub accrued: u128,
    /// Amount recognized per second across all open loans drawing on the node.
    pub rate: u128,
    pub timestamp: u64,
}

impl Accrual {
    pub fn accrue(&mut self, now: u64) {
        self.accrued = self.accrued_at(now);
        self.timestamp = self.timestamp.max(now);
    }

    /// Accrued amount as of `now`, without touching the tracker.
    pub fn accrued_at(&self, now: u64) -> u128 {
        let elapsed = now.saturating_sub(self.timestamp) as u128;
        self.accrued.saturating_add(self.rate.saturating_mul(elapsed))
    }

    /// Starts recognizing `interest` over `duration` seconds.
    pub fn add_loan(&mut self, interest: u128, duration: u64) {
        self.rate = self
            .rate_with_loan(interest, duration)
            .unwrap_or(u128::MAX);
    }

    /// The rate after adding a loan, or `None` if it does not fit.
    pub fn rate_with_loan(&self, interest: u128, duration: u64) -> Option<u128> {
        self.rate.checked_add(loan_rate(interest, duration))
    }

    /// Stops recognizing a loan and takes back what it contributed over `elapsed`.
    pub fn remove_loan(&mut self, interest: u128, duration: u64, elapsed: u64) {
        let rate = loan_rate(interest, duration);
        self.rate = self.rate.saturating_sub(rate);
        self.accrued = self
            .accrued
            .saturating_sub(rate.saturating_mul(elapsed as u128));
    }
}

fn loan_rate(interest: u128, duration: u64) -> u128 {
    interest / duration as u128
}
