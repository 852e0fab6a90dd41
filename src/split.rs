//! Donation split.
//!
//! Every confirmed donation is divided into three ledger buckets. Charity and
//! family equity take fixed percentages (rounded down); VIP income takes
//! whatever is left, so the buckets always add back up to the donation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::{Amount, Bps};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRatios {
    pub charity: Bps,
    pub family_equity: Bps,
}

impl SplitRatios {
    /// 0.5 % charity, 60 % family equity, 39.5 % VIP income.
    pub const DEFAULT: SplitRatios = SplitRatios {
        charity: Bps(50),
        family_equity: Bps(6_000),
    };

    pub fn validate(&self) -> Result<(), String> {
        let sum = self.charity.0 as u64 + self.family_equity.0 as u64;
        if sum > Bps::FULL.0 as u64 {
            return Err(format!("charity + family equity = {sum} bps exceeds 10000"));
        }
        Ok(())
    }

    pub fn vip_income(&self) -> Bps {
        Bps(Bps::FULL
            .0
            .saturating_sub(self.charity.0)
            .saturating_sub(self.family_equity.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Charity,
    VipIncome,
    FamilyEquity,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::Charity, Bucket::VipIncome, Bucket::FamilyEquity];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Charity => "charity",
            Bucket::VipIncome => "vip_income",
            Bucket::FamilyEquity => "family_equity",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationSplit {
    pub charity: Amount,
    pub vip_income: Amount,
    pub family_equity: Amount,
}

impl DonationSplit {
    pub fn get(&self, bucket: Bucket) -> Amount {
        match bucket {
            Bucket::Charity => self.charity,
            Bucket::VipIncome => self.vip_income,
            Bucket::FamilyEquity => self.family_equity,
        }
    }

    pub fn total(&self) -> Amount {
        self.charity + self.vip_income + self.family_equity
    }
}

/// Split a non-negative donation amount. Ratios must already be validated.
pub fn split(amount: Amount, ratios: &SplitRatios) -> DonationSplit {
    let charity = amount.percent(ratios.charity);
    let family_equity = amount.percent(ratios.family_equity);
    DonationSplit {
        charity,
        vip_income: amount - charity - family_equity,
        family_equity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousand_rupee_donation() {
        let s = split(Amount::from_major(1000), &SplitRatios::DEFAULT);
        assert_eq!(s.charity, Amount::from_major(5));
        assert_eq!(s.family_equity, Amount::from_major(600));
        assert_eq!(s.vip_income, Amount::from_major(395));
    }

    #[test]
    fn buckets_always_sum_to_amount() {
        let ratios = SplitRatios {
            charity: Bps(333),
            family_equity: Bps(6_667),
        };
        for cents in [1, 7, 99, 101, 12_345, 999_999] {
            let amount = Amount::from_cents(cents);
            let s = split(amount, &ratios);
            assert_eq!(s.total(), amount, "cents={cents}");
            assert!(!s.vip_income.is_negative());
        }
    }

    #[test]
    fn one_cent_goes_to_vip_income() {
        let s = split(Amount::from_cents(1), &SplitRatios::DEFAULT);
        assert_eq!(s.charity, Amount::ZERO);
        assert_eq!(s.family_equity, Amount::ZERO);
        assert_eq!(s.vip_income, Amount::from_cents(1));
    }

    #[test]
    fn ratios_over_full_are_invalid() {
        let bad = SplitRatios {
            charity: Bps(4_001),
            family_equity: Bps(6_000),
        };
        assert!(bad.validate().is_err());
        assert!(SplitRatios::DEFAULT.validate().is_ok());
        assert_eq!(SplitRatios::DEFAULT.vip_income(), Bps(3_950));
    }
}
