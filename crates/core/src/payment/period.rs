//! Billing period arithmetic
//!
//! Months are one-indexed (1 = January) everywhere in the ledger.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A calendar month that invoices and payments are attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub month: u32,
    pub year: i32,
}

impl BillingPeriod {
    /// Create a validated period
    pub fn new(month: u32, year: i32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(Error::InvalidInput(format!(
                "Month must be between 1 and 12, got {}",
                month
            )));
        }
        if !(1970..=9999).contains(&year) {
            return Err(Error::InvalidInput(format!("Unsupported year {}", year)));
        }
        Ok(Self { month, year })
    }

    /// The period a calendar date falls into
    pub fn containing(date: NaiveDate) -> Self {
        Self {
            month: date.month(),
            year: date.year(),
        }
    }

    /// Number of days in this month
    pub fn days_in_month(&self) -> u32 {
        let (next_year, next_month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };

        NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .and_then(|first| first.pred_opt())
            .map(|last| last.day())
            .unwrap_or(28)
    }

    /// Clamp a configured day-of-month into this month.
    ///
    /// A tenant configured for the 31st fires on the 30th in a 30-day month.
    pub fn clamp_day(&self, day: u32) -> u32 {
        day.clamp(1, self.days_in_month())
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}
