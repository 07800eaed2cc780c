//! Commission, provider earnings, VAT and cancellation refund math.
//!
//! Everything here is pure: no clocks, no I/O. Callers pass the time left
//! before the appointment and the amounts actually captured.

use chrono::Duration;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::domain::value_objects::{enums::booking_statuses::BookingStatus, money::round_money};

const FULL_REFUND_NOTICE_HOURS: i64 = 24;
const HALF_REFUND_NOTICE_HOURS: i64 = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalculationError {
    #[error("commission rate {0} must be between 0 and 1")]
    InvalidRate(Decimal),
    #[error("refund percentage does not apply to bookings in status {0}")]
    NotCancellable(BookingStatus),
}

/// Platform cut of the service price, rounded half-up to cents.
pub fn commission(service_price: Decimal, rate: Decimal) -> Decimal {
    round_money(service_price * rate)
}

/// Whatever the platform does not keep goes to the provider, so the two lines
/// always add back up to the service price.
pub fn provider_earnings(service_price: Decimal, rate: Decimal) -> Decimal {
    service_price - commission(service_price, rate)
}

pub fn vat_amount(service_price: Decimal, vat_percentage: Decimal) -> Decimal {
    round_money(service_price * vat_percentage / Decimal::ONE_HUNDRED)
}

/// Refund tier for a cancellation.
///
/// Pending bookings are always refunded in full. Confirmed bookings are tiered
/// by notice: at least 24h gives 100%, at least 12h gives 50%, anything shorter
/// (including an appointment time already in the past) forfeits the refund.
pub fn refund_percentage(
    status: BookingStatus,
    time_until_scheduled: Duration,
) -> Result<u8, CalculationError> {
    match status {
        BookingStatus::Pending => Ok(100),
        BookingStatus::Confirmed => {
            if time_until_scheduled >= Duration::hours(FULL_REFUND_NOTICE_HOURS) {
                Ok(100)
            } else if time_until_scheduled >= Duration::hours(HALF_REFUND_NOTICE_HOURS) {
                Ok(50)
            } else {
                Ok(0)
            }
        }
        other => Err(CalculationError::NotCancellable(other)),
    }
}

/// Applies `percentage` to the captured amount and caps the result at what is
/// still refundable, so cumulative refunds never exceed the payment.
pub fn refund_amount(paid: Decimal, already_refunded: Decimal, percentage: u8) -> Decimal {
    let remaining = (paid - already_refunded).max(Decimal::ZERO);
    let requested = round_money(paid * Decimal::from(percentage) / Decimal::ONE_HUNDRED);
    requested.min(remaining)
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct EarningsBreakdown {
    pub service_price: Decimal,
    pub commission_rate: Decimal,
    pub platform_commission: Decimal,
    pub provider_earnings: Decimal,
}

/// Carries the configured commission rate so no handler hardcodes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementCalculator {
    commission_rate: Decimal,
}

impl SettlementCalculator {
    pub fn new(commission_rate: Decimal) -> Result<Self, CalculationError> {
        if commission_rate < Decimal::ZERO || commission_rate > Decimal::ONE {
            return Err(CalculationError::InvalidRate(commission_rate));
        }

        Ok(Self { commission_rate })
    }

    pub fn commission_rate(&self) -> Decimal {
        self.commission_rate
    }

    pub fn commission(&self, service_price: Decimal) -> Decimal {
        commission(service_price, self.commission_rate)
    }

    pub fn provider_earnings(&self, service_price: Decimal) -> Decimal {
        provider_earnings(service_price, self.commission_rate)
    }

    pub fn breakdown(&self, service_price: Decimal) -> EarningsBreakdown {
        EarningsBreakdown {
            service_price,
            commission_rate: self.commission_rate,
            platform_commission: self.commission(service_price),
            provider_earnings: self.provider_earnings(service_price),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn hours_and_millis(hours: i64, millis: i64) -> Duration {
        Duration::hours(hours) + Duration::milliseconds(millis)
    }

    #[test]
    fn commission_and_earnings_add_up_to_the_price() {
        let prices = [
            dec!(0),
            dec!(0.01),
            dec!(0.05),
            dec!(99.99),
            dec!(100),
            dec!(1234.57),
            dec!(999999.99),
        ];
        let rates = [dec!(0), dec!(0.15), dec!(0.18), dec!(0.333), dec!(1)];

        for price in prices {
            for rate in rates {
                assert_eq!(
                    commission(price, rate) + provider_earnings(price, rate),
                    price,
                    "price {price} rate {rate}"
                );
            }
        }
    }

    #[test]
    fn computes_eighteen_percent_commission() {
        let calculator = SettlementCalculator::new(dec!(0.18)).unwrap();

        let breakdown = calculator.breakdown(dec!(250.00));

        assert_eq!(breakdown.platform_commission, dec!(45.00));
        assert_eq!(breakdown.provider_earnings, dec!(205.00));
    }

    #[test]
    fn rejects_out_of_range_rates() {
        assert_eq!(
            SettlementCalculator::new(dec!(1.2)),
            Err(CalculationError::InvalidRate(dec!(1.2)))
        );
        assert!(SettlementCalculator::new(dec!(-0.01)).is_err());
    }

    #[test]
    fn pending_bookings_are_refunded_in_full_regardless_of_notice() {
        for hours in [-48, -1, 0, 5, 12, 24, 72] {
            assert_eq!(
                refund_percentage(BookingStatus::Pending, Duration::hours(hours)),
                Ok(100)
            );
        }
    }

    #[test]
    fn confirmed_bookings_follow_notice_tiers() {
        let cases = [
            (Duration::hours(30), 100),
            (Duration::hours(24), 100),
            (hours_and_millis(23, 3_596_400), 50),
            (Duration::hours(12), 50),
            (hours_and_millis(11, 3_596_400), 0),
            (Duration::hours(10), 0),
            (Duration::hours(-3), 0),
        ];

        for (notice, expected) in cases {
            assert_eq!(
                refund_percentage(BookingStatus::Confirmed, notice),
                Ok(expected),
                "notice {notice}"
            );
        }
    }

    #[test]
    fn refund_percentage_does_not_apply_once_work_started() {
        for status in [
            BookingStatus::InProgress,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
        ] {
            assert_eq!(
                refund_percentage(status, Duration::hours(48)),
                Err(CalculationError::NotCancellable(status))
            );
        }
    }

    #[test]
    fn refund_amount_never_exceeds_what_is_left() {
        assert_eq!(refund_amount(dec!(100), dec!(0), 100), dec!(100));
        assert_eq!(refund_amount(dec!(200), dec!(0), 50), dec!(100));
        assert_eq!(refund_amount(dec!(200), dec!(0), 0), dec!(0));
        assert_eq!(refund_amount(dec!(100), dec!(70), 50), dec!(30));
        assert_eq!(refund_amount(dec!(100), dec!(100), 100), dec!(0));
        assert_eq!(refund_amount(dec!(33.33), dec!(0), 50), dec!(16.67));
    }

    #[test]
    fn vat_is_rounded_to_cents() {
        assert_eq!(vat_amount(dec!(100), dec!(15)), dec!(15.00));
        assert_eq!(vat_amount(dec!(33.33), dec!(15)), dec!(5.00));
        assert_eq!(vat_amount(dec!(10), dec!(0)), dec!(0));
    }
}
