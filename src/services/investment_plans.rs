//! Static investment plan table and the return formula per plan family.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFamily {
    /// Rate is earned per day.
    FlatDaily,
    /// Rate is earned per 7 days.
    Weekly,
    /// Rate is earned per 30 days.
    Monthly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvestmentPlan {
    pub id: &'static str,
    pub name: &'static str,
    pub family: PlanFamily,
    /// Percent per period, e.g. 15 for 15%.
    pub rate: Decimal,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub duration_days: i64,
}

impl InvestmentPlan {
    pub fn rate_label(&self) -> String {
        let period = match self.family {
            PlanFamily::FlatDaily => "daily",
            PlanFamily::Weekly => "weekly",
            PlanFamily::Monthly => "monthly",
        };
        format!("{}% {}", self.rate.normalize(), period)
    }

    pub fn total_return_percent(&self) -> Decimal {
        let days = Decimal::from(self.duration_days);
        match self.family {
            PlanFamily::FlatDaily => self.rate * days,
            PlanFamily::Weekly => self.rate * (days / Decimal::from(7)),
            PlanFamily::Monthly => self.rate * (days / Decimal::from(30)),
        }
    }

    /// `principal * (1 + total%/100)`, rounded to kobo.
    pub fn projected_return(&self, principal: Decimal) -> Decimal {
        let multiplier = Decimal::ONE + self.total_return_percent() / Decimal::ONE_HUNDRED;
        (principal * multiplier).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    pub fn maturity_date(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start + Duration::days(self.duration_days)
    }

    pub fn accepts(&self, amount: Decimal) -> bool {
        amount >= self.min_amount && amount <= self.max_amount
    }
}

pub fn plans() -> Vec<InvestmentPlan> {
    vec![
        InvestmentPlan {
            id: "rookie",
            name: "Rookie Plan",
            family: PlanFamily::FlatDaily,
            rate: Decimal::from(15),
            min_amount: Decimal::from(1_000),
            max_amount: Decimal::from(10_000),
            duration_days: 3,
        },
        InvestmentPlan {
            id: "standard",
            name: "Standard Plan",
            family: PlanFamily::Weekly,
            rate: Decimal::from(18),
            min_amount: Decimal::from(10_000),
            max_amount: Decimal::from(50_000),
            duration_days: 28,
        },
        InvestmentPlan {
            id: "investor",
            name: "Investor Plan",
            family: PlanFamily::Monthly,
            rate: Decimal::from(25),
            min_amount: Decimal::from(50_000),
            max_amount: Decimal::from(200_000),
            duration_days: 14,
        },
    ]
}

pub fn find_plan(plan_id: &str) -> Option<InvestmentPlan> {
    plans().into_iter().find(|p| p.id == plan_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_daily_return() {
        let plan = find_plan("rookie").unwrap();
        assert_eq!(plan.total_return_percent(), Decimal::from(45));
        assert_eq!(plan.projected_return(Decimal::from(10_000)), Decimal::from(14_500));
    }

    #[test]
    fn weekly_return() {
        let plan = find_plan("standard").unwrap();
        assert_eq!(plan.total_return_percent(), Decimal::from(72));
        assert_eq!(
            plan.projected_return(Decimal::from(10_000)),
            Decimal::new(1_720_000, 2)
        );
    }

    #[test]
    fn monthly_return_is_rounded_to_kobo() {
        let plan = find_plan("investor").unwrap();
        // 25 * 14/30 = 11.666..%
        let projected = plan.projected_return(Decimal::from(50_000));
        assert_eq!(projected, Decimal::new(5_583_333, 2));
        assert!(projected.scale() <= 2);
    }

    #[test]
    fn bounds_and_lookup() {
        let plan = find_plan("rookie").unwrap();
        assert!(plan.accepts(Decimal::from(1_000)));
        assert!(plan.accepts(Decimal::from(10_000)));
        assert!(!plan.accepts(Decimal::from(999)));
        assert!(!plan.accepts(Decimal::from(10_001)));
        assert!(find_plan("gold").is_none());
        assert_eq!(plan.rate_label(), "15% daily");
    }
}
