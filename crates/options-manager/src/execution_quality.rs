//! Fill quality of smart-fill orders: how often they fill, how many
//! reprices it takes, and where the fill lands against the quoted mid.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use wheel_ib::OrderSide;

use crate::executor::FillReport;

#[derive(Debug, Clone, PartialEq)]
struct FillSample {
    side: OrderSide,
    /// Per-share improvement over the mid, positive when better than mid.
    improvement: Decimal,
    attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionQualitySummary {
    pub orders: usize,
    pub filled: usize,
    pub unfilled: usize,
    pub fill_rate: f64,
    pub avg_attempts: f64,
    pub better_than_mid: usize,
    pub at_mid: usize,
    pub worse_than_mid: usize,
    /// Mean per-share improvement over the mid across fills.
    pub avg_improvement: Decimal,
    pub buys: usize,
    pub sells: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionQuality {
    fills: Vec<FillSample>,
    unfilled: usize,
}

impl ExecutionQuality {
    pub fn record_fill(&mut self, fill: &FillReport) {
        let improvement = match fill.side {
            OrderSide::Sell => fill.price - fill.mid,
            OrderSide::Buy => fill.mid - fill.price,
        };
        self.fills.push(FillSample {
            side: fill.side,
            improvement,
            attempts: fill.attempts,
        });
    }

    /// An order abandoned after its last attempt.
    pub fn record_unfilled(&mut self) {
        self.unfilled += 1;
    }

    pub fn summary(&self) -> ExecutionQualitySummary {
        let filled = self.fills.len();
        let orders = filled + self.unfilled;
        let mut out = ExecutionQualitySummary {
            orders,
            filled,
            unfilled: self.unfilled,
            ..ExecutionQualitySummary::default()
        };
        if orders > 0 {
            out.fill_rate = filled as f64 / orders as f64;
        }
        if filled == 0 {
            return out;
        }

        let mut attempts = 0u64;
        let mut improvement = Decimal::ZERO;
        for f in &self.fills {
            attempts += u64::from(f.attempts);
            improvement += f.improvement;
            match f.improvement.cmp(&Decimal::ZERO) {
                std::cmp::Ordering::Greater => out.better_than_mid += 1,
                std::cmp::Ordering::Equal => out.at_mid += 1,
                std::cmp::Ordering::Less => out.worse_than_mid += 1,
            }
            match f.side {
                OrderSide::Buy => out.buys += 1,
                OrderSide::Sell => out.sells += 1,
            }
        }
        out.avg_attempts = attempts as f64 / filled as f64;
        out.avg_improvement = (improvement / Decimal::from(filled)).round_dp(4);
        out
    }
}
