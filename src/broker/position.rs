// =============================================================================
// Position — per-symbol signed quantity and weighted-average cost basis
// =============================================================================

use serde::{Deserialize, Serialize};

/// A broker-owned position in one symbol. `qty` is signed: positive is long,
/// negative is short. The reference broker only ever opens longs and closes
/// them in full, so `qty` here is always `>= 0`, but the type does not forbid
/// a negative value should a future broker implementation support shorting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub qty: f64,
    pub avg_price: f64,
}

impl Position {
    pub fn flat() -> Self {
        Self {
            qty: 0.0,
            avg_price: 0.0,
        }
    }

    pub fn is_flat(self) -> bool {
        self.qty == 0.0
    }

    /// Apply a same-direction (sign-preserving) fill using weighted-average
    /// cost basis: `new_avg = (old_qty*old_avg + fill_qty*fill_price) / (old_qty + fill_qty)`.
    pub fn apply_buy_fill(self, fill_qty: f64, fill_price: f64) -> Self {
        let new_qty = self.qty + fill_qty;
        let new_avg = if new_qty == 0.0 {
            0.0
        } else {
            (self.qty * self.avg_price + fill_qty * fill_price) / new_qty
        };
        Self {
            qty: new_qty,
            avg_price: new_avg,
        }
    }

    /// Apply a full-liquidation sell fill: qty resets to zero, avg_price
    /// resets with it (there is no remaining basis to track).
    pub fn apply_full_sell_fill(self) -> Self {
        Self {
            qty: 0.0,
            avg_price: 0.0,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::flat()
    }
}
