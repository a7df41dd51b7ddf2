//! Point rules. Every function here is pure; balances live on the session's players.

use crate::constants::{EXTRA_MOVE_COST, MOVE_COST, WIN_BONUS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BudgetExhausted {
    OfferBuy {
        points: i64,
        cost: i64,
        max_moves: i64,
    },
    OutOfOptions,
}

/// Charged for every attempted move, legal or not. Balances may go negative.
pub fn charge_move(balance: &mut i64) {
    *balance -= MOVE_COST;
}

pub fn buy_cost(num_moves: u32) -> i64 {
    EXTRA_MOVE_COST * i64::from(num_moves)
}

pub fn can_afford(balance: i64, num_moves: u32) -> bool {
    num_moves > 0 && balance >= buy_cost(num_moves)
}

/// Deducts the price when affordable. Returns whether the purchase went through.
pub fn try_buy(balance: &mut i64, num_moves: u32) -> bool {
    if !can_afford(*balance, num_moves) {
        return false;
    }
    *balance -= buy_cost(num_moves);
    true
}

pub fn award_win(balance: &mut i64) {
    *balance += WIN_BONUS;
}

pub fn max_affordable_moves(balance: i64) -> i64 {
    balance.div_euclid(EXTRA_MOVE_COST).max(0)
}

pub fn on_budget_exhausted(balance: i64) -> BudgetExhausted {
    let max_moves = max_affordable_moves(balance);
    if max_moves >= 1 {
        BudgetExhausted::OfferBuy {
            points: balance,
            cost: EXTRA_MOVE_COST,
            max_moves,
        }
    } else {
        BudgetExhausted::OutOfOptions
    }
}
