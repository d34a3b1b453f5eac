//! Spot execution: buys spend the quote asset, sells spend the base asset.
//! No position is involved; the account only sees asset updates.

use sx_core::types::{Direction, Order, ReturnCode};
use sx_trade::Signal;
use tracing::debug;

use super::{Backend, Exec, QTY_EPSILON};
use crate::state::LocalState;

pub(crate) struct AssetBackend;

impl Backend for AssetBackend {
    fn name(&self) -> &'static str {
        "asset"
    }

    fn execute(&self, state: &mut LocalState, order: &mut Order, ex: &mut Exec<'_>) -> ReturnCode {
        let market = ex.market;
        let quantity = order.quantity;
        if quantity <= QTY_EPSILON {
            return ReturnCode::InvalidArgs;
        }
        let notional = quantity * ex.price;
        let fee = market.commission(notional, ex.maker);

        match order.direction {
            Direction::Long => {
                let cost = notional + fee;
                if state.free_asset(&market.quote) + QTY_EPSILON < cost {
                    debug!("[asset] {} buy needs {cost:.8} {}", order.order_id, market.quote);
                    return ReturnCode::InsufficientFunds;
                }
                state.asset_mut(&market.quote).free -= cost;
                let base = state.asset_mut(&market.base);
                let held = base.total();
                base.avg_price = (base.avg_price * held + ex.price * quantity) / (held + quantity);
                base.free += quantity;
            }
            Direction::Short => {
                if state.free_asset(&market.base) + QTY_EPSILON < quantity {
                    debug!("[asset] {} sell needs {quantity} {}", order.order_id, market.base);
                    return ReturnCode::InsufficientFunds;
                }
                let base = state.asset_mut(&market.base);
                base.free = (base.free - quantity).max(0.0);
                if base.total() <= QTY_EPSILON {
                    base.avg_price = 0.0;
                }
                state.asset_mut(&market.quote).free += notional - fee;
            }
        }

        ex.fill(order, quantity);
        ex.signals.push(Signal::Asset(state.asset_signal(&market.base)));
        ex.signals.push(Signal::Asset(state.asset_signal(&market.quote)));
        ReturnCode::Accepted
    }
}
