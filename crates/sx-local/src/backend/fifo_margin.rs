//! FIFO margin: one net position per market, reduced oldest lot first
//! whoever opened it. Each fill adds its own lot and an opposite excess
//! reverses the position.

use sx_core::types::{Order, ReturnCode};

use super::{Backend, Exec, LotPolicy, execute_lots};
use crate::state::LocalState;

pub(crate) struct FifoMarginBackend;

const POLICY: LotPolicy = LotPolicy { own_ref_first: false, merge_lots: false, allow_reverse: true, hedging: false };

impl Backend for FifoMarginBackend {
    fn name(&self) -> &'static str {
        "fifo-margin"
    }

    fn execute(&self, state: &mut LocalState, order: &mut Order, ex: &mut Exec<'_>) -> ReturnCode {
        let key = ex.market.market_id.clone();
        execute_lots(state, order, ex, Some(&key), POLICY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testkit::{harness, market_order};
    use sx_core::types::{Direction, PositionEvent, TradeCaps};
    use sx_trade::Signal;

    #[test]
    fn oldest_lot_closed_first() {
        let (market, proxy, mut state) = harness(TradeCaps::MARGIN | TradeCaps::FIFO);
        for (r, price) in [("t1", 100.0), ("t2", 120.0)] {
            let mut o = market_order(&proxy, r, Direction::Long, 1.0);
            let mut ex = Exec::new(&market, &proxy, price, false, 1.0);
            assert_eq!(FifoMarginBackend.execute(&mut state, &mut o, &mut ex), ReturnCode::Accepted);
        }
        assert_eq!(state.positions["BTCUSDT"].position.avg_price, 110.0);

        // t2 asks to close, the t1 lot goes
        let mut exit = market_order(&proxy, "t2", Direction::Short, 1.0);
        exit.reduce_only = true;
        let mut ex = Exec::new(&market, &proxy, 130.0, false, 2.0);
        assert_eq!(FifoMarginBackend.execute(&mut state, &mut exit, &mut ex), ReturnCode::Accepted);
        let deleted: Vec<_> = ex
            .signals
            .iter()
            .filter_map(|s| match s {
                Signal::Position(p) if p.event == PositionEvent::Deleted => p.ref_order_id.clone(),
                _ => None,
            })
            .collect();
        assert_eq!(deleted, vec!["t1".to_owned()]);
        assert_eq!(state.account.balance, 100_030.0);
        let vp = &state.positions["BTCUSDT"];
        assert_eq!(vp.ref_quantity("t2"), 1.0);
        assert_eq!(vp.position.avg_price, 120.0);
    }

    #[test]
    fn same_ref_keeps_separate_lots() {
        let (market, proxy, mut state) = harness(TradeCaps::FIFO);
        for price in [100.0, 104.0] {
            let mut o = market_order(&proxy, "t1", Direction::Short, 1.0);
            let mut ex = Exec::new(&market, &proxy, price, false, 1.0);
            FifoMarginBackend.execute(&mut state, &mut o, &mut ex);
        }
        let vp = &state.positions["BTCUSDT"];
        assert_eq!(vp.lots.len(), 2);
        assert_eq!(vp.ref_price("t1"), 102.0);
    }

    #[test]
    fn full_close_frees_position() {
        let (market, proxy, mut state) = harness(TradeCaps::MARGIN);
        let mut o = market_order(&proxy, "t1", Direction::Long, 2.0);
        let mut ex = Exec::new(&market, &proxy, 50.0, false, 1.0);
        FifoMarginBackend.execute(&mut state, &mut o, &mut ex);

        let mut exit = market_order(&proxy, "t1", Direction::Short, 2.0);
        let mut ex = Exec::new(&market, &proxy, 45.0, false, 2.0);
        assert_eq!(FifoMarginBackend.execute(&mut state, &mut exit, &mut ex), ReturnCode::Accepted);
        assert!(state.positions.is_empty());
        assert_eq!(ex.freed.len(), 1);
        assert_eq!(state.account.balance, 99_990.0);
        assert_eq!(state.account.used_margin, 0.0);
    }
}
