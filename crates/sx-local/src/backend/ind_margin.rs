//! Indivisible margin: one net position per market. An opposite fill first
//! reduces the lots of its own reference, then the others, and any leftover
//! reverses the position. Same-reference fills merge into one lot.

use sx_core::types::{Order, ReturnCode};

use super::{Backend, Exec, LotPolicy, execute_lots};
use crate::state::LocalState;

pub(crate) struct IndMarginBackend;

const POLICY: LotPolicy = LotPolicy { own_ref_first: true, merge_lots: true, allow_reverse: true, hedging: false };

impl Backend for IndMarginBackend {
    fn name(&self) -> &'static str {
        "ind-margin"
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

    fn position_events(ex: &Exec<'_>) -> Vec<(String, PositionEvent, f64)> {
        ex.signals
            .iter()
            .filter_map(|s| match s {
                Signal::Position(p) => Some((p.ref_order_id.clone().unwrap_or_default(), p.event, p.quantity.unwrap_or(0.0))),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn opposite_fill_reverses() {
        let (market, proxy, mut state) = harness(TradeCaps::MARGIN | TradeCaps::IND_MARGIN);
        let mut long = market_order(&proxy, "t1", Direction::Long, 1.0);
        let mut ex = Exec::new(&market, &proxy, 100.0, false, 1.0);
        assert_eq!(IndMarginBackend.execute(&mut state, &mut long, &mut ex), ReturnCode::Accepted);
        assert_eq!(long.position_id.as_deref(), Some("BTCUSDT"));
        assert_eq!(state.account.used_margin, 100.0);

        let mut short = market_order(&proxy, "t2", Direction::Short, 3.0);
        let mut ex = Exec::new(&market, &proxy, 110.0, false, 2.0);
        assert_eq!(IndMarginBackend.execute(&mut state, &mut short, &mut ex), ReturnCode::Accepted);
        assert_eq!(
            position_events(&ex),
            vec![("t1".into(), PositionEvent::Deleted, 0.0), ("t2".into(), PositionEvent::Opened, 2.0)]
        );
        let vp = &state.positions["BTCUSDT"];
        assert_eq!(vp.position.direction, Direction::Short);
        assert_eq!(vp.position.quantity, 2.0);
        assert_eq!(state.account.balance, 100_010.0);
        assert_eq!(state.account.used_margin, 220.0);
    }

    #[test]
    fn own_lots_reduced_first() {
        let (market, proxy, mut state) = harness(TradeCaps::IND_MARGIN);
        for (r, q) in [("t1", 1.0), ("t2", 1.0)] {
            let mut o = market_order(&proxy, r, Direction::Long, q);
            let mut ex = Exec::new(&market, &proxy, 100.0, false, 1.0);
            IndMarginBackend.execute(&mut state, &mut o, &mut ex);
        }
        let mut exit = market_order(&proxy, "t2", Direction::Short, 1.0);
        exit.reduce_only = true;
        let mut ex = Exec::new(&market, &proxy, 100.0, false, 2.0);
        assert_eq!(IndMarginBackend.execute(&mut state, &mut exit, &mut ex), ReturnCode::Accepted);
        assert_eq!(position_events(&ex), vec![("t2".into(), PositionEvent::Deleted, 0.0)]);
        assert_eq!(state.positions["BTCUSDT"].ref_quantity("t1"), 1.0);
    }

    #[test]
    fn reduce_only_without_position_rejected() {
        let (market, proxy, mut state) = harness(TradeCaps::IND_MARGIN);
        let mut exit = market_order(&proxy, "t1", Direction::Short, 1.0);
        exit.reduce_only = true;
        let mut ex = Exec::new(&market, &proxy, 100.0, false, 1.0);
        assert_eq!(IndMarginBackend.execute(&mut state, &mut exit, &mut ex), ReturnCode::Rejected);
        assert!(state.positions.is_empty());
    }

    #[test]
    fn margin_shortfall_refused() {
        let (market, proxy, mut state) = harness(TradeCaps::IND_MARGIN);
        let mut big = market_order(&proxy, "t1", Direction::Long, 2000.0);
        let mut ex = Exec::new(&market, &proxy, 100.0, false, 1.0);
        assert_eq!(IndMarginBackend.execute(&mut state, &mut big, &mut ex), ReturnCode::InsufficientMargin);
        assert!(ex.signals.is_empty());
        assert!(state.positions.is_empty());
    }
}
