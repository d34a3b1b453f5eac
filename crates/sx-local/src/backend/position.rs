//! Individual positions: every opening order creates its own position,
//! reduced or closed only by orders naming it. A close never reverses.

use sx_core::types::{Order, ReturnCode};

use super::{Backend, Exec, LotPolicy, execute_lots};
use crate::state::LocalState;

pub(crate) struct PositionBackend;

const POLICY: LotPolicy = LotPolicy { own_ref_first: false, merge_lots: true, allow_reverse: false, hedging: true };

impl Backend for PositionBackend {
    fn name(&self) -> &'static str {
        "position"
    }

    fn execute(&self, state: &mut LocalState, order: &mut Order, ex: &mut Exec<'_>) -> ReturnCode {
        match order.position_id.clone() {
            Some(pid) => {
                if !state.positions.contains_key(&pid) {
                    return ReturnCode::InvalidArgs;
                }
                execute_lots(state, order, ex, Some(&pid), POLICY)
            }
            None => execute_lots(state, order, ex, None, POLICY),
        }
    }
}
