//! View numbers: ordinals that disambiguate multiple rows at one address.
//!
//! A view resets to 0 whenever the program counter strictly advances over
//! the previous row, and increments otherwise. Whether the counter advanced
//! is often unknowable while entries are generated (the labels may sit in
//! different fragments), so views are expressed symbolically over labels and
//! earlier views, and collapse to constants as soon as symbol values allow.

use crate::asm::{Assembly, Expr, SymbolId};
use crate::writer::{LineEntry, ViewState};

/// The reset indicator `!(E.label > P.label)`: zero when the counter
/// provably advanced, one when it provably did not, symbolic otherwise.
enum Reset {
    Const(i64),
    /// Logical not of this `>` expression symbol.
    Not(SymbolId),
}

fn reset_indicator(asm: &mut Assembly, entries: &[LineEntry], index: usize, prev: usize) -> Reset {
    let (e_label, p_label) = (entries[index].label, entries[prev].label);
    match asm.resolve(&Expr::Gt(e_label, p_label)) {
        Some(gt) => Reset::Const((gt == 0) as i64),
        None => Reset::Not(asm.expr_symbol(Expr::Gt(e_label, p_label))),
    }
}

/// Computes the view for `entries[index]` from its predecessor.
///
/// When defining the predecessor's view is required and that view in turn
/// depends on earlier entries, the pending suffix is defined walking
/// backward by index and then resolved walking forward, which keeps long
/// chains linear. `walk` is false on those inner calls.
pub(crate) fn set_or_check_view(
    asm: &mut Assembly,
    state: &mut ViewState,
    entries: &mut [LineEntry],
    index: usize,
    walk: bool,
) {
    let prev = index.checked_sub(1);
    let forced = state.force_reset.is_some() && entries[index].loc.view == state.force_reset;

    let viewx = match prev {
        None => Reset::Const(0),
        Some(_) if forced => Reset::Const(0),
        Some(p) => reset_indicator(asm, entries, index, p),
    };

    // A forced reset claims the counter advanced. Record the indicator as a
    // deferred check; it must come out zero once all labels have values.
    if forced {
        if let Some(p) = prev {
            let deferred = match reset_indicator(asm, entries, index, p) {
                Reset::Const(0) => None,
                Reset::Const(value) => Some(asm.expr_symbol(Expr::Constant(value))),
                Reset::Not(gt) => Some(asm.expr_symbol(Expr::LogicalNot(gt))),
            };
            if let Some(deferred) = deferred {
                state.assert_failed = Some(match state.assert_failed {
                    Some(acc) => asm.expr_symbol(Expr::Add(acc, deferred)),
                    None => deferred,
                });
            }
        }
    }

    let value = match viewx {
        Reset::Const(0) => Expr::Constant(0),
        other => {
            let p = prev.expect("view increment without a predecessor");
            let pv = match entries[p].loc.view {
                Some(pv) => pv,
                None => {
                    let pv = asm.undefined_symbol();
                    entries[p].loc.view = Some(pv);
                    pv
                }
            };
            let incv = Expr::Symbol {
                symbol: pv,
                addend: 1,
            };
            match other {
                Reset::Const(value) => {
                    debug_assert_eq!(value, 1);
                    incv
                }
                Reset::Not(gt) => {
                    let indicator = asm.expr_symbol(Expr::LogicalNot(gt));
                    let incremented = asm.expr_symbol(incv);
                    Expr::Multiply(indicator, incremented)
                }
            }
        }
    };

    let view = entries[index].loc.view.expect("entry has no view symbol");
    if !asm.symbol_is_defined(view) {
        asm.define_absolute(view, value);
    }

    if !walk {
        return;
    }
    let Some(p) = prev else { return };
    let is_pending = |asm: &Assembly, entry: &LineEntry| {
        entry
            .loc
            .view
            .is_some_and(|view| !asm.symbol_is_defined(view))
    };
    if !is_pending(asm, &entries[p]) {
        return;
    }

    // Define the whole pending suffix, newest first; each step may extend
    // the suffix by one when it has to materialize its predecessor's view.
    let mut oldest = p;
    loop {
        set_or_check_view(asm, state, entries, oldest, false);
        if oldest > 0 && is_pending(asm, &entries[oldest - 1]) {
            oldest -= 1;
        } else {
            break;
        }
    }

    // Simplify forward from the oldest view just defined, then attempt the
    // new entry's view now that everything it depends on is in place.
    for entry in entries[oldest..=p].iter() {
        let view = entry.loc.view.expect("pending entry lost its view");
        debug_assert!(asm.symbol_is_defined(view));
        asm.resolve_symbol(view);
    }
    asm.resolve_symbol(view);
}
