//! Reptation of effectively linear polymers.

use crate::arena::PolyArena;
use crate::context::{Context, ReptScheme, PI_POW_2};
use crate::relax::sv_mass;

/// Tags polymer `n` linear once at most two retracting ends remain.
pub fn check_linearity(arena: &mut PolyArena, n: i32) {
    let num_free = arena.free_ends_of(n).len();
    if num_free <= 2 {
        arena.poly_mut(n).linear_tag = true;
    }
}

/// Tests whether the backbone of linear polymer `n` reptates at the current
/// time. The tube diameter policy is selected by `ReptScheme`; the
/// in-between schemes latch the dilution the first time their criterion is
/// met and reuse it afterwards.
pub fn try_reptate(arena: &mut PolyArena, ctx: &Context, n: i32) -> bool {
    let params = &ctx.params;
    let state = &ctx.state;

    let n1 = arena.poly(n).first_free;
    let n2 = arena.arm(n1).free_down;
    let (mut drag_sidebranch, mut bbonelen, mut len_to_rep) = if n1 == n2 {
        let arm = arena.arm(n1);
        (arm.extra_drag, arm.arm_len_end, arm.arm_len_end - arm.z)
    } else {
        let a = arena.arm(n1);
        let b = arena.arm(n2);
        (
            a.extra_drag + b.extra_drag,
            a.arm_len_end + b.arm_len_end,
            a.arm_len_end - a.z + b.arm_len_end - b.z,
        )
    };

    // segments not owned by any retracting front still belong to the tube
    for m in arena.segments_of(n) {
        let arm = arena.arm(m);
        if !arm.relaxing {
            bbonelen += arm.arm_len;
            len_to_rep += arm.arm_len;
        }
    }
    drag_sidebranch += arena.poly(n).ghost_contrib;

    let phi_alpha = state.phi.powf(params.alpha);
    let tau_d = match params.rept_scheme {
        ReptScheme::ThinTube => {
            let drag_tot = drag_sidebranch / params.p_square + 3.0 * PI_POW_2 * bbonelen;
            drag_tot * len_to_rep * len_to_rep / PI_POW_2
        }
        ReptScheme::CurrentTube => {
            let drag_tot =
                drag_sidebranch / (params.p_square * phi_alpha) + 3.0 * PI_POW_2 * bbonelen;
            drag_tot * len_to_rep * len_to_rep * phi_alpha / PI_POW_2
        }
        ReptScheme::FixedAmount | ReptScheme::BackboneAmount => {
            if arena.poly(n).rept_set {
                let phi_rept = arena.poly(n).phi_rept;
                let phi_rept_alpha = phi_rept.powf(params.alpha);
                let drag_tot = drag_sidebranch / (params.p_square * phi_rept_alpha)
                    + 3.0 * PI_POW_2 * bbonelen;
                drag_tot * len_to_rep * len_to_rep * phi_rept_alpha / PI_POW_2
            } else {
                let drag_tot =
                    drag_sidebranch / (params.p_square * phi_alpha) + 3.0 * PI_POW_2 * bbonelen;
                let amount = if params.rept_scheme == ReptScheme::FixedAmount {
                    params.rept_amount * params.rept_amount
                } else {
                    (params.rept_amount * bbonelen).powi(2)
                };
                let latch_time = drag_tot * amount * phi_alpha / PI_POW_2;
                if state.cur_time > latch_time {
                    let poly = arena.poly_mut(n);
                    poly.rept_set = true;
                    poly.phi_rept = state.phi;
                }
                // keep waiting; the latched dilution is used from next step
                if state.cur_time > 0.001 {
                    2.0 * state.cur_time
                } else {
                    1.0
                }
            }
        }
    };

    // almost nothing left to reptate: release immediately
    let tau_d = if len_to_rep < 2.0 * params.ret_lim / state.phi {
        state.cur_time - 1.0e-6
    } else {
        tau_d
    };

    state.cur_time > tau_d
}

/// Banks the remaining mass of reptated polymer `m`: the two surviving
/// compound arms plus every segment the retraction never reached.
pub fn rept_sv_mass(arena: &mut PolyArena, m: i32) {
    let n1 = arena.poly(m).first_free;
    let n2 = arena.arm(n1).free_down;
    if !arena.arm(n1).ghost {
        sv_mass(arena, m, n1);
    }
    if n1 != n2 && !arena.arm(n2).ghost {
        sv_mass(arena, m, n2);
    }

    let mut stray = 0.0;
    for s in arena.segments_of(m) {
        let arm = arena.arm(s);
        if !arm.relaxing {
            stray += arm.vol_fraction;
        }
    }
    arena.poly_mut(m).relaxed_frac += stray;
}
