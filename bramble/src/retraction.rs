//! Arm retraction: advancing the retraction coordinate, potential and
//! Kramers time of every free end by one multiplicative time step.
//!
//! Step 0 uses the bare Rouse solution. Later steps interpolate in
//! log-time with a quadratic implicit step built from the local slopes of
//! the dilution and the effective reach. Above `u = 15` the quadratic
//! degenerates to the Kramers-only branch; this switch keeps the late-time
//! trace stable and must not be reordered.

use crate::arena::PolyArena;
use crate::context::{Context, PrefMode, GAMMA1, PI_POW_2, PI_POW_5, TINY};
use crate::relax::{calc_eff_fric, quad_solve_spl};
use std::f64::consts::PI;

/// Potential value above which only the Kramers term is kept.
const U_KRAMERS: f64 = 15.0;

/// Retracts the free (possibly compound) arm `n`. `indx == 0` selects the
/// step-0 Rouse solution.
pub fn arm_retraction(arena: &mut PolyArena, ctx: &Context, n: i32, indx: usize) {
    if indx == 0 {
        first_step(arena, ctx, n);
    } else if arena.arm(n).compound {
        compound_step(arena, ctx, n);
    } else {
        simple_step(arena, ctx, n);
    }
}

fn first_step(arena: &mut PolyArena, ctx: &Context, n: i32) {
    let params = &ctx.params;
    let state = &ctx.state;
    let phi_alpha = state.phi.powf(params.alpha);

    let z0 = (state.cur_time / GAMMA1).powf(0.25);
    let arm = arena.arm_mut(n);
    arm.z = z0;
    arm.pot = 1.5 * phi_alpha * z0 * z0 / arm.arm_len;
    arm.tau_k = arm.gamma2 * z0;
    arm.deltazeff = 0.0;

    let mut dz = z0;
    if dz > arm.arm_len_end - params.ret_lim / phi_alpha {
        dz = arm.arm_len_end;
        arm.collapsed = true;
        arm.tau_collapse = state.cur_time;
        arm.phi_collapse = state.phi;
    }
    arm.z = dz;
    arm.dz = dz;
    arm.pot_int = dz * (1.0 + 0.5 * dz * dz / arm.arm_len);
}

/// Coefficients of the implicit quadratic for the log-time increment,
/// second-order in `dz` while the potential is shallow.
#[allow(clippy::too_many_arguments)]
fn quad_coeffs(
    u0: f64,
    up: f64,
    u2p: f64,
    z0: f64,
    t0: f64,
    g1: f64,
    g2: f64,
    log_dt: f64,
) -> (f64, f64, f64) {
    let expp = u0.exp();
    let expm = (-u0).exp();
    let cc = -log_dt;
    let mut bb = up;
    let mut aa = 0.5 * up;
    let delta1 = t0 * expm / (g1 * z0.powi(4));
    let delta2 = 1.0 / (1.0 + delta1);
    let delta4 = g2 * expp / t0;
    let delta3 = 4.0 / z0 + up - delta4;
    bb += 4.0 / z0 - delta2 * delta3;
    aa += -2.0 / (z0 * z0) - 0.5 * (delta1 * delta2 * delta2 * delta3 * delta3);
    aa -= 0.5 * delta2 * (u2p - 4.0 / (z0 * z0) + delta4 * (delta4 - up));
    (aa, bb, cc)
}

/// Kramers-only coefficients for a steep potential.
fn kramers_coeffs(u0: f64, up: f64, g2: f64, elapsed: f64) -> (f64, f64, f64) {
    if up.abs() >= 1.0e-6 {
        (1.0, 2.0 / up, -2.0 * (elapsed.ln() - u0).exp() / (g2 * up))
    } else {
        (0.0, 1.0, -(elapsed.ln() - u0).exp() / g2)
    }
}

fn local_slopes(arena: &PolyArena, deltaphi: f64, n: i32) -> (f64, f64) {
    let arm = arena.arm(n);
    if arm.dz > TINY {
        (deltaphi / arm.dz, arm.deltazeff / arm.dz)
    } else {
        (0.0, 0.0)
    }
}

fn simple_step(arena: &mut PolyArena, ctx: &Context, n: i32) {
    let params = &ctx.params;
    let state = &ctx.state;
    let phi_alpha = state.phi.powf(params.alpha);
    let (dphidz, dzeffdz) = local_slopes(arena, state.deltaphi, n);

    let (z0, u0, t0, g2, arm_len_eff, arm_len_end, collapsed) = {
        let arm = arena.arm(n);
        (
            arm.z,
            arm.pot,
            arm.tau_k,
            arm.gamma2,
            arm.arm_len_eff,
            arm.arm_len_end,
            arm.collapsed,
        )
    };
    let up = 3.0 * z0 * phi_alpha / arm_len_eff;
    let u2p = (3.0 * phi_alpha / arm_len_eff)
        * (1.0 + params.alpha * z0 * dphidz / state.phi - z0 * dzeffdz / arm_len_eff);

    let (aa, bb, cc) = if u0 < U_KRAMERS {
        quad_coeffs(u0, up, u2p, z0, t0, GAMMA1, g2, params.dt_mult.ln())
    } else {
        let elapsed = state.cur_time * (1.0 - 1.0 / params.dt_mult);
        kramers_coeffs(u0, up, g2, elapsed)
    };
    let mut dz = quad_solve_spl(aa, bb, cc);

    if !state.interp_retraction {
        // late-Rouse regime: the arm explores by free Rouse motion
        dz = state.cur_time.sqrt() - z0;
        if z0 + dz > arm_len_end {
            dz = arm_len_end - z0;
        }
    }

    let mut now_collapsed = collapsed;
    if z0 + dz > arm_len_end - params.ret_lim / state.phi {
        dz = (arm_len_end - z0).max(0.0);
        now_collapsed = true;
    }

    apply_step(arena, ctx, n, z0, dz, u0, up, u2p, t0, g2, now_collapsed, collapsed);
}

fn compound_step(arena: &mut PolyArena, ctx: &Context, n: i32) {
    let params = &ctx.params;
    let state = &ctx.state;
    let phi_alpha = state.phi.powf(params.alpha);
    let (dphidz, dzeffdz) = local_slopes(arena, state.deltaphi, n);

    let (z0, u0, t0, arm_len, arm_len_eff, arm_len_end, pot_int, collapsed) = {
        let arm = arena.arm(n);
        (
            arm.z,
            arm.pot,
            arm.tau_k,
            arm.arm_len,
            arm.arm_len_eff,
            arm.arm_len_end,
            arm.pot_int,
            arm.collapsed,
        )
    };
    let up = 3.0 * z0 * phi_alpha / arm_len_eff;
    let u2p = (3.0 * phi_alpha / arm_len_eff)
        * (1.0 + params.alpha * z0 * dphidz / state.phi - z0 * dzeffdz / arm_len_eff);

    let drag = match params.pref_mode {
        PrefMode::Outer => arena.arm(n).gamma2,
        PrefMode::EffectiveLen => arm_len_eff * (1.5 * PI_POW_5 * arm_len_eff).sqrt(),
        PrefMode::EffectiveFriction => {
            let mut drag = calc_eff_fric(arena, n, params.alpha) / params.p_square;
            drag += 1.5 * PI_POW_2 * arm_len_eff;
            drag * (2.0 * PI * arm_len / 3.0).sqrt()
        }
    };

    // first-passage estimate with the Rouse crossover below U_KRAMERS
    let tk = drag * pot_int;
    let tf = if u0 < U_KRAMERS {
        let te = GAMMA1 * z0.powi(4);
        te / ((-u0).exp() + te / tk)
    } else {
        tk
    };
    if tf >= state.cur_time - 1.0e-6 {
        // the barrier has not opened yet
        arena.arm_mut(n).dz = 0.0;
        return;
    }

    let g2 = drag;
    let (aa, bb, cc) = if u0 < U_KRAMERS {
        quad_coeffs(u0, up, u2p, z0, t0, GAMMA1, g2, (state.cur_time / tf).ln())
    } else {
        kramers_coeffs(u0, up, g2, state.cur_time - tf)
    };
    let mut dz = quad_solve_spl(aa, bb, cc);

    if !state.interp_retraction {
        dz = arm_len_eff - z0;
    }
    // the retraction front may not outrun the effective reach
    if z0 + dz > arm_len_eff {
        dz = arm_len_eff - z0 + TINY;
    }

    let mut now_collapsed = collapsed;
    if z0 + dz > arm_len_end - params.ret_lim / state.phi {
        dz = (arm_len_end - z0).max(0.0);
        now_collapsed = true;
    }

    apply_step(arena, ctx, n, z0, dz, u0, up, u2p, t0, g2, now_collapsed, collapsed);
}

#[allow(clippy::too_many_arguments)]
fn apply_step(
    arena: &mut PolyArena,
    ctx: &Context,
    n: i32,
    z0: f64,
    dz: f64,
    u0: f64,
    up: f64,
    u2p: f64,
    t0: f64,
    g2: f64,
    now_collapsed: bool,
    was_collapsed: bool,
) {
    let expp = u0.exp();
    let arm = arena.arm_mut(n);
    if now_collapsed && !was_collapsed {
        arm.collapsed = true;
        arm.tau_collapse = ctx.state.cur_time;
        arm.phi_collapse = ctx.state.phi;
    }
    arm.z = z0 + dz;
    arm.pot = u0 + up * dz + 0.5 * u2p * dz * dz;
    arm.tau_k = t0 + g2 * expp * (dz + 0.5 * up * dz * dz);
    arm.dz = dz;
    arm.pot_int += expp * dz * (1.0 + 0.5 * up * dz + (u2p + up * up) * dz * dz / 6.0);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::{ArenaLimits, PolyArena};
    use crate::context::{Context, Params};
    use crate::relax::poly_start;
    use crate::templates::polygen_star3;
    use float_cmp::assert_approx_eq;

    fn star(arena: &mut PolyArena, z: f64) -> i32 {
        let p = arena.request_poly().unwrap();
        assert!(polygen_star3(arena, p, [z, z, z]));
        poly_start(arena, p, 1.0);
        p
    }

    #[test]
    fn step_zero_is_the_rouse_solution() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 16,
            max_poly: 2,
        });
        let mut ctx = Context::seeded(Params::default(), 1);
        ctx.state.cur_time = ctx.params.t_start;
        let p = star(&mut arena, 20.0);
        let free = arena.free_ends_of(p);
        for &m in &free {
            arm_retraction(&mut arena, &ctx, m, 0);
        }
        let z_expect = (ctx.params.t_start / GAMMA1).powf(0.25);
        for &m in &free {
            let arm = arena.arm(m);
            assert_approx_eq!(f64, arm.z, z_expect, epsilon = 1.0e-12);
            assert_approx_eq!(
                f64,
                arm.pot,
                1.5 * z_expect * z_expect / 20.0,
                epsilon = 1.0e-12
            );
            assert!(!arm.collapsed);
        }
    }

    #[test]
    fn retraction_advances_monotonically() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 16,
            max_poly: 2,
        });
        let mut ctx = Context::seeded(Params::default(), 2);
        ctx.state.cur_time = ctx.params.t_start;
        let p = star(&mut arena, 8.0);
        let free = arena.free_ends_of(p);
        for &m in &free {
            arm_retraction(&mut arena, &ctx, m, 0);
        }
        let mut last: Vec<f64> = free.iter().map(|&m| arena.arm(m).z).collect();
        for step in 1..2000 {
            ctx.state.cur_time *= ctx.params.dt_mult;
            for (&m, last_z) in free.iter().zip(&mut last) {
                arm_retraction(&mut arena, &ctx, m, step);
                let z = arena.arm(m).z;
                assert!(z >= *last_z - 1.0e-12, "z went backwards at step {step}");
                assert!(z <= arena.arm(m).arm_len_end + 1.0e-9);
                *last_z = z;
            }
        }
    }

    #[test]
    fn short_arms_collapse_at_identical_steps() {
        // the three arms of a symmetric star see identical states, so the
        // state machine must collapse them at the same step
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 16,
            max_poly: 2,
        });
        let params = Params {
            ret_lim: 0.5,
            ..Params::default()
        };
        let mut ctx = Context::seeded(params, 3);
        ctx.state.cur_time = ctx.params.t_start;
        let p = star(&mut arena, 3.0);
        let free = arena.free_ends_of(p);
        for &m in &free {
            arm_retraction(&mut arena, &ctx, m, 0);
        }
        let mut collapse_step = vec![None; free.len()];
        for step in 1..200_000 {
            ctx.state.cur_time *= ctx.params.dt_mult;
            for (k, &m) in free.iter().enumerate() {
                arm_retraction(&mut arena, &ctx, m, step);
                if collapse_step[k].is_none() && arena.arm(m).collapsed {
                    collapse_step[k] = Some(step);
                }
            }
            if collapse_step.iter().all(Option::is_some) {
                break;
            }
        }
        assert!(collapse_step.iter().all(Option::is_some));
        assert_eq!(collapse_step[0], collapse_step[1]);
        assert_eq!(collapse_step[0], collapse_step[2]);
    }
}
