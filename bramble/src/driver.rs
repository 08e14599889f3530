//! The relaxation driver: the multiplicative time-step loop, dilution
//! accounting and the supertube envelope.

use crate::arena::PolyArena;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::extension::{del_ghost, extend_arm, prune_chain};
use crate::nlin::{self, NlinState};
use crate::reptation::{check_linearity, rept_sv_mass, try_reptate};
use crate::retraction::arm_retraction;
use serde::Serialize;

/// One row of the supertube trace.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct SupertubeRow {
    /// Simulation time.
    pub t: f64,
    /// Unrelaxed fraction seen by retraction.
    pub phi: f64,
    /// Supertube envelope.
    pub phi_st: f64,
    /// Instantaneous unrelaxed fraction.
    pub phi_true: f64,
}

/// Hard upper bound on the simulation time.
const T_LIMIT: f64 = 1.0e30;

/// Tolerance on negative dilution from round-off before the run is declared
/// numerically broken (warning 102).
const PHI_NEG_TOL: f64 = 1.0e-6;

/// Recomputes the unrelaxed fraction of the ensemble and rolls the
/// supertube envelope. Returns the fraction retraction should see (`φ_ST`
/// when slaved, the frozen `φ` otherwise) and whether the dilution left its
/// admissible range.
pub fn frac_unrelaxed(arena: &PolyArena, ctx: &mut Context, polys: &[i32]) -> (f64, bool) {
    let params = &ctx.params;
    let mut phi_true = 0.0;
    let mut lt_rs_lhs = 0.0;

    for &i in polys {
        if !arena.poly(i).alive {
            continue;
        }
        let mut phi_mol = 0.0;
        for n in arena.free_ends_of(i) {
            let arm = arena.arm(n);
            phi_mol += (arm.arm_len_end - arm.z) * arm.vol_fraction / arm.arm_len;
        }
        for s in arena.segments_of(i) {
            let arm = arena.arm(s);
            if !arm.relaxing {
                phi_mol += arm.vol_fraction;
            }
        }
        phi_true += phi_mol;
        if params.late_rouse && ctx.state.interp_retraction {
            let poly = arena.poly(i);
            if poly.wtfrac > 0.0 && phi_mol > 0.0 {
                lt_rs_lhs += poly.wtfrac
                    * (1.5 * (poly.gfactor * phi_mol * poly.molmass / poly.wtfrac).ln()).exp()
                    / poly.molmass;
            }
        }
    }

    let mut fatal = false;
    if phi_true < 0.0 {
        if phi_true.abs() > PHI_NEG_TOL {
            ctx.reporter
                .error("warning 102: unrelaxed fraction fell below zero");
            fatal = true;
        }
        phi_true = 0.0;
    }

    if params.late_rouse && ctx.state.interp_retraction && lt_rs_lhs < params.lt_rs_factor {
        ctx.state.interp_retraction = false;
        ctx.reporter.info(&format!(
            "late Rouse takes over: LHS = {lt_rs_lhs:e}, phi_true = {phi_true:e}"
        ));
    }

    let state = &mut ctx.state;
    state.phi_true = phi_true;
    let phi_seen = if state.supertube_activated {
        let envelope =
            state.phi_st_0 * ((state.st_activ_time / state.cur_time).ln() / (2.0 * params.alpha)).exp();
        if envelope > phi_true {
            state.phi_st = envelope;
            if params.slave_phi_to_phi_st {
                state.phi_st
            } else {
                state.phi
            }
        } else {
            state.phi_st = phi_true;
            state.supertube_activated = false;
            phi_true
        }
    } else if phi_true < state.phi * (-params.dt_mult.ln() / (2.0 * params.alpha)).exp() {
        // relaxation outran the tube-dilation speed limit
        state.supertube_activated = true;
        state.phi_st_0 = state.phi;
        state.st_activ_time = state.cur_time / params.dt_mult;
        state.phi_st = state.phi * (-params.dt_mult.ln() / (2.0 * params.alpha)).exp();
        if params.slave_phi_to_phi_st {
            state.phi_st
        } else {
            state.phi
        }
    } else {
        state.phi_st = phi_true;
        phi_true
    };
    (phi_seen, fatal)
}

/// One driver step over every live polymer: retraction, extension,
/// ghost/prune sweeps, reptation tests and the dilution update. Returns the
/// number of polymers still alive, or an error on cancellation or numerical
/// failure.
///
/// # Errors
///
/// [`Error::Cancelled`] when the stop flag is raised between polymers;
/// [`Error::Numerical`] when the dilution accounting broke down.
pub fn time_step(
    arena: &mut PolyArena,
    ctx: &mut Context,
    polys: &[i32],
    indx: usize,
    mut nlin: Option<&mut NlinState>,
) -> Result<usize> {
    if indx != 0 {
        ctx.state.cur_time *= ctx.params.dt_mult;
    }
    let collecting = nlin.as_ref().is_some_and(|s| s.collecting());

    for &i in polys {
        if !arena.poly(i).alive {
            continue;
        }
        if ctx.stop_requested() {
            return Err(Error::Cancelled);
        }
        let free = arena.free_ends_of(i);
        for &n in &free {
            arm_retraction(arena, ctx, n, indx);
            if let Some(state) = nlin.as_deref_mut() {
                if collecting {
                    nlin::nlin_retraction(arena, state, &ctx.params, ctx.state.cur_time, n);
                }
                if arena.arm(n).compound {
                    nlin::sample_eff_arm_len(arena, ctx.state.cur_time, n);
                }
            }
        }
        for &n in &free {
            let arm = arena.arm(n);
            if !arm.prune && !arm.ghost {
                extend_arm(arena, ctx, i, n);
            }
        }
        del_ghost(arena, i);
        if arena.poly(i).alive {
            prune_chain(arena, i);
        }
    }

    let mut num_alive = 0;
    for &i in polys {
        if !arena.poly(i).alive {
            continue;
        }
        if !arena.poly(i).linear_tag {
            check_linearity(arena, i);
        }
        if arena.poly(i).linear_tag && try_reptate(arena, ctx, i) {
            if collecting {
                if let Some(state) = nlin.as_deref_mut() {
                    nlin::reptate_nlin(arena, state, &ctx.params, ctx.state.cur_time, i);
                }
            }
            rept_sv_mass(arena, i);
            arena.poly_mut(i).alive = false;
        } else {
            num_alive += 1;
        }
    }

    let phi_old = ctx.state.phi;
    let phi_true_old = ctx.state.phi_true;
    let phi_st_old = ctx.state.phi_st;
    let (phi, fatal) = frac_unrelaxed(arena, ctx, polys);
    ctx.state.phi = phi;
    ctx.state.deltaphi = phi - phi_old;

    if let Some(state) = nlin.as_deref_mut() {
        state.track_phi(
            ctx.state.phi_true,
            ctx.state.phi_st,
            phi_true_old - ctx.state.phi_true,
            phi_st_old - ctx.state.phi_st,
        );
        if collecting {
            nlin::calc_nlin_phi_held(arena, state, polys);
        }
    }

    if fatal {
        return Err(Error::Numerical(
            "unrelaxed fraction fell below zero".to_owned(),
        ));
    }
    Ok(num_alive)
}

/// Runs the whole relaxation of `polys` to completion, emitting one
/// supertube row per step. In flow-preparation mode the per-arm snip
/// history is sampled each step; in nonlinear mode the mode accumulators of
/// `nlin` are filled and flushed along the Maxwell-time schedule.
///
/// # Errors
///
/// [`Error::Cancelled`] on a stop request (molecules are released), and
/// [`Error::Numerical`] if the dilution accounting broke down (the trace so
/// far is lost).
pub fn relax_run(
    arena: &mut PolyArena,
    ctx: &mut Context,
    polys: &[i32],
    mut nlin: Option<&mut NlinState>,
) -> Result<Vec<SupertubeRow>> {
    ctx.state.cur_time = ctx.params.t_start;
    let mut trace = vec![SupertubeRow {
        t: 0.0,
        phi: 1.0,
        phi_st: 1.0,
        phi_true: 1.0,
    }];

    let sampling = ctx.params.snipping && !ctx.params.calc_nlin;
    let mut progress = 0.9;
    let mut indx = 0;
    let mut num_alive = usize::MAX;
    while num_alive > 0 && ctx.state.cur_time < T_LIMIT {
        if ctx.state.phi_st + 0.05 <= progress {
            ctx.reporter
                .info(&format!("{:3.0}% done", (1.0 - progress) * 100.0));
            progress -= 0.1;
        }
        if ctx.stop_requested() {
            release_all(arena, polys);
            return Err(Error::Cancelled);
        }
        if let Some(state) = nlin.as_deref_mut() {
            if ctx.params.calc_nlin {
                let next_t = if indx == 0 {
                    ctx.state.cur_time
                } else {
                    ctx.state.cur_time * ctx.params.dt_mult
                };
                state.on_step(&ctx.params, next_t);
            }
        }
        num_alive = match time_step(arena, ctx, polys, indx, nlin.as_deref_mut()) {
            Ok(n) => n,
            Err(err) => {
                release_all(arena, polys);
                return Err(err);
            }
        };
        trace.push(SupertubeRow {
            t: ctx.state.cur_time,
            phi: ctx.state.phi,
            phi_st: ctx.state.phi_st,
            phi_true: ctx.state.phi_true,
        });
        if sampling {
            if let Some(state) = nlin.as_deref_mut() {
                nlin::sample_alt_time(arena, ctx, state, polys);
                nlin::sample_alt_taus(arena, ctx, state, polys);
            }
        }
        indx += 1;
    }

    if let Some(state) = nlin {
        if ctx.params.calc_nlin {
            state.finish(&ctx.params);
        }
    }
    Ok(trace)
}

fn release_all(arena: &mut PolyArena, polys: &[i32]) {
    for &p in polys {
        arena.return_poly(p);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::{Context, Params};
    use crate::polygen::set_vol_frac;
    use crate::relax::poly_start;
    use crate::templates::{polygen_lin, polygen_star3};
    use crate::arena::ArenaLimits;
    use crate::context::VolFracWeighting;
    use float_cmp::assert_approx_eq;

    fn linear_ensemble(arena: &mut PolyArena, count: usize, z: f64) -> Vec<i32> {
        let mut polys = Vec::new();
        for _ in 0..count {
            let p = arena.request_poly().unwrap();
            assert!(polygen_lin(arena, p, z));
            poly_start(arena, p, 1.0);
            polys.push(p);
        }
        set_vol_frac(arena, &polys, 1.0, VolFracWeighting::ByNumber);
        polys
    }

    #[test]
    fn monodisperse_linear_fully_relaxes() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 256,
            max_poly: 32,
        });
        let params = Params {
            dt_mult: 1.02,
            ret_lim: 0.1,
            ..Params::default()
        };
        let mut ctx = Context::seeded(params, 42);
        let polys = linear_ensemble(&mut arena, 8, 10.0);

        let trace = relax_run(&mut arena, &mut ctx, &polys, None).unwrap();
        let last = trace.last().unwrap();
        assert_approx_eq!(f64, last.phi_true, 0.0, epsilon = 1.0e-9);
        // Z = 10 reptates within ~30 Z^3 tau_e
        assert!(last.t <= 30.0 * 1000.0, "finished at t = {}", last.t);

        // every polymer banked its full weight
        let total: f64 = polys.iter().map(|&p| arena.poly(p).relaxed_frac).sum();
        assert_approx_eq!(f64, total, 1.0, epsilon = 1.0e-9);
        for &p in &polys {
            assert!(!arena.poly(p).alive);
        }
    }

    #[test]
    fn phi_is_monotone_and_conserved() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 256,
            max_poly: 32,
        });
        let params = Params {
            dt_mult: 1.05,
            ret_lim: 0.1,
            ..Params::default()
        };
        let mut ctx = Context::seeded(params, 43);
        let mut polys = linear_ensemble(&mut arena, 4, 12.0);
        for _ in 0..4 {
            let p = arena.request_poly().unwrap();
            assert!(polygen_star3(&mut arena, p, [6.0, 6.0, 6.0]));
            poly_start(&mut arena, p, 1.0);
            polys.push(p);
        }
        set_vol_frac(&mut arena, &polys, 1.0, VolFracWeighting::ByNumber);

        let trace = relax_run(&mut arena, &mut ctx, &polys, None).unwrap();
        for pair in trace.windows(2) {
            assert!(
                pair[1].phi <= pair[0].phi + 1.0e-12,
                "phi grew from {} to {}",
                pair[0].phi,
                pair[1].phi
            );
        }
        // mass conservation: banked + surviving = 1 throughout; at the end
        // everything is banked
        let banked: f64 = polys.iter().map(|&p| arena.poly(p).relaxed_frac).sum();
        assert_approx_eq!(f64, banked, 1.0, epsilon = 1.0e-9);
    }

    #[test]
    fn stop_flag_cancels_and_releases() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 64,
            max_poly: 8,
        });
        let mut ctx = Context::seeded(Params::default(), 44);
        let polys = linear_ensemble(&mut arena, 4, 50.0);
        let arms_in_use = 64 - arena.arms_left();
        assert!(arms_in_use > 0);

        ctx.stop.store(true, std::sync::atomic::Ordering::Relaxed);
        let err = relax_run(&mut arena, &mut ctx, &polys, None).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(arena.arms_left(), 64);
    }

    #[test]
    fn symmetric_star_arms_share_one_collapse_time() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 32,
            max_poly: 4,
        });
        let params = Params {
            dt_mult: 1.02,
            ret_lim: 0.2,
            ..Params::default()
        };
        let mut ctx = Context::seeded(params, 45);
        let p = arena.request_poly().unwrap();
        assert!(polygen_star3(&mut arena, p, [20.0, 20.0, 20.0]));
        poly_start(&mut arena, p, 1.0);
        let polys = vec![p];
        set_vol_frac(&mut arena, &polys, 1.0, VolFracWeighting::ByNumber);

        relax_run(&mut arena, &mut ctx, &polys, None).unwrap();
        let collapse_times: Vec<f64> = arena
            .segments_of(p)
            .iter()
            .map(|&m| arena.arm(m).tau_collapse)
            .collect();
        assert!(collapse_times[0] > 0.0);
        assert_approx_eq!(f64, collapse_times[0], collapse_times[1], epsilon = 1.0e-12);
        assert_approx_eq!(f64, collapse_times[0], collapse_times[2], epsilon = 1.0e-12);
    }
}
