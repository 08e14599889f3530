//! The two-pass flow pipeline: the preparation pass samples per-arm snip
//! histories during the LVE relaxation; the nonlinear pass recomputes flow
//! priorities on the snipped graph and accumulates the mode table.

use bramble::architecture::{calc_priority, calc_seniority};
use bramble::arena::{ArenaLimits, PolyArena};
use bramble::context::{Context, Params, PrioMode, VolFracWeighting};
use bramble::driver::relax_run;
use bramble::nlin::{
    apply_saved_prio, calc_flow_priority, finalize_saved_prio, snapshot_polymers, NlinState,
};
use bramble::polygen::set_vol_frac;
use bramble::relax::poly_start;
use bramble::templates::polygen_h;

fn build_ensemble(arena: &mut PolyArena) -> Vec<i32> {
    let mut polys = Vec::new();
    for _ in 0..4 {
        let p = arena.request_poly().unwrap();
        assert!(polygen_h(arena, p, &[3.0, 3.0, 9.0, 3.0, 3.0]));
        poly_start(arena, p, 1.0);
        calc_seniority(arena, p);
        calc_priority(arena, p, PrioMode::All);
        polys.push(p);
    }
    set_vol_frac(arena, &polys, 1.0, VolFracWeighting::ByNumber);
    polys
}

#[test]
fn preparation_pass_samples_every_arm() {
    let mut arena = PolyArena::new(ArenaLimits {
        max_arm: 256,
        max_poly: 16,
    });
    let params = Params {
        dt_mult: 1.05,
        ret_lim: 0.2,
        snipping: true,
        snip_time: 1.0,
        ..Params::default()
    };
    let mut ctx = Context::seeded(params, 90);
    let polys = build_ensemble(&mut arena);

    let mut nlin = NlinState::new(&ctx.params, 4, Vec::new());
    nlin.br_copy = snapshot_polymers(&mut arena, &polys);

    relax_run(&mut arena, &mut ctx, &polys, Some(&mut nlin)).unwrap();

    // every slot of every snapshot carries a sampled history
    for copy in &nlin.br_copy {
        assert_eq!(copy.narm, 5);
        for k in 0..copy.narm {
            assert_eq!(copy.assigned_trelax[k], 0, "trelax slot {k} unsampled");
            assert_eq!(copy.assigned_taus[k], 0, "taus slot {k} unsampled");
            assert!(copy.trelax[k] > 0.0);
            assert!(copy.taus[k] > 0.0);
            assert!(copy.zeta[k] >= 0.0);
        }
    }

    let rows = finalize_saved_prio(&mut arena, &nlin);
    assert_eq!(rows.len(), 4 * 5);
    // crossbars keep their tree priority in the saved table
    assert!(rows.iter().any(|r| r.priority == 2));
}

#[test]
fn nonlinear_pass_emits_mode_blocks() {
    let mut arena = PolyArena::new(ArenaLimits {
        max_arm: 256,
        max_poly: 16,
    });
    // preparation pass
    let prep_params = Params {
        dt_mult: 1.05,
        ret_lim: 0.2,
        snipping: true,
        snip_time: 1.0,
        ..Params::default()
    };
    let mut ctx = Context::seeded(prep_params.clone(), 91);
    let polys = build_ensemble(&mut arena);
    let mut prep = NlinState::new(&ctx.params, 4, Vec::new());
    prep.br_copy = snapshot_polymers(&mut arena, &polys);
    relax_run(&mut arena, &mut ctx, &polys, Some(&mut prep)).unwrap();
    let rows = finalize_saved_prio(&mut arena, &prep);

    // nonlinear pass on a fresh copy of the same molecules
    let mut arena = PolyArena::new(ArenaLimits {
        max_arm: 256,
        max_poly: 16,
    });
    let nlin_params = Params {
        dt_mult: 1.05,
        ret_lim: 0.2,
        snipping: true,
        calc_nlin: true,
        flow_priority: true,
        snip_time: 1.0,
        ..Params::default()
    };
    let mut ctx = Context::seeded(nlin_params, 91);
    let polys = build_ensemble(&mut arena);
    apply_saved_prio(&mut arena, &polys, &rows);

    let mut max_flow_prio = 0;
    for &p in &polys {
        max_flow_prio = max_flow_prio.max(calc_flow_priority(&mut arena, ctx.params.snip_time, p));
    }
    assert!(max_flow_prio >= 1);

    let t_maxwell = NlinState::default_maxwell_times(&ctx.params, 40);
    let mut nlin = NlinState::new(&ctx.params, max_flow_prio.max(2) as usize, t_maxwell);
    nlin.br_copy = snapshot_polymers(&mut arena, &polys);
    relax_run(&mut arena, &mut ctx, &polys, Some(&mut nlin)).unwrap();

    assert!(!nlin.blocks.is_empty(), "no nonlinear mode blocks emitted");
    assert!(nlin.blocks.iter().any(|b| !b.modes.is_empty()));
    for block in &nlin.blocks {
        assert!(block.t_maxwell > 0.0);
        if block.modes.is_empty() {
            // a window the ensemble had already relaxed through
            continue;
        }
        let total: f64 = block.modes.iter().map(|m| m.phi).sum();
        // each block's weights are normalized over relax + held splits
        assert!(total > 0.0 && total <= 1.0 + 1.0e-9, "total = {total}");
        for mode in &block.modes {
            assert!(mode.priority >= 1);
            assert!(mode.stretch_rate >= 1.0 - 1.0e-12);
        }
    }
}
