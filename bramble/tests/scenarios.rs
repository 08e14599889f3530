//! End-to-end scenarios over the public API: ensemble synthesis,
//! architecture analysis and full relaxation runs.

use bramble::architecture::{calc_priority, calc_seniority};
use bramble::arena::{ArenaLimits, PolyArena};
use bramble::context::{Context, Params, PrioMode, VolFracWeighting};
use bramble::driver::relax_run;
use bramble::ensemble::Ensemble;
use bramble::linear_resp::zero_shear_viscosity;
use bramble::massrg::mass_segs;
use bramble::polygen::{generate_ensemble, set_vol_frac};
use bramble::relax::poly_start;
use bramble::templates::{polygen_h, polygen_lin};
use bramble::tobita::TobitaBatch;
use float_cmp::assert_approx_eq;

const MASS_MONO: f64 = 28.0;
const M_E: f64 = 1120.0;

#[test]
fn monodisperse_linear_ensemble() {
    let mut arena = PolyArena::new(ArenaLimits {
        max_arm: 40_000,
        max_poly: 12_000,
    });
    let mut dist = Ensemble::new("linear", MASS_MONO, M_E);
    dist.bobinit();
    let z = 50.0;
    let mass = z * dist.n_e * MASS_MONO;

    for _ in 0..10_000 {
        let p = arena.request_poly().unwrap();
        assert!(polygen_lin(&mut arena, p, z * dist.n_e));
        poly_start(&mut arena, p, 1.0);
        let first = arena.poly(p).first_end;
        let (len, _) = mass_segs(&arena, first);
        {
            let poly = arena.poly_mut(p);
            poly.tot_len = len;
            poly.num_br = 0;
        }
        let (_, _, g) = bramble::massrg::mass_rg2(&arena, first);
        arena.poly_mut(p).gfactor = g;
        dist.bobcount(&mut arena, p);
        dist.polymers.push(p);
    }
    dist.molbin(&arena);

    assert_approx_eq!(f64, dist.m_w, mass, epsilon = 1.0e-9 * mass);
    assert_approx_eq!(f64, dist.m_n, mass, epsilon = 1.0e-9 * mass);
    assert_approx_eq!(f64, dist.brav, 0.0);

    for &p in &dist.polymers {
        assert_approx_eq!(f64, arena.poly(p).gfactor, 1.0, epsilon = 1.0e-12);
    }
    // every segment of every molecule sits at the outermost level
    for &p in dist.polymers.iter().take(50) {
        if arena.poly(p).first_end == 0 {
            continue;
        }
        calc_seniority(&mut arena, p);
        calc_priority(&mut arena, p, PrioMode::All);
        for m in arena.segments_of(p) {
            assert_eq!(arena.arm(m).seniority, 1);
            assert_eq!(arena.arm(m).priority, 1);
        }
    }
}

#[test]
fn tobita_batch_reference_recipe() {
    let mut arena = PolyArena::new(ArenaLimits {
        max_arm: 4_000_000,
        max_poly: 60_000,
    });
    let mut ctx = Context::seeded(Params::default(), 20_2408);
    let mut dist = Ensemble::new("tobita", MASS_MONO, M_E);
    dist.bobinit();

    let mut gen = TobitaBatch::batch(0.95, 5.0e-4, 0.0, 0.0, 1.0e-3, 5000);
    generate_ensemble(&mut arena, &mut ctx, &mut dist, 50_000, |a, c, d, n| {
        gen.make(a, c, d, None, n)
    })
    .unwrap();
    assert!(!dist.error, "generator hit a resource limit");
    assert_eq!(dist.polymers.len(), 50_000);
    dist.molbin(&arena);

    let pdi = dist.m_w / dist.m_n;
    assert!(
        (pdi - 4.1).abs() / 4.1 < 0.08,
        "M_w/M_n = {pdi}, expected about 4.1"
    );
    assert!(
        (dist.brav - 2.3).abs() / 2.3 < 0.08,
        "branches per 500 monomers = {}, expected about 2.3",
        dist.brav
    );
    // unimodal histogram: a single maximum up to counting noise at the edges
    let wt = &dist.mwd.wt;
    let peak = wt
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(i, _)| i)
        .unwrap();
    assert!(peak > 0 && peak < wt.len() - 1);
}

#[test]
fn h_polymer_architecture() {
    let mut arena = PolyArena::new(ArenaLimits {
        max_arm: 16,
        max_poly: 2,
    });
    let p = arena.request_poly().unwrap();
    assert!(polygen_h(&mut arena, p, &[25.0, 25.0, 50.0, 25.0, 25.0]));
    poly_start(&mut arena, p, 1.0);

    assert_eq!(arena.free_ends_of(p).len(), 4);
    calc_seniority(&mut arena, p);
    calc_priority(&mut arena, p, PrioMode::All);
    let segs = arena.segments_of(p);
    let senio: Vec<i32> = segs.iter().map(|&m| arena.arm(m).seniority).collect();
    let prio: Vec<i32> = segs.iter().map(|&m| arena.arm(m).priority).collect();
    assert_eq!(senio, vec![1, 1, 2, 1, 1]);
    assert_eq!(prio, vec![1, 1, 2, 1, 1]);

    let first = arena.poly(p).first_end;
    let (len, _, g) = bramble::massrg::mass_rg2(&arena, first);
    assert_approx_eq!(f64, len, 150.0, epsilon = 1.0e-12);
    // Gaussian H with arm fraction 1/6: g = 56/72
    assert_approx_eq!(f64, g, 56.0 / 72.0, epsilon = 1.0e-12);
}

#[test]
fn linear_lve_relaxation() {
    let z = 10.0;
    let mut arena = PolyArena::new(ArenaLimits {
        max_arm: 512,
        max_poly: 64,
    });
    let params = Params {
        dt_mult: 1.02,
        ret_lim: 0.1,
        ..Params::default()
    };
    let mut ctx = Context::seeded(params, 6);
    let mut polys = Vec::new();
    for _ in 0..16 {
        let p = arena.request_poly().unwrap();
        assert!(polygen_lin(&mut arena, p, z));
        poly_start(&mut arena, p, 1.0);
        polys.push(p);
    }
    set_vol_frac(&mut arena, &polys, 1.0, VolFracWeighting::ByNumber);

    let trace = relax_run(&mut arena, &mut ctx, &polys, None).unwrap();
    let last = trace.last().unwrap();
    assert_approx_eq!(f64, last.phi_true, 0.0, epsilon = 1.0e-9);
    assert!(last.t <= 30.0 * z.powi(3), "slow relaxation: t = {}", last.t);

    // the bare-tube estimate eta0 = (pi^2/12) G0 Z^3 tau_e bounds the
    // computed viscosity; contour-length fluctuations shorten it
    let eta0 = zero_shear_viscosity(&ctx.params, &trace, 1.0, 1.0);
    let doi_edwards = std::f64::consts::PI.powi(2) / 12.0 * z.powi(3);
    assert!(eta0 > 0.0);
    assert!(
        eta0 / doi_edwards > 0.05 && eta0 / doi_edwards < 2.0,
        "eta0 = {eta0}, Doi-Edwards = {doi_edwards}"
    );
}

#[test]
fn h_polymer_relaxes_through_compound_arms() {
    let mut arena = PolyArena::new(ArenaLimits {
        max_arm: 64,
        max_poly: 4,
    });
    let params = Params {
        dt_mult: 1.02,
        ret_lim: 0.2,
        ..Params::default()
    };
    let mut ctx = Context::seeded(params, 7);
    let p = arena.request_poly().unwrap();
    assert!(polygen_h(&mut arena, p, &[4.0, 4.0, 12.0, 4.0, 4.0]));
    poly_start(&mut arena, p, 1.0);
    let polys = vec![p];
    set_vol_frac(&mut arena, &polys, 1.0, VolFracWeighting::ByNumber);

    let trace = relax_run(&mut arena, &mut ctx, &polys, None).unwrap();
    assert!(!arena.poly(p).alive);
    assert_approx_eq!(f64, arena.poly(p).relaxed_frac, 1.0, epsilon = 1.0e-9);
    // mass is conserved at every step: unrelaxed plus banked never exceeds 1
    for row in &trace {
        assert!(row.phi_true <= 1.0 + 1.0e-9);
        assert!(row.phi_true >= -1.0e-9);
    }
    // the crossbar was swallowed by one of the outer arms at some point
    let was_compound = arena
        .segments_of(p)
        .iter()
        .any(|&m| arena.arm(m).compound || arena.arm(m).nxt_relax != 0);
    assert!(was_compound);
}

#[test]
fn mass_is_conserved_throughout_a_mixed_run() {
    let mut arena = PolyArena::new(ArenaLimits {
        max_arm: 512,
        max_poly: 32,
    });
    let params = Params {
        dt_mult: 1.05,
        ret_lim: 0.1,
        ..Params::default()
    };
    let mut ctx = Context::seeded(params, 8);
    let mut polys = Vec::new();
    for len in [8.0, 14.0, 20.0] {
        for _ in 0..3 {
            let p = arena.request_poly().unwrap();
            assert!(polygen_lin(&mut arena, p, len));
            poly_start(&mut arena, p, 1.0);
            polys.push(p);
        }
    }
    for _ in 0..3 {
        let p = arena.request_poly().unwrap();
        assert!(polygen_h(&mut arena, p, &[3.0, 3.0, 8.0, 3.0, 3.0]));
        poly_start(&mut arena, p, 1.0);
        polys.push(p);
    }
    set_vol_frac(&mut arena, &polys, 1.0, VolFracWeighting::ByNumber);

    relax_run(&mut arena, &mut ctx, &polys, None).unwrap();
    let banked: f64 = polys.iter().map(|&p| arena.poly(p).relaxed_frac).sum();
    assert_approx_eq!(f64, banked, 1.0, epsilon = 1.0e-9);
}
