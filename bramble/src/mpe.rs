//! Metallocene-polyethylene ensembles and the weight-averaged recursive
//! builder shared with the gel module.
//!
//! The number-averaged builder grows branches downstream with a constant
//! branching probability; the weight-averaged variant starts from a segment
//! picked by weight, which doubles the downstream branching probability on
//! the first generation.

use crate::arena::PolyArena;
use crate::lengths::flory_distb;
use crate::templates::polygen_lin;
use crate::topology::restore_signs;
use rand::Rng;
use rand_pcg::Pcg64;

/// Weighting of the seed segment in [`polygen_wtav`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WtavSeed {
    /// Metallocene PE: downstream branching doubles on the seed.
    Mpe,
    /// Gelation ensemble: the same branching probability everywhere.
    Gel,
}

fn add_wt_right(
    arena: &mut PolyArena,
    rng: &mut Pcg64,
    n: i32,
    logprob: f64,
    b_u: f64,
    b_d: f64,
    downstream: bool,
    n_e: f64,
    depth: usize,
    max_depth: usize,
) -> bool {
    if depth > max_depth {
        // growth halts at the depth cap; the face stays a chain end
        return true;
    }
    let (Some(n1), Some(n2)) = (arena.request_arm(), arena.request_arm()) else {
        return false;
    };
    {
        let arm = arena.arm_mut(n);
        arm.r1 = n1;
        arm.r2 = n2;
    }
    {
        let arm = arena.arm_mut(n1);
        arm.l1 = n;
        arm.l2 = n2;
    }
    {
        let arm = arena.arm_mut(n2);
        arm.l1 = n;
        arm.l2 = n1;
    }
    arena.armupdown(n, n1);
    arena.armupdown(n1, n2);
    arena.arm_mut(n1).arm_len = flory_distb(rng, logprob) / n_e;
    arena.arm_mut(n2).arm_len = flory_distb(rng, logprob) / n_e;

    let p1 = if downstream { b_d } else { b_u };
    if rng.gen::<f64>() < p1
        && !add_wt_right(
            arena, rng, n1, logprob, b_u, b_d, downstream, n_e, depth + 1, max_depth,
        )
    {
        return false;
    }
    if rng.gen::<f64>() < b_u
        && !add_wt_right(
            arena,
            rng,
            n2,
            logprob,
            b_u,
            b_d,
            false,
            n_e,
            depth + 1,
            max_depth,
        )
    {
        return false;
    }
    true
}

fn add_wt_left(
    arena: &mut PolyArena,
    rng: &mut Pcg64,
    n: i32,
    logprob: f64,
    bp: f64,
    n_e: f64,
    depth: usize,
    max_depth: usize,
) -> bool {
    if depth > max_depth {
        return true;
    }
    let (Some(n1), Some(n2)) = (arena.request_arm(), arena.request_arm()) else {
        return false;
    };
    {
        let arm = arena.arm_mut(n);
        arm.l1 = n1;
        arm.l2 = n2;
    }
    {
        let arm = arena.arm_mut(n1);
        arm.r1 = n;
        arm.r2 = n2;
    }
    {
        let arm = arena.arm_mut(n2);
        arm.r1 = n;
        arm.r2 = n1;
    }
    arena.armupdown(n, n1);
    arena.armupdown(n1, n2);
    arena.arm_mut(n1).arm_len = flory_distb(rng, logprob) / n_e;
    arena.arm_mut(n2).arm_len = flory_distb(rng, logprob) / n_e;

    for m in [n1, n2] {
        if rng.gen::<f64>() < bp
            && !add_wt_left(arena, rng, m, logprob, bp, n_e, depth + 1, max_depth)
        {
            return false;
        }
    }
    true
}

/// Weight-averaged recursive builder used by the MPE and gel ensembles: the
/// seed segment is drawn as the sum of two Flory strands and branches grow
/// out of both of its ends.
pub fn polygen_wtav(
    arena: &mut PolyArena,
    rng: &mut Pcg64,
    p: i32,
    seed: WtavSeed,
    logprob: f64,
    b_u: f64,
    n_e: f64,
    max_depth: usize,
) -> bool {
    let Some(n1) = arena.request_arm() else {
        return false;
    };
    arena.poly_mut(p).first_end = n1;
    arena.arm_mut(n1).arm_len = (flory_distb(rng, logprob) + flory_distb(rng, logprob)) / n_e;

    let b_d = match seed {
        WtavSeed::Mpe => 2.0 * b_u,
        WtavSeed::Gel => b_u,
    };
    if rng.gen::<f64>() < b_u
        && !add_wt_left(arena, rng, n1, logprob, b_u, n_e, 0, max_depth)
    {
        return false;
    }
    if rng.gen::<f64>() < b_d
        && !add_wt_right(arena, rng, n1, logprob, b_u, b_d, true, n_e, 0, max_depth)
    {
        return false;
    }

    let lone = {
        let arm = arena.arm(n1);
        arm.l1 == 0 && arm.r1 == 0
    };
    if lone {
        // an unbranched seed becomes a plain two-segment linear
        let seglen = arena.arm(n1).arm_len;
        let Some(n2) = arena.request_arm() else {
            return false;
        };
        arena.arm_mut(n1).r1 = n2;
        arena.arm_mut(n2).l1 = n1;
        arena.arm_mut(n1).arm_len = 0.5 * seglen;
        arena.arm_mut(n2).arm_len = 0.5 * seglen;
        arena.armupdown(n1, n2);
    }

    let segs = arena.segments_of(p);
    restore_signs(arena, &segs);
    true
}

fn mpe_add_branch(
    arena: &mut PolyArena,
    rng: &mut Pcg64,
    n: i32,
    branch_prob: f64,
    logprobs: f64,
    n_e: f64,
    depth: usize,
    max_depth: usize,
) -> bool {
    if depth > max_depth {
        return true;
    }
    let (Some(n1), Some(n2)) = (arena.request_arm(), arena.request_arm()) else {
        return false;
    };
    {
        let arm = arena.arm_mut(n);
        arm.r1 = n1;
        arm.r2 = n2;
    }
    {
        let arm = arena.arm_mut(n1);
        arm.l1 = n;
        arm.l2 = n2;
    }
    {
        let arm = arena.arm_mut(n2);
        arm.l1 = n;
        arm.l2 = n1;
    }
    arena.armupdown(n, n1);
    arena.armupdown(n1, n2);
    arena.arm_mut(n1).arm_len = flory_distb(rng, logprobs) / n_e;
    arena.arm_mut(n2).arm_len = flory_distb(rng, logprobs) / n_e;

    for m in [n1, n2] {
        if rng.gen::<f64>() < branch_prob
            && !mpe_add_branch(arena, rng, m, branch_prob, logprobs, n_e, depth + 1, max_depth)
        {
            return false;
        }
    }
    true
}

/// Number-averaged metallocene-PE molecule from the propagation and
/// monomer-addition probabilities of the catalytic cycle.
pub fn polygen_mpe(
    arena: &mut PolyArena,
    rng: &mut Pcg64,
    p: i32,
    prop_prob: f64,
    mono_prob: f64,
    n_e: f64,
    max_depth: usize,
) -> bool {
    let tmpvar = prop_prob * mono_prob;
    let branch_prob = prop_prob * (1.0 - mono_prob) / (1.0 - tmpvar);
    let logprobs = tmpvar.ln();

    let seg_len = flory_distb(rng, logprobs) / n_e;
    if rng.gen::<f64>() >= branch_prob {
        return polygen_lin(arena, p, seg_len);
    }
    let Some(n1) = arena.request_arm() else {
        return false;
    };
    arena.poly_mut(p).first_end = n1;
    arena.arm_mut(n1).arm_len = seg_len;
    if !mpe_add_branch(arena, rng, n1, branch_prob, logprobs, n_e, 0, max_depth) {
        return false;
    }
    let segs = arena.segments_of(p);
    restore_signs(arena, &segs);
    true
}

/// Derived sampling parameters of an MPE ensemble defined by its weight
/// average mass and mean branch count: `(logprob, b_u)` for the
/// weight-averaged builder.
#[must_use]
pub fn mpe_wtav_params(m_w: f64, b_m: f64, mass_mono: f64) -> (f64, f64) {
    let mass = m_w / (2.0 * (b_m + 1.0));
    let mn_arm = mass / (2.0 * b_m + 1.0) / mass_mono;
    let logprob = (1.0 - 1.0 / mn_arm).ln();
    let b_u = b_m / (1.0 + 2.0 * b_m);
    (logprob, b_u)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::{ArenaLimits, PolyArena};
    use crate::massrg::mass_segs;
    use crate::relax::poly_start;
    use rand::SeedableRng;

    #[test]
    fn wtav_builder_produces_connected_molecules() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 100_000,
            max_poly: 512,
        });
        let mut rng = Pcg64::seed_from_u64(5150);
        let (logprob, b_u) = mpe_wtav_params(1.2e5, 0.6, 28.0);
        let mut made = 0;
        for _ in 0..200 {
            let p = arena.request_poly().unwrap();
            if polygen_wtav(&mut arena, &mut rng, p, WtavSeed::Mpe, logprob, b_u, 40.0, 500) {
                poly_start(&mut arena, p, 1.0);
                let segs = arena.segments_of(p);
                assert!(segs.len() >= 2);
                // every molecule is a tree: segments = 2 * branch points + 1,
                // except the linear case which carries the extra split seed
                let free = arena.free_ends_of(p).len();
                assert!(free >= 2);
                made += 1;
            } else {
                arena.return_poly(p);
            }
        }
        assert!(made > 150);
    }

    #[test]
    fn mpe_number_averaged_mass_scale() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 200_000,
            max_poly: 2_048,
        });
        let mut rng = Pcg64::seed_from_u64(99);
        // light branching: most molecules stay linear
        let (prop_prob, mono_prob) = (0.9995, 0.9998);
        let mut total = 0.0;
        let mut count = 0;
        for _ in 0..500 {
            let p = arena.request_poly().unwrap();
            if polygen_mpe(&mut arena, &mut rng, p, prop_prob, mono_prob, 40.0, 500) {
                poly_start(&mut arena, p, 1.0);
                total += mass_segs(&arena, arena.poly(p).first_end).0;
                count += 1;
            } else {
                arena.return_poly(p);
            }
        }
        assert!(count > 400);
        let mean = total / f64::from(count);
        assert!(mean > 0.0);
    }
}
