//! Gelation ensembles below the gel point.
//!
//! The star-gel grower iterates over free ends, extending each one with
//! probability `p` per reaction extent and budding two new arms at the new
//! branch point. The weight-averaged variant reuses the recursive builder
//! of the MPE module with equal branching on both sides of the seed.

use crate::arena::PolyArena;
use crate::lengths::flory_distb;
use crate::mpe::{polygen_wtav, WtavSeed};
use crate::templates::attach_arm;
use crate::topology::restore_signs;
use rand::Rng;
use rand_pcg::Pcg64;

fn stargel_internal(
    arena: &mut PolyArena,
    rng: &mut Pcg64,
    p_react: f64,
    logprob: f64,
    n_e: f64,
    n0: i32,
    depth: usize,
    max_depth: usize,
) -> bool {
    if depth > max_depth {
        return true;
    }
    if rng.gen::<f64>() >= p_react {
        return true;
    }
    let (Some(n1), Some(n2)) = (arena.request_arm(), arena.request_arm()) else {
        return false;
    };
    arena.arm_mut(n1).arm_len = flory_distb(rng, logprob) / n_e;
    arena.arm_mut(n2).arm_len = flory_distb(rng, logprob) / n_e;
    // the reacted end keeps growing: its segment gains another strand
    let extra = flory_distb(rng, logprob) / n_e;
    arena.arm_mut(n0).arm_len += extra;

    arena.armupdown(n0, n1);
    arena.armupdown(n1, n2);

    let left_free = {
        let arm = arena.arm(n0);
        arm.l1 == 0 && arm.l2 == 0
    };
    if left_free {
        {
            let arm = arena.arm_mut(n0);
            arm.l1 = n1;
            arm.l2 = n2;
        }
        attach_arm(arena, n1, 0, 0, n0, n2);
        attach_arm(arena, n2, 0, 0, n0, n1);
    } else {
        {
            let arm = arena.arm_mut(n0);
            arm.r1 = n1;
            arm.r2 = n2;
        }
        attach_arm(arena, n1, n0, n2, 0, 0);
        attach_arm(arena, n2, n0, n1, 0, 0);
    }

    stargel_internal(arena, rng, p_react, logprob, n_e, n1, depth + 1, max_depth)
        && stargel_internal(arena, rng, p_react, logprob, n_e, n2, depth + 1, max_depth)
}

/// Star-gel molecule: a three-arm star whose free ends keep reacting with
/// extent `p_react` until depletion or the depth cap.
pub fn polygen_stargel(
    arena: &mut PolyArena,
    rng: &mut Pcg64,
    p: i32,
    p_react: f64,
    mn_arm: f64,
    n_e: f64,
    max_depth: usize,
) -> bool {
    let logprob = (1.0 - 1.0 / mn_arm).ln();
    let ids: Vec<i32> = (0..3).filter_map(|_| arena.request_arm()).collect();
    if ids.len() != 3 {
        return false;
    }
    let (n1, n2, n3) = (ids[0], ids[1], ids[2]);
    for &m in &ids {
        arena.arm_mut(m).arm_len = flory_distb(rng, logprob) / n_e;
    }
    arena.poly_mut(p).first_end = n1;
    attach_arm(arena, n1, 0, 0, n2, n3);
    attach_arm(arena, n2, n1, n3, 0, 0);
    attach_arm(arena, n3, n1, n2, 0, 0);
    arena.armupdown(n1, n2);
    arena.armupdown(n2, n3);

    for m in [n1, n2, n3] {
        if !stargel_internal(arena, rng, p_react, logprob, n_e, m, 0, max_depth) {
            return false;
        }
    }
    let segs = arena.segments_of(p);
    restore_signs(arena, &segs);
    true
}

/// Weight-averaged gelation molecule with segment length `mn_arm` (monomer
/// counts) and branching probability `b_u` per segment end.
pub fn polygen_gel_wtav(
    arena: &mut PolyArena,
    rng: &mut Pcg64,
    p: i32,
    mn_arm: f64,
    b_u: f64,
    n_e: f64,
    max_depth: usize,
) -> bool {
    let logprob = (1.0 - 1.0 / mn_arm).ln();
    polygen_wtav(arena, rng, p, WtavSeed::Gel, logprob, b_u, n_e, max_depth)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::{ArenaLimits, PolyArena};
    use crate::massrg::mass_segs;
    use crate::relax::poly_start;
    use rand::SeedableRng;

    #[test]
    fn stargel_grows_trees_below_gel_point() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 200_000,
            max_poly: 1_024,
        });
        let mut rng = Pcg64::seed_from_u64(314);
        let mut sizes = Vec::new();
        for _ in 0..300 {
            let p = arena.request_poly().unwrap();
            if polygen_stargel(&mut arena, &mut rng, p, 0.35, 600.0, 40.0, 2000) {
                poly_start(&mut arena, p, 1.0);
                let (len, nseg) = mass_segs(&arena, arena.poly(p).first_end);
                assert!(len > 0.0);
                // odd segment count: a tree built from 3 arms plus pairs
                assert_eq!(nseg % 2, 1);
                sizes.push(nseg);
            } else {
                arena.return_poly(p);
            }
        }
        assert!(!sizes.is_empty());
        // the reaction extent produces a spread of molecule sizes
        assert!(sizes.iter().any(|&n| n > 3));
        assert!(sizes.iter().any(|&n| n == 3));
    }

    #[test]
    fn gel_wtav_produces_molecules() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 100_000,
            max_poly: 512,
        });
        let mut rng = Pcg64::seed_from_u64(1618);
        let mut made = 0;
        for _ in 0..100 {
            let p = arena.request_poly().unwrap();
            if polygen_gel_wtav(&mut arena, &mut rng, p, 500.0, 0.2, 40.0, 2000) {
                poly_start(&mut arena, p, 1.0);
                made += 1;
            } else {
                arena.return_poly(p);
            }
        }
        assert!(made > 80);
    }
}
