//! Fixed-architecture molecule builders: linears, stars, H molecules,
//! combs and Cayley trees.
//!
//! Builders wire the two-sided adjacency with unsigned indices and restore
//! the traversal signs in one pass at the end; callers run
//! [`crate::relax::poly_start`] afterwards (the gel and prototype builders
//! share these helpers).

use crate::arena::PolyArena;
use crate::topology::restore_signs;
use rand::Rng;
use rand_pcg::Pcg64;

/// Sets all four neighbor entries of segment `n` (unsigned, 0 = none).
pub fn attach_arm(arena: &mut PolyArena, n: i32, l1: i32, l2: i32, r1: i32, r2: i32) {
    let arm = arena.arm_mut(n);
    arm.l1 = l1;
    arm.l2 = l2;
    arm.r1 = r1;
    arm.r2 = r2;
}

/// `n` sorted junction positions uniform on `(0, length)`.
pub fn rand_on_line(rng: &mut Pcg64, length: f64, n: usize) -> Vec<f64> {
    let mut junc: Vec<f64> = (0..n).map(|_| rng.gen::<f64>() * length).collect();
    junc.sort_by(|a, b| a.partial_cmp(b).unwrap());
    junc
}

/// Two half-length segments joined end to end. Builders return `false`
/// when the arena runs dry; the caller discards the partial molecule.
pub fn polygen_lin(arena: &mut PolyArena, p: i32, seglen: f64) -> bool {
    let (Some(n1), Some(n2)) = (arena.request_arm(), arena.request_arm()) else {
        return false;
    };
    arena.poly_mut(p).first_end = n1;
    arena.arm_mut(n1).arm_len = 0.5 * seglen;
    arena.arm_mut(n2).arm_len = 0.5 * seglen;
    arena.arm_mut(n1).r1 = n2;
    arena.arm_mut(n2).l1 = n1;
    arena.armupdown(n1, n2);
    restore_signs(arena, &[n1, n2]);
    true
}

/// Three arms joined at one branch point; unequal lengths give the
/// asymmetric star.
pub fn polygen_star3(arena: &mut PolyArena, p: i32, lens: [f64; 3]) -> bool {
    let ids: Vec<i32> = (0..3).filter_map(|_| arena.request_arm()).collect();
    if ids.len() != 3 {
        return false;
    }
    let (n1, n2, n3) = (ids[0], ids[1], ids[2]);
    for (&m, &len) in ids.iter().zip(lens.iter()) {
        arena.arm_mut(m).arm_len = len;
    }
    arena.poly_mut(p).first_end = n1;
    attach_arm(arena, n1, 0, 0, n2, n3);
    attach_arm(arena, n2, n1, n3, 0, 0);
    attach_arm(arena, n3, n1, n2, 0, 0);
    arena.armupdown(n1, n2);
    arena.armupdown(n2, n3);
    restore_signs(arena, &ids);
    true
}

/// Two pairs of arms bridged by a crossbar; lengths in ring order
/// `[arm, arm, crossbar, arm, arm]`. A zero-length crossbar makes this the
/// four-arm star.
pub fn polygen_h(arena: &mut PolyArena, p: i32, lens: &[f64; 5]) -> bool {
    let ids: Vec<i32> = (0..5).filter_map(|_| arena.request_arm()).collect();
    if ids.len() != 5 {
        return false;
    }
    let (n1, n2, n3, n4, n5) = (ids[0], ids[1], ids[2], ids[3], ids[4]);
    for (&m, &len) in ids.iter().zip(lens.iter()) {
        arena.arm_mut(m).arm_len = len;
    }
    attach_arm(arena, n1, 0, 0, n2, n3);
    attach_arm(arena, n2, 0, 0, n1, n3);
    attach_arm(arena, n3, n1, n2, n4, n5);
    attach_arm(arena, n4, n3, n5, 0, 0);
    attach_arm(arena, n5, n3, n4, 0, 0);
    for w in ids.windows(2) {
        arena.armupdown(w[0], w[1]);
    }
    arena.poly_mut(p).first_end = n1;
    restore_signs(arena, &ids);
    true
}

/// Eighteen-arm star: a three-level zero-length scaffold with eighteen
/// drawn arms on the rim.
pub fn polygen_star18(arena: &mut PolyArena, p: i32, draw: &mut dyn FnMut() -> f64) -> bool {
    let nn: Vec<i32> = (0..33).filter_map(|_| arena.request_arm()).collect();
    if nn.len() != 33 {
        return false;
    }
    for &m in &nn {
        arena.arm_mut(m).arm_len = 0.0;
    }
    for &m in &nn[15..33] {
        arena.arm_mut(m).arm_len = draw();
    }
    for i in 1..32 {
        arena.arm_mut(nn[i]).down = nn[i - 1];
        arena.arm_mut(nn[i]).up = nn[i + 1];
    }
    arena.arm_mut(nn[0]).down = nn[32];
    arena.arm_mut(nn[0]).up = nn[1];
    arena.arm_mut(nn[32]).down = nn[31];
    arena.arm_mut(nn[32]).up = nn[0];
    arena.poly_mut(p).first_end = nn[0];

    let wire: [(usize, i32, i32, i32, i32); 33] = [
        (0, 3, 4, 1, 2),
        (1, 0, 2, 5, 6),
        (2, 0, 1, 7, 8),
        (3, 10, 9, 4, 0),
        (4, 11, 12, 3, 0),
        (5, 1, 6, 30, 13),
        (6, 1, 5, 15, 16),
        (7, 2, 8, 17, 18),
        (8, 2, 7, 20, 19),
        (9, 23, 14, 3, 10),
        (10, 25, 24, 3, 9),
        (11, 26, 27, 12, 4),
        (12, 28, 29, 11, 4),
        (13, 30, 5, 31, 32),
        (14, 22, 21, 9, 23),
        (15, 6, 16, -1, -1),
        (16, 6, 15, -1, -1),
        (17, 7, 18, -1, -1),
        (18, 7, 17, -1, -1),
        (19, 8, 20, -1, -1),
        (20, 8, 19, -1, -1),
        (21, -1, -1, 14, 22),
        (22, -1, -1, 14, 21),
        (23, -1, -1, 9, 14),
        (24, -1, -1, 25, 10),
        (25, -1, -1, 24, 10),
        (26, -1, -1, 27, 11),
        (27, -1, -1, 26, 11),
        (28, -1, -1, 12, 29),
        (29, -1, -1, 28, 12),
        (30, 5, 13, -1, -1),
        (31, 13, 32, -1, -1),
        (32, 31, 13, -1, -1),
    ];
    let id = |j: i32| if j < 0 { 0 } else { nn[j as usize] };
    for &(i, l1, l2, r1, r2) in &wire {
        attach_arm(arena, nn[i], id(l1), id(l2), id(r1), id(r2));
    }
    restore_signs(arena, &nn);
    true
}

/// Functionality of the Cayley-tree core.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CayleyCore {
    /// Three arms around a single branch point.
    Three,
    /// Four arms around a central crossbar.
    Four,
}

/// Cayley tree: starts from a star or H core and, for each level, splits
/// every free end into two new arms drawn from `draw(level)`.
pub fn polygen_cayley(
    arena: &mut PolyArena,
    p: i32,
    core: CayleyCore,
    levels: usize,
    draw: &mut dyn FnMut(usize) -> f64,
) -> bool {
    let core_ok = match core {
        CayleyCore::Three => {
            let lens = [draw(0), draw(0), draw(0)];
            polygen_star3(arena, p, lens)
        }
        CayleyCore::Four => {
            let lens = [draw(0), draw(0), 0.0, draw(0), draw(0)];
            polygen_h(arena, p, &lens)
        }
    };
    if !core_ok {
        return false;
    }
    crate::relax::poly_start(arena, p, 1.0);

    for level in 1..=levels {
        let free_ends = arena.free_ends_of(p);
        for n2 in free_ends {
            let (Some(m1), Some(m2)) = (arena.request_arm(), arena.request_arm()) else {
                return false;
            };
            let k1 = arena.poly(p).first_end;
            let k2 = arena.arm(k1).down;
            arena.arm_mut(k1).down = m1;
            arena.arm_mut(m1).up = k1;
            arena.arm_mut(m1).down = m2;
            arena.arm_mut(m2).up = m1;
            arena.arm_mut(m2).down = k2;
            arena.arm_mut(k2).up = m2;

            arena.arm_mut(m1).arm_len = draw(level);
            arena.arm_mut(m2).arm_len = draw(level);
            let left_free = {
                let arm = arena.arm(n2);
                arm.l1 == 0 && arm.l2 == 0
            };
            if left_free {
                let arm = arena.arm_mut(n2);
                arm.l1 = m1;
                arm.l2 = m2;
                attach_arm(arena, m1, 0, 0, n2, m2);
                attach_arm(arena, m2, 0, 0, m1, n2);
            } else {
                let arm = arena.arm_mut(n2);
                arm.r1 = m1;
                arm.r2 = m2;
                attach_arm(arena, m1, n2, m2, 0, 0);
                attach_arm(arena, m2, m1, n2, 0, 0);
            }
        }
        let segs = arena.segments_of(p);
        restore_signs(arena, &segs);
        crate::relax::poly_start(arena, p, 1.0);
    }
    let segs = arena.segments_of(p);
    restore_signs(arena, &segs);
    true
}

/// Comb with `n_arm` side arms grafted at sorted random positions along the
/// backbone. `draw_arm` supplies side-arm lengths.
pub fn polygen_comb_fxd(
    arena: &mut PolyArena,
    p: i32,
    rng: &mut Pcg64,
    bbone_len: f64,
    n_arm: usize,
    draw_arm: &mut dyn FnMut(&mut Pcg64) -> f64,
) -> bool {
    if n_arm == 0 {
        return polygen_lin(arena, p, bbone_len);
    }
    let junc = rand_on_line(rng, bbone_len, n_arm);

    let (Some(mut n0), Some(mut n1)) = (arena.request_arm(), arena.request_arm()) else {
        return false;
    };
    arena.poly_mut(p).first_end = n0;
    arena.arm_mut(n0).arm_len = junc[0];
    arena.arm_mut(n1).arm_len = draw_arm(rng);
    arena.arm_mut(n1).r1 = n0;
    arena.arm_mut(n0).r1 = n1;
    arena.armupdown(n0, n1);
    let mut ids = vec![n0, n1];

    for k in 1..n_arm {
        let (Some(n0p), Some(n1p)) = (arena.request_arm(), arena.request_arm()) else {
            return false;
        };
        attach_arm(arena, n0p, n0, n1, 0, 0);
        arena.arm_mut(n0).r2 = n0p;
        arena.arm_mut(n1).r2 = n0p;
        arena.arm_mut(n0p).arm_len = junc[k] - junc[k - 1];
        arena.arm_mut(n1p).r1 = n0p;
        arena.arm_mut(n0p).r1 = n1p;
        arena.arm_mut(n1p).arm_len = draw_arm(rng);
        arena.armupdown(n0, n0p);
        arena.armupdown(n0p, n1p);
        ids.push(n0p);
        ids.push(n1p);
        n0 = n0p;
        n1 = n1p;
    }

    let Some(tail) = arena.request_arm() else {
        return false;
    };
    attach_arm(arena, tail, n0, n1, 0, 0);
    arena.arm_mut(n0).r2 = tail;
    arena.arm_mut(n1).r2 = tail;
    arena.arm_mut(tail).arm_len = bbone_len - junc[n_arm - 1];
    arena.armupdown(n0, tail);
    ids.push(tail);
    restore_signs(arena, &ids);
    true
}

/// Two combs joined through one of the first comb's side arms, which shrinks
/// to a short coupling segment carrying the second backbone.
#[allow(clippy::too_many_arguments)]
pub fn polygen_coupled_comb(
    arena: &mut PolyArena,
    p: i32,
    rng: &mut Pcg64,
    draw_bbone: &mut dyn FnMut(&mut Pcg64) -> f64,
    n_arm_mean: f64,
    draw_arm: &mut dyn FnMut(&mut Pcg64) -> f64,
) -> bool {
    use rand_distr::{Distribution, Poisson};

    let draw_count = |rng: &mut Pcg64| -> usize {
        let dn = Poisson::new(n_arm_mean.max(1.0e-9)).map_or(0.0, |d| d.sample(rng)) + 0.2;
        let mut n = dn.floor() as usize;
        if dn - n as f64 > 0.5 {
            n += 1;
        }
        n + 1
    };

    let n_arm = draw_count(rng);
    let bbone = draw_bbone(rng);
    if !polygen_comb_fxd(arena, p, rng, bbone, n_arm, draw_arm) {
        return false;
    }
    crate::relax::poly_start(arena, p, 1.0);

    // pick a side arm of the first comb as the coupling point
    let free_ends = arena.free_ends_of(p);
    let interior: Vec<i32> = free_ends
        .iter()
        .copied()
        .filter(|&m| {
            let arm = arena.arm(m);
            // side arms hang off their R side in the comb wiring
            arm.l1 == 0 && arm.l2 == 0 && arm.r1 != 0
        })
        .collect();
    let Some(&store) = interior.first() else {
        return true;
    };

    arena.arm_mut(store).arm_len = 1.0e-3;
    let n_arm1 = draw_count(rng);
    let bbone1 = draw_bbone(rng);
    let junc = rand_on_line(rng, bbone1, n_arm1);
    let couple = rng.gen_range(0..n_arm1);

    // the two halves of the second backbone meeting at the coupling point
    let (Some(n0p), Some(n1p)) = (arena.request_arm(), arena.request_arm()) else {
        return false;
    };
    {
        let arm = arena.arm_mut(store);
        arm.l1 = n0p;
        arm.l2 = n1p;
    }
    attach_arm(arena, n0p, 0, 0, store, n1p);
    attach_arm(arena, n1p, 0, 0, store, n0p);
    arena.arm_mut(n0p).arm_len = if couple == 0 {
        junc[0]
    } else {
        junc[couple] - junc[couple - 1]
    };
    arena.arm_mut(n1p).arm_len = if couple == n_arm1 - 1 {
        bbone1 - junc[n_arm1 - 1]
    } else {
        junc[couple + 1] - junc[couple]
    };
    arena.armupdown(store, n0p);
    arena.armupdown(n0p, n1p);

    // grow the remaining junctions of the second comb outward on both sides
    let mut grow_side = |arena: &mut PolyArena, start: i32, seg_lens: Vec<f64>| -> bool {
        let mut n0 = start;
        for len in seg_lens {
            let (Some(side), Some(next)) = (arena.request_arm(), arena.request_arm()) else {
                return false;
            };
            arena.arm_mut(side).arm_len = draw_arm(rng);
            arena.arm_mut(next).arm_len = len;
            // the far face of n0 was free; it now carries the side arm and
            // the continuation
            let left_free = {
                let arm = arena.arm(n0);
                arm.l1 == 0 && arm.l2 == 0
            };
            if left_free {
                let arm = arena.arm_mut(n0);
                arm.l1 = side;
                arm.l2 = next;
                attach_arm(arena, side, 0, 0, n0, next);
                attach_arm(arena, next, 0, 0, n0, side);
            } else {
                let arm = arena.arm_mut(n0);
                arm.r1 = side;
                arm.r2 = next;
                attach_arm(arena, side, n0, next, 0, 0);
                attach_arm(arena, next, n0, side, 0, 0);
            }
            arena.armupdown(n0, side);
            arena.armupdown(side, next);
            n0 = next;
        }
        true
    };

    let left_lens: Vec<f64> = (0..couple)
        .rev()
        .map(|k| {
            if k == 0 {
                junc[0]
            } else {
                junc[k] - junc[k - 1]
            }
        })
        .collect();
    let right_lens: Vec<f64> = (couple + 1..n_arm1)
        .map(|k| {
            if k == n_arm1 - 1 {
                bbone1 - junc[n_arm1 - 1]
            } else {
                junc[k + 1] - junc[k]
            }
        })
        .collect();
    let ok = grow_side(arena, n0p, left_lens) && grow_side(arena, n1p, right_lens);

    let segs = arena.segments_of(p);
    restore_signs(arena, &segs);
    ok
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::{ArenaLimits, PolyArena};
    use crate::massrg::{mass_rg2, mass_segs};
    use crate::relax::poly_start;
    use float_cmp::assert_approx_eq;
    use rand::SeedableRng;

    fn arena() -> PolyArena {
        PolyArena::new(ArenaLimits {
            max_arm: 512,
            max_poly: 8,
        })
    }

    #[test]
    fn h_polymer_g_factor() {
        let mut arena = arena();
        let p = arena.request_poly().unwrap();
        assert!(polygen_h(&mut arena, p, &[25.0, 25.0, 50.0, 25.0, 25.0]));
        poly_start(&mut arena, p, 1.0);
        let first = arena.poly(p).first_end;
        let (len, _, g) = mass_rg2(&arena, first);
        assert_approx_eq!(f64, len, 150.0);
        // an H with arm fraction 1/6 per arm contracts to g just over 0.7
        assert!(g > 0.7 && g < 0.8, "g = {g}");
    }

    #[test]
    fn star18_has_eighteen_free_ends() {
        let mut arena = arena();
        let p = arena.request_poly().unwrap();
        let mut k = 0.0;
        assert!(polygen_star18(&mut arena, p, &mut || {
            k += 1.0;
            10.0 + k
        }));
        poly_start(&mut arena, p, 1.0);
        assert_eq!(arena.free_ends_of(p).len(), 18);
        let (len, nseg) = mass_segs(&arena, arena.poly(p).first_end);
        assert_eq!(nseg, 33);
        let expect: f64 = (1..=18).map(|i| 10.0 + f64::from(i)).sum();
        assert_approx_eq!(f64, len, expect);
    }

    #[test]
    fn cayley_doubles_free_ends_per_level() {
        let mut arena = arena();
        let p = arena.request_poly().unwrap();
        assert!(polygen_cayley(&mut arena, p, CayleyCore::Three, 2, &mut |_| 5.0));
        poly_start(&mut arena, p, 1.0);
        // 3 ends -> 6 -> 12
        assert_eq!(arena.free_ends_of(p).len(), 12);
        let (_, nseg) = mass_segs(&arena, arena.poly(p).first_end);
        assert_eq!(nseg, 3 + 6 + 12);
    }

    #[test]
    fn comb_mass_accounts_for_backbone_and_arms() {
        let mut arena = arena();
        let mut rng = Pcg64::seed_from_u64(7);
        let p = arena.request_poly().unwrap();
        assert!(polygen_comb_fxd(&mut arena, p, &mut rng, 100.0, 4, &mut |_| 10.0));
        poly_start(&mut arena, p, 1.0);
        let (len, nseg) = mass_segs(&arena, arena.poly(p).first_end);
        // backbone split into 5 segments plus 4 side arms
        assert_eq!(nseg, 9);
        assert_approx_eq!(f64, len, 140.0, epsilon = 1.0e-9);
        assert_eq!(arena.free_ends_of(p).len(), 6);
    }
}
