//! Relaxation state initialization and helpers shared by the retraction,
//! extension and reptation kernels.

use crate::arena::PolyArena;
use crate::context::{PI_POW_5, TINY};

/// Sets up the relaxation fields of segment `n`. Free-ended segments start
/// retracting at `z = 0` with the Rouse prefactor built from `phi_init`.
pub fn arm_start(arena: &mut PolyArena, n: i32, phi_init: f64) {
    let free = arena.arm(n).has_free_end();
    let (l1, l2, r1, r2, arm_len) = {
        let arm = arena.arm(n);
        (arm.l1, arm.l2, arm.r1, arm.r2, arm.arm_len)
    };
    let arm = arena.arm_mut(n);
    arm.prune = false;
    arm.ghost = false;
    arm.collapsed = false;
    arm.nxt_relax = 0;
    arm.phi_collapse = -1.0;
    if free {
        arm.free_end = true;
        arm.relaxing = true;
        arm.relax_end = n;
        arm.compound = false;
        arm.z = 0.0;
        arm.pot = 0.0;
        arm.gamma2 = (1.5 * PI_POW_5 * arm_len.powi(3) / phi_init).sqrt();
        arm.tau_k = 0.0;
        arm.dz = 0.0;
        arm.arm_len_eff = arm_len;
        arm.arm_len_end = arm_len;
        arm.deltazeff = 0.0;
        arm.zeff_numer = 0.0;
        arm.zeff_denom = 0.0;
        arm.extra_drag = 0.0;
        arm.next_friction = 0;
        if l1 == 0 && l2 == 0 {
            arm.nxtbranch1 = r1.abs();
            arm.nxtbranch2 = r2.abs();
        } else {
            arm.nxtbranch1 = l1.abs();
            arm.nxtbranch2 = l2.abs();
        }
    } else {
        arm.free_end = false;
        arm.relaxing = false;
        arm.relax_end = 0;
    }
}

/// Prepares a freshly wired polymer for relaxation: initializes every
/// segment, tags linears, freezes the effective reach on stars and linears
/// and builds the free-end ring. Running it twice leaves the state
/// unchanged.
pub fn poly_start(arena: &mut PolyArena, p: i32, phi_init: f64) {
    {
        let poly = arena.poly_mut(p);
        poly.alive = true;
        poly.relaxed_frac = 0.0;
        poly.rept_set = false;
        poly.ghost_contrib = 0.0;
    }
    let segs = arena.segments_of(p);
    for &m in &segs {
        arm_start(arena, m, phi_init);
    }
    let num_seg = segs.len();
    {
        let poly = arena.poly_mut(p);
        poly.num_branch = num_seg as i32;
        poly.linear_tag = num_seg == 2;
    }
    if num_seg <= 3 {
        for &m in &segs {
            arena.arm_mut(m).freeze_arm_len_eff = true;
        }
    }

    let mut first_free = 0;
    for &m in &segs {
        if !arena.arm(m).free_end {
            continue;
        }
        if first_free == 0 {
            first_free = m;
            let arm = arena.arm_mut(m);
            arm.free_up = m;
            arm.free_down = m;
        } else {
            let n4 = arena.arm(first_free).free_up;
            arena.arm_mut(first_free).free_up = m;
            {
                let arm = arena.arm_mut(m);
                arm.free_down = first_free;
                arm.free_up = n4;
            }
            arena.arm_mut(n4).free_down = m;
        }
    }
    arena.poly_mut(p).first_free = first_free;
}

/// Adds the weight carried by the (possibly compound) arm `n` to the
/// relaxed fraction of polymer `m`.
pub fn sv_mass(arena: &mut PolyArena, m: i32, n: i32) {
    let mut frac = arena.arm(n).vol_fraction;
    let mut nnxt = arena.arm(n).nxt_relax;
    while nnxt != 0 {
        frac += arena.arm(nnxt).vol_fraction;
        nnxt = arena.arm(nnxt).nxt_relax;
    }
    arena.poly_mut(m).relaxed_frac += frac;
}

/// Weight fraction already relaxed by the free (possibly compound) arm `n`.
#[must_use]
pub fn free_arm_relax_amount(arena: &PolyArena, n: i32) -> f64 {
    let mut relax_amount = 0.0;
    let mut n0 = n;
    let mut dz = arena.arm(n0).z;
    while dz > TINY {
        let arm = arena.arm(n0);
        if dz > arm.arm_len {
            relax_amount += arm.vol_fraction;
            dz -= arm.arm_len;
            n0 = arm.nxt_relax;
        } else {
            relax_amount += arm.vol_fraction * dz / arm.arm_len;
            n0 = 0;
        }
        if n0 == 0 {
            break;
        }
    }
    relax_amount
}

/// Innermost segment of the compound arm anchored at `n`.
#[must_use]
pub fn inner_arm_compound(arena: &PolyArena, n: i32) -> i32 {
    let mut nsv = n;
    let mut nnxt = arena.arm(n).nxt_relax;
    while nnxt != 0 {
        nsv = nnxt;
        nnxt = arena.arm(nsv).nxt_relax;
    }
    nsv
}

/// Effective friction of compound arm `n`: every collapsed donor weighted by
/// how much of the effective reach lies inward of its attachment point.
#[must_use]
pub fn calc_eff_fric(arena: &PolyArena, n: i32, alpha: f64) -> f64 {
    let zeff = arena.arm(n).arm_len_eff;
    let mut zouter = arena.arm(n).arm_len;
    let mut n1 = arena.arm(n).next_friction;
    let mut n2 = arena.arm(n).nxt_relax;
    let mut drag = 0.0;
    while n1 != 0 {
        let donor = arena.arm(n1);
        drag += donor.tau_collapse * donor.phi_collapse.powf(2.0 * alpha) * (zeff - zouter) / zeff;
        zouter += arena.arm(n2).arm_len;
        n2 = arena.arm(n2).nxt_relax;
        n1 = arena.arm(n1).next_friction;
    }
    drag
}

/// Continuous positive root of `a·x² + b·x + c = 0`, the branch that tends
/// to `-c/b` as `a` vanishes. Degenerate or root-free inputs collapse to the
/// linear solution clamped at zero.
#[must_use]
pub fn quad_solve_spl(a: f64, b: f64, c: f64) -> f64 {
    let linear = || {
        if b.abs() < TINY {
            0.0
        } else {
            (-c / b).max(0.0)
        }
    };
    if a.abs() < TINY {
        return linear();
    }
    let disc = b.mul_add(b, -4.0 * a * c);
    if disc < 0.0 {
        return linear();
    }
    ((-b + disc.sqrt()) / (2.0 * a)).max(0.0)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::{ArenaLimits, PolyArena};
    use crate::templates::{polygen_h, polygen_lin};
    use float_cmp::assert_approx_eq;

    #[test]
    fn quad_solver_branches() {
        // plain quadratic: x^2 + x - 2 = 0 has the positive root 1
        assert_approx_eq!(f64, quad_solve_spl(1.0, 1.0, -2.0), 1.0);
        // degenerate to linear
        assert_approx_eq!(f64, quad_solve_spl(0.0, 2.0, -3.0), 1.5);
        // the continuous branch survives a < 0
        let root = quad_solve_spl(-1.0e-3, 1.0, -0.5);
        assert!((root - 0.5).abs() < 1.0e-2);
    }

    #[test]
    fn poly_start_builds_free_ring() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 16,
            max_poly: 2,
        });
        let p = arena.request_poly().unwrap();
        assert!(polygen_h(&mut arena, p, &[5.0, 5.0, 10.0, 5.0, 5.0]));
        poly_start(&mut arena, p, 1.0);

        let free = arena.free_ends_of(p);
        assert_eq!(free.len(), 4);
        for &m in &free {
            let arm = arena.arm(m);
            assert!(arm.free_end);
            assert!(arm.relaxing);
            assert_eq!(arm.relax_end, m);
            assert_approx_eq!(f64, arm.z, 0.0);
        }
        // crossbar is not free and not frozen (5 segments)
        let segs = arena.segments_of(p);
        assert!(!arena.arm(segs[2]).free_end);
        assert!(!arena.arm(segs[2]).freeze_arm_len_eff);
    }

    #[test]
    fn poly_start_is_idempotent() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 16,
            max_poly: 2,
        });
        let p = arena.request_poly().unwrap();
        assert!(polygen_lin(&mut arena, p, 20.0));
        poly_start(&mut arena, p, 1.0);
        let snapshot: Vec<_> = arena
            .segments_of(p)
            .iter()
            .map(|&m| {
                let arm = arena.arm(m);
                (
                    arm.z.to_bits(),
                    arm.gamma2.to_bits(),
                    arm.free_up,
                    arm.free_down,
                    arm.relax_end,
                )
            })
            .collect();
        poly_start(&mut arena, p, 1.0);
        let again: Vec<_> = arena
            .segments_of(p)
            .iter()
            .map(|&m| {
                let arm = arena.arm(m);
                (
                    arm.z.to_bits(),
                    arm.gamma2.to_bits(),
                    arm.free_up,
                    arm.free_down,
                    arm.relax_end,
                )
            })
            .collect();
        assert_eq!(snapshot, again);
    }

    #[test]
    fn linear_is_tagged_and_frozen() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 8,
            max_poly: 2,
        });
        let p = arena.request_poly().unwrap();
        assert!(polygen_lin(&mut arena, p, 20.0));
        poly_start(&mut arena, p, 1.0);
        assert!(arena.poly(p).linear_tag);
        for m in arena.segments_of(p) {
            assert!(arena.arm(m).freeze_arm_len_eff);
        }
    }
}
