//! Molecular mass and radius-of-gyration moments.

use crate::arena::PolyArena;

/// Walks the segment ring starting at `first` and returns the total length
/// and the number of segments.
#[must_use]
pub fn mass_segs(arena: &PolyArena, first: i32) -> (f64, usize) {
    let mut lentot = arena.arm(first).arm_len;
    let mut segtot = 1;
    let mut next = arena.arm(first).down;
    while next != first {
        lentot += arena.arm(next).arm_len;
        segtot += 1;
        next = arena.arm(next).down;
    }
    (lentot, segtot)
}

/// Directed subtree moments: total length, mean height `h` of a monomer
/// above the subtree root, and the normalized second moment `j`. The sign
/// of `m` selects which side of `|m|` the recursion continues on; `m == 0`
/// contributes nothing.
#[must_use]
pub fn mass_rg1(arena: &PolyArena, m: i32) -> (f64, f64, f64) {
    if m == 0 {
        return (0.0, 0.0, 0.0);
    }
    let mc = m.abs();
    let (m1, m2) = {
        let arm = arena.arm(mc);
        if m > 0 {
            (arm.r1, arm.r2)
        } else {
            (arm.l1, arm.l2)
        }
    };
    let (len1, h1, j1) = mass_rg1(arena, m1);
    let (len2, h2, j2) = mass_rg1(arena, m2);
    let lenc = arena.arm(mc).arm_len;
    let hc = lenc / 2.0;
    let jc = lenc / 3.0;
    let lentot = lenc + len1 + len2;
    let htot = (lenc * hc + lenc * (len1 + len2) + len1 * h1 + len2 * h2) / lentot;
    let jtot = (lenc * lenc * jc
        + len1 * len1 * j1
        + len2 * len2 * j2
        + 2.0 * (len1 * len2 * (h1 + h2) + len1 * lenc * (h1 + hc) + len2 * lenc * (h2 + hc)))
        / (lentot * lentot);
    (lentot, htot, jtot)
}

/// Combines the subtrees hanging off segment `|m|` into the molecule's total
/// length, second moment and g-factor (`g = 3 J / L`, 1 for a linear chain).
#[must_use]
pub fn mass_rg2(arena: &PolyArena, m: i32) -> (f64, f64, f64) {
    if m == 0 {
        return (0.0, 0.0, 0.0);
    }
    let mc = m.abs();
    let (l1, l2) = {
        let arm = arena.arm(mc);
        (arm.l1, arm.l2)
    };
    let (len1, h1, j1) = mass_rg1(arena, l1);
    let (len2, h2, j2) = mass_rg1(arena, l2);
    let (lenc, hc, jc) = mass_rg1(arena, mc);
    let lentot = lenc + len1 + len2;
    let jtot = (lenc * lenc * jc
        + len1 * len1 * j1
        + len2 * len2 * j2
        + 2.0 * (len1 * len2 * (h1 + h2) + len1 * lenc * (h1 + hc) + len2 * lenc * (h2 + hc)))
        / (lentot * lentot);
    let gfact = 3.0 * jtot / lentot;
    (lentot, jtot, gfact)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::{ArenaLimits, PolyArena};
    use float_cmp::assert_approx_eq;

    fn arena() -> PolyArena {
        PolyArena::new(ArenaLimits {
            max_arm: 64,
            max_poly: 4,
        })
    }

    fn wire_linear(arena: &mut PolyArena, len: f64) -> i32 {
        let a = arena.request_arm().unwrap();
        let b = arena.request_arm().unwrap();
        arena.arm_mut(a).arm_len = 0.5 * len;
        arena.arm_mut(b).arm_len = 0.5 * len;
        arena.arm_mut(a).r1 = b;
        arena.arm_mut(b).l1 = -a;
        arena.armupdown(a, b);
        a
    }

    #[test]
    fn linear_g_is_one() {
        let mut arena = arena();
        let first = wire_linear(&mut arena, 50.0);
        let (len, _, g) = mass_rg2(&arena, first);
        assert_approx_eq!(f64, len, 50.0);
        assert_approx_eq!(f64, g, 1.0, epsilon = 1.0e-12);
    }

    #[test]
    fn symmetric_star_g() {
        // three equal arms joined at one branch point
        let mut arena = arena();
        let a = arena.request_arm().unwrap();
        let b = arena.request_arm().unwrap();
        let c = arena.request_arm().unwrap();
        for &m in &[a, b, c] {
            arena.arm_mut(m).arm_len = 10.0;
        }
        arena.arm_mut(a).r1 = b;
        arena.arm_mut(a).r2 = c;
        arena.arm_mut(b).l1 = a;
        arena.arm_mut(b).l2 = c;
        arena.arm_mut(c).l1 = a;
        arena.arm_mut(c).l2 = b;
        crate::topology::restore_signs(&mut arena, &[a, b, c]);
        arena.armupdown(a, b);
        arena.armupdown(b, c);

        let (len, _, g) = mass_rg2(&arena, a);
        assert_approx_eq!(f64, len, 30.0);
        // g = (3f - 2) / f^2 for a symmetric f-arm star
        assert_approx_eq!(f64, g, 7.0 / 9.0, epsilon = 1.0e-12);
    }

    #[test]
    fn mass_segs_counts_ring() {
        let mut arena = arena();
        let first = wire_linear(&mut arena, 12.0);
        let (len, nseg) = mass_segs(&arena, first);
        assert_approx_eq!(f64, len, 12.0);
        assert_eq!(nseg, 2);
    }
}
