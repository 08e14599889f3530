//! Graph traversal and cleanup primitives.
//!
//! Neighbor entries are signed: stepping across an entry `e` lands on
//! segment `|e|` and continues on its R side when `e > 0`, on its L side
//! when `e < 0`.

use crate::arena::PolyArena;

/// Maps a file-local segment index onto its arena index. Non-negative
/// entries index into `ids`, the arena indices of the polymer's segments in
/// file order; negative entries mean "free" and map to 0.
#[must_use]
pub fn fold_rd(i: i32, ids: &[i32]) -> i32 {
    if i >= 0 {
        ids[i as usize]
    } else {
        0
    }
}

/// Rebuilds the traversal signs of every neighbor entry of the segments in
/// `ids` from the two-sided adjacency alone. An entry at `s` pointing to `n`
/// is positive exactly when `s` sits on the L side of `n`.
pub fn restore_signs(arena: &mut PolyArena, ids: &[i32]) {
    for &s in ids {
        let (l1, l2, r1, r2) = {
            let arm = arena.arm(s);
            (arm.l1, arm.l2, arm.r1, arm.r2)
        };
        let sign_of = |arena: &PolyArena, e: i32| -> i32 {
            if e == 0 {
                return 0;
            }
            let n = arena.arm(e);
            if n.l1.abs() == s || n.l2.abs() == s {
                e.abs()
            } else {
                -e.abs()
            }
        };
        let signed = (
            sign_of(arena, l1),
            sign_of(arena, l2),
            sign_of(arena, r1),
            sign_of(arena, r2),
        );
        let arm = arena.arm_mut(s);
        arm.l1 = signed.0;
        arm.l2 = signed.1;
        arm.r1 = signed.2;
        arm.r2 = signed.3;
    }
}

/// Clears the scratch flag on every segment of polymer `n`.
pub fn unset_tmpflag(arena: &mut PolyArena, n: i32) {
    for m in arena.segments_of(n) {
        arena.arm_mut(m).tmpflag = false;
    }
}

fn tmpflag_travel(arena: &mut PolyArena, start: i32) {
    let mut stack = vec![start];
    while let Some(m) = stack.pop() {
        arena.arm_mut(m).tmpflag = true;
        let (l1, l2, r1, r2) = {
            let arm = arena.arm(m);
            (arm.l1.abs(), arm.l2.abs(), arm.r1.abs(), arm.r2.abs())
        };
        for next in [l1, l2, r1, r2] {
            if next != 0 && !arena.arm(next).tmpflag {
                stack.push(next);
            }
        }
    }
}

/// Flags every segment of polymer `n` reachable from the L side of segment
/// `na` without crossing `na` itself. `na` ends up unflagged.
pub fn set_tmpflag_left(arena: &mut PolyArena, n: i32, na: i32) {
    unset_tmpflag(arena, n);
    arena.arm_mut(na).tmpflag = true;
    let (l1, l2) = {
        let arm = arena.arm(na);
        (arm.l1.abs(), arm.l2.abs())
    };
    for m in [l1, l2] {
        if m != 0 {
            tmpflag_travel(arena, m);
        }
    }
    arena.arm_mut(na).tmpflag = false;
}

/// Flags every segment reachable from the R side of `na` without crossing it.
pub fn set_tmpflag_right(arena: &mut PolyArena, n: i32, na: i32) {
    unset_tmpflag(arena, n);
    arena.arm_mut(na).tmpflag = true;
    let (r1, r2) = {
        let arm = arena.arm(na);
        (arm.r1.abs(), arm.r2.abs())
    };
    for m in [r1, r2] {
        if m != 0 {
            tmpflag_travel(arena, m);
        }
    }
    arena.arm_mut(na).tmpflag = false;
}

/// Removes redundant segments from polymer `n`: any segment whose L or R
/// face holds exactly one neighbor is merged into that neighbor, summing
/// lengths and re-wiring the links. Runs over both directions from
/// `first_end`.
pub fn polyclean(arena: &mut PolyArena, n: i32) {
    let first = arena.poly(n).first_end;
    armclean(arena, first);
    armclean(arena, -first);
}

/// Directed cleanup pass; `m < 0` walks the L side of `|m|`.
pub fn armclean(arena: &mut PolyArena, m: i32) {
    let mut stack = vec![m];
    while let Some(m) = stack.pop() {
        let mc = m.abs();
        let (m1, m2) = {
            let arm = arena.arm(mc);
            if m > 0 {
                (arm.r1, arm.r2)
            } else {
                (arm.l1, arm.l2)
            }
        };
        if m1 != 0 && m2 != 0 {
            // branch point, nothing to merge on this face
            stack.push(m1);
            stack.push(m2);
        } else if m1 != 0 || m2 != 0 {
            merge_through(arena, m, if m1 != 0 { m1 } else { m2 });
            // the merged face may expose another redundant link
            stack.push(m);
        }
    }
}

/// Merges segment `|link|` into `|m|`, reconnecting `|m|` to whatever sat on
/// the far side of the removed segment.
fn merge_through(arena: &mut PolyArena, m: i32, link: i32) {
    let mc = m.abs();
    let lc = link.abs();

    arena.arm_mut(mc).arm_len += arena.arm(lc).arm_len;

    let (t1, t2) = {
        let arm = arena.arm(lc);
        if link > 0 {
            (arm.r1, arm.r2)
        } else {
            (arm.l1, arm.l2)
        }
    };

    {
        let arm = arena.arm_mut(mc);
        if m > 0 {
            arm.r1 = t1;
            arm.r2 = t2;
        } else {
            arm.l1 = t1;
            arm.l2 = t2;
        }
    }

    // Far-side backlinks now point at `mc`, seen with the opposite sign of
    // the direction this routine was entered with.
    if t1 > 0 {
        let arm = arena.arm_mut(t1);
        arm.l2 = -m;
        arm.l1 = t2;
    } else if t1 < 0 {
        let arm = arena.arm_mut(t1.abs());
        arm.r2 = -m;
        arm.r1 = t2;
    }
    if t2 > 0 {
        let arm = arena.arm_mut(t2);
        arm.l1 = -m;
        arm.l2 = t1;
    } else if t2 < 0 {
        let arm = arena.arm_mut(t2.abs());
        arm.r1 = -m;
        arm.r2 = t1;
    }

    arena.remove_from_ring(lc);
    arena.return_arm(lc);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::ArenaLimits;
    use float_cmp::assert_approx_eq;

    /// Three segments in a row: a - b - c, where b is redundant (one
    /// neighbor per side). Cleanup must merge it away.
    #[test]
    fn polyclean_merges_chain() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 16,
            max_poly: 2,
        });
        let p = arena.request_poly().unwrap();
        let a = arena.request_arm().unwrap();
        let b = arena.request_arm().unwrap();
        let c = arena.request_arm().unwrap();

        arena.arm_mut(a).arm_len = 1.0;
        arena.arm_mut(b).arm_len = 2.0;
        arena.arm_mut(c).arm_len = 4.0;
        arena.arm_mut(a).r1 = b;
        arena.arm_mut(b).l1 = -a;
        arena.arm_mut(b).r1 = c;
        arena.arm_mut(c).l1 = -b;
        arena.armupdown(a, b);
        arena.armupdown(b, c);
        arena.poly_mut(p).first_end = a;

        polyclean(&mut arena, p);

        let segs = arena.segments_of(p);
        assert_eq!(segs.len(), 2);
        let total: f64 = segs.iter().map(|&m| arena.arm(m).arm_len).sum();
        assert_approx_eq!(f64, total, 7.0);
    }

    /// An H molecule: flags on the L side of the crossbar cover exactly the
    /// two arms of that side.
    #[test]
    fn tmpflag_left_covers_one_side() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 16,
            max_poly: 2,
        });
        let p = arena.request_poly().unwrap();
        let ids: Vec<i32> = (0..5).map(|_| arena.request_arm().unwrap()).collect();
        let (a1, a2, bb, a3, a4) = (ids[0], ids[1], ids[2], ids[3], ids[4]);
        // crossbar bb joins (a1, a2) on its left and (a3, a4) on its right
        arena.arm_mut(a1).r1 = bb;
        arena.arm_mut(a1).r2 = a2;
        arena.arm_mut(a2).r1 = bb;
        arena.arm_mut(a2).r2 = a1;
        arena.arm_mut(bb).l1 = -a1;
        arena.arm_mut(bb).l2 = -a2;
        arena.arm_mut(bb).r1 = a3;
        arena.arm_mut(bb).r2 = a4;
        arena.arm_mut(a3).l1 = -bb;
        arena.arm_mut(a3).l2 = a4;
        arena.arm_mut(a4).l1 = -bb;
        arena.arm_mut(a4).l2 = a3;
        for w in ids.windows(2) {
            arena.armupdown(w[0], w[1]);
        }
        arena.poly_mut(p).first_end = a1;

        set_tmpflag_left(&mut arena, p, bb);
        assert!(arena.arm(a1).tmpflag);
        assert!(arena.arm(a2).tmpflag);
        assert!(!arena.arm(bb).tmpflag);
        assert!(!arena.arm(a3).tmpflag);
        assert!(!arena.arm(a4).tmpflag);

        set_tmpflag_right(&mut arena, p, bb);
        assert!(!arena.arm(a1).tmpflag);
        assert!(arena.arm(a3).tmpflag);
        assert!(arena.arm(a4).tmpflag);
    }

    #[test]
    fn restore_signs_matches_adjacency() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 8,
            max_poly: 2,
        });
        let a = arena.request_arm().unwrap();
        let b = arena.request_arm().unwrap();
        // unsigned wiring of a two-segment linear: a.R -> b, b.L -> a
        arena.arm_mut(a).r1 = b;
        arena.arm_mut(b).l1 = a;
        restore_signs(&mut arena, &[a, b]);
        // from a, b is entered on its L side: positive
        assert_eq!(arena.arm(a).r1, b);
        // from b, a is entered on its R side: negative
        assert_eq!(arena.arm(b).l1, -a);
    }
}
