//! Compound-arm maintenance: extending the effective reach, gobbling
//! collapsed neighbors, sharing contested bonds, ghosting and pruning.
//!
//! Runs once per free end per time step, after retraction. All mutations
//! are O(1) splices on the two intrusive rings.

use crate::arena::PolyArena;
use crate::context::Context;
use crate::relax::{inner_arm_compound, quad_solve_spl, sv_mass};
use crate::topology::restore_signs;

fn collapse_weight(arena: &PolyArena, n: i32, alpha: f64) -> f64 {
    let arm = arena.arm(n);
    arm.tau_collapse * arm.phi_collapse.powf(2.0 * alpha)
}

/// Dispatch for one free end `n` of polymer `m`: update its effective reach
/// and resolve its fate at the next branch point.
pub fn extend_arm(arena: &mut PolyArena, ctx: &Context, m: i32, n: i32) {
    if arena.arm(n).freeze_arm_len_eff {
        arena.arm_mut(n).deltazeff = 0.0;
        if arena.arm(n).collapsed {
            collapse_star_arm(arena, ctx, m, n);
        }
        return;
    }
    if !arena.arm(n).collapsed {
        uncollapsed_extend(arena, ctx, m, n);
        return;
    }
    let (n1, n2) = {
        let arm = arena.arm(n);
        (arm.nxtbranch1, arm.nxtbranch2)
    };
    if n1 == 0 || n2 == 0 {
        collapse_star_arm(arena, ctx, m, n);
        return;
    }
    let relax1 = arena.arm(n1).relaxing;
    let relax2 = arena.arm(n2).relaxing;
    match (relax1, relax2) {
        (false, false) => mk_ghost(arena, ctx, m, n),
        (false, true) => semiconstrained_extend_arm(arena, ctx, m, n, n1, n2),
        (true, false) => semiconstrained_extend_arm(arena, ctx, m, n, n2, n1),
        (true, true) => collapse_star_arm(arena, ctx, m, n),
    }
}

/// Decides the fate at the branch point ahead of `n` given its two inward
/// neighbors; shared between the simple and compound paths.
fn branch_ahead(arena: &mut PolyArena, ctx: &Context, m: i32, n: i32) {
    let (n1, n2) = {
        let arm = arena.arm(n);
        (arm.nxtbranch1, arm.nxtbranch2)
    };
    if n1 == 0 || n2 == 0 {
        arena.arm_mut(n).freeze_arm_len_eff = true;
        return;
    }
    let relax1 = arena.arm(n1).relaxing;
    let relax2 = arena.arm(n2).relaxing;
    if relax1 && relax2 {
        arena.arm_mut(n).freeze_arm_len_eff = true;
    } else if relax1 {
        arm_len_end_extend(arena, ctx, m, n, n1, n2);
    } else if relax2 {
        arm_len_end_extend(arena, ctx, m, n, n2, n1);
    }
    // neither relaxing: the branch point is still pinned from both sides
}

/// Extend an arm that has not collapsed. Simple arms may convert to
/// compound once the backbone Rouse time of the outermost segment has
/// passed; compound arms update `Z_eff` from the dilution-weighted mean.
fn uncollapsed_extend(arena: &mut PolyArena, ctx: &Context, m: i32, n: i32) {
    let params = &ctx.params;
    let state = &ctx.state;

    if !arena.arm(n).compound {
        let z = arena.arm(n).z;
        if state.cur_time > z * z {
            branch_ahead(arena, ctx, m, n);
        }
    }

    if arena.arm(n).compound {
        let (zeff_numer, zeff_denom, arm_len_end, arm_len_eff) = {
            let arm = arena.arm(n);
            (arm.zeff_numer, arm.zeff_denom, arm.arm_len_end, arm.arm_len_eff)
        };
        let mut tmpvar = if zeff_denom > crate::context::TINY {
            zeff_numer / zeff_denom
                + 3.0 * params.p_square * state.phi.powf(params.alpha) * state.cur_time
                    / zeff_denom
        } else {
            arm_len_end + crate::context::TINY
        };
        if tmpvar > arm_len_end {
            // the inward front reached the next branch point
            tmpvar = arm_len_end;
            branch_ahead(arena, ctx, m, n);
        }
        let arm = arena.arm_mut(n);
        arm.deltazeff = tmpvar - arm_len_eff;
        arm.arm_len_eff = tmpvar;
    } else {
        arena.arm_mut(n).deltazeff = 0.0;
    }
}

/// `n1` is relaxing but `n2` is not: once `n1`'s retraction has collapsed,
/// `n` swallows `n2` and advances its frontier past the branch point.
fn arm_len_end_extend(arena: &mut PolyArena, ctx: &Context, m: i32, n: i32, n1: i32, n2: i32) {
    let r1 = arena.arm(n1).relax_end;
    if !arena.arm(r1).collapsed {
        return;
    }
    let (b1, b2) = {
        let arm = arena.arm(n2);
        if arm.l1.abs() == n1 || arm.l2.abs() == n1 {
            (arm.r1.abs(), arm.r2.abs())
        } else {
            (arm.l1.abs(), arm.l2.abs())
        }
    };
    gobble_arm(arena, ctx, m, n, n2, n1);
    let arm = arena.arm_mut(n);
    arm.nxtbranch1 = b1;
    arm.nxtbranch2 = b2;
}

/// `n2` is relaxing and `n1` is not: if `n2`'s compound arm has collapsed,
/// `n` gobbles `n1` and inherits the branch point beyond it.
fn semiconstrained_extend_arm(
    arena: &mut PolyArena,
    ctx: &Context,
    m: i32,
    n: i32,
    n1: i32,
    n2: i32,
) {
    let r2 = arena.arm(n2).relax_end;
    if !arena.arm(r2).collapsed {
        mk_ghost(arena, ctx, m, n);
        return;
    }
    let (b1, b2) = {
        let arm = arena.arm(n1);
        if arm.l1.abs() == n2 || arm.l2.abs() == n2 {
            (arm.r1.abs(), arm.r2.abs())
        } else {
            (arm.l1.abs(), arm.l2.abs())
        }
    };
    if b1 == 0 || b2 == 0 {
        log::warn!("semiconstrained extension found a dangling branch point");
    }
    gobble_arm(arena, ctx, m, n, n1, n2);
    let arm = arena.arm_mut(n);
    arm.nxtbranch1 = b1;
    arm.nxtbranch2 = b2;
}

/// Arm `n` of polymer `m` gobbles neighbor `n1`, inheriting drag from the
/// collapsed compound arm anchored at `n2`'s relax end.
pub fn gobble_arm(arena: &mut PolyArena, ctx: &Context, m: i32, n: i32, n1: i32, n2: i32) {
    let alpha = ctx.params.alpha;
    let r2 = arena.arm(n2).relax_end;
    {
        let arm = arena.arm_mut(n1);
        arm.relax_end = n;
        arm.relaxing = true;
    }
    {
        let arm = arena.arm_mut(n);
        arm.compound = true;
        arm.collapsed = false;
        arm.phi_collapse = -1.0;
    }

    // append the drag donor to the friction list
    let mut na = arena.arm(n).next_friction;
    if na == 0 {
        arena.arm_mut(n).next_friction = r2;
    } else {
        let mut n3 = na;
        while na != 0 {
            n3 = na;
            na = arena.arm(na).next_friction;
        }
        arena.arm_mut(n3).next_friction = r2;
    }
    arena.arm_mut(r2).next_friction = 0;

    let n0 = inner_arm_compound(arena, n);
    arena.arm_mut(n0).nxt_relax = n1;

    let tmpvar = collapse_weight(arena, r2, alpha);
    let gobbled_len = arena.arm(n1).arm_len;
    {
        let arm = arena.arm_mut(n);
        arm.zeff_numer += arm.arm_len_end * tmpvar;
        arm.zeff_denom += tmpvar;
        arm.extra_drag += tmpvar;
        arm.arm_len_end += gobbled_len;
    }
    if arena.arm(r2).ghost {
        arena.poly_mut(m).ghost_contrib -= tmpvar;
    } else {
        arena.arm_mut(r2).prune = true;
    }
}

/// A collapsed arm whose reach is frozen: its drag goes to whichever
/// neighbor keeps retracting, or the bond is shared when two compound
/// fronts contest it.
pub fn collapse_star_arm(arena: &mut PolyArena, ctx: &Context, m: i32, n: i32) {
    let alpha = ctx.params.alpha;
    let tmpvar = collapse_weight(arena, n, alpha);
    let (n1, n2) = {
        let arm = arena.arm(n);
        (arm.nxtbranch1, arm.nxtbranch2)
    };

    if n1 == 0 || n2 == 0 {
        let other = if n1 == 0 { n2 } else { n1 };
        let r1 = arena.arm(other).relax_end;
        if !arena.arm(r1).collapsed {
            arena.arm_mut(r1).extra_drag += tmpvar;
        }
        arena.arm_mut(n).prune = true;
        return;
    }

    let r1 = arena.arm(n1).relax_end;
    let r2 = arena.arm(n2).relax_end;
    let col1 = arena.arm(r1).collapsed;
    let col2 = arena.arm(r2).collapsed;

    if col1 && col2 {
        arena.arm_mut(n).prune = true;
    } else if !col1 && !col2 {
        // give the drag to whichever side has further to retract
        let left1 = arena.arm(r1).arm_len_end - arena.arm(r1).z;
        let left2 = arena.arm(r2).arm_len_end - arena.arm(r2).z;
        if left1 > left2 {
            arena.arm_mut(r1).extra_drag += tmpvar;
        } else {
            arena.arm_mut(r2).extra_drag += tmpvar;
        }
        arena.arm_mut(n).prune = true;
    } else if col1 {
        if !arena.arm(r2).compound || share_arm(arena, ctx, m, n, n1, n2) {
            arena.arm_mut(r2).extra_drag += tmpvar;
            arena.arm_mut(n).prune = true;
        }
    } else if !arena.arm(r1).compound || share_arm(arena, ctx, m, n, n2, n1) {
        arena.arm_mut(r1).extra_drag += tmpvar;
        arena.arm_mut(n).prune = true;
    }
}

/// Two inward fronts meet on the bond held by `n2`'s compound arm: solve
/// for the collision point and split the bond so each side owns its share.
/// Returns `true` when no valid split exists and the caller should fall
/// back to dumping the drag.
pub fn share_arm(arena: &mut PolyArena, ctx: &Context, m: i32, n: i32, n1: i32, n2: i32) -> bool {
    let alpha = ctx.params.alpha;
    let r2 = arena.arm(n2).relax_end;
    let r1 = arena.arm(n1).relax_end;
    let len_r2 = arena.arm(r2).arm_len_end;
    let len_n = arena.arm(n).arm_len_end;

    // weighted friction moments of the two compound chains
    let mut t_a = 0.0;
    let mut t_b = 0.0;
    let mut t_c = 0.0;
    let mut zouter = arena.arm(n).arm_len;
    let mut k1 = arena.arm(n).next_friction;
    let mut k2 = arena.arm(n).nxt_relax;
    while k1 != 0 {
        let tt = collapse_weight(arena, k1, alpha);
        t_a += tt;
        t_b += tt * zouter;
        zouter += arena.arm(k2).arm_len;
        k2 = arena.arm(k2).nxt_relax;
        k1 = arena.arm(k1).next_friction;
    }
    let tt = collapse_weight(arena, r1, alpha);
    t_a += tt;
    t_b += tt * zouter;

    zouter = arena.arm(r2).arm_len;
    k1 = arena.arm(r2).next_friction;
    k2 = arena.arm(r2).nxt_relax;
    while k1 != 0 {
        let tt = collapse_weight(arena, k1, alpha);
        t_a -= tt;
        t_c += tt * zouter;
        zouter += arena.arm(k2).arm_len;
        k2 = arena.arm(k2).nxt_relax;
        k1 = arena.arm(k1).next_friction;
    }

    let tb1 = -t_b - t_c - t_a * (len_r2 - len_n);
    let tc1 = -t_c * len_n + len_r2 * (t_b - t_a * len_n);
    let xx = quad_solve_spl(t_a, tb1, tc1);

    let bond_len = arena.arm(n2).arm_len;
    if xx >= bond_len || arena.arm(r2).arm_len_end - arena.arm(r2).z <= xx {
        return true;
    }
    let Some(na) = arena.request_arm() else {
        return true;
    };

    // split the bond: na takes the slice nearest this compound arm
    let n0 = inner_arm_compound(arena, n);
    let n2_on_left = {
        let arm = arena.arm(n2);
        arm.l1.abs() == n0 || arm.l2.abs() == n0
    };
    if n2_on_left {
        {
            let arm = arena.arm_mut(n2);
            arm.l1 = na;
            arm.l2 = 0;
        }
        {
            let arm = arena.arm_mut(na);
            arm.r1 = n2;
            arm.r2 = 0;
            arm.l1 = n0;
            arm.l2 = n1;
        }
        let arm = arena.arm_mut(n0);
        if arm.r1.abs() == n2 {
            arm.r1 = na;
        } else {
            arm.r2 = na;
        }
        let arm = arena.arm_mut(n1);
        if arm.r1.abs() == n2 {
            arm.r1 = na;
        } else {
            arm.r2 = na;
        }
    } else {
        {
            let arm = arena.arm_mut(n2);
            arm.r1 = na;
            arm.r2 = 0;
        }
        {
            let arm = arena.arm_mut(na);
            arm.l1 = n2;
            arm.l2 = 0;
            arm.r1 = n0;
            arm.r2 = n1;
        }
        let arm = arena.arm_mut(n0);
        if arm.l1.abs() == n2 {
            arm.l1 = na;
        } else {
            arm.l2 = na;
        }
        let arm = arena.arm_mut(n1);
        if arm.l1.abs() == n2 {
            arm.l1 = na;
        } else {
            arm.l2 = na;
        }
    }
    restore_signs(arena, &[n0, n1, n2, na]);

    {
        let frac = xx / arena.arm(n2).arm_len;
        let donor_vol = arena.arm(n2).vol_fraction;
        let arm = arena.arm_mut(na);
        arm.arm_len = xx;
        arm.vol_fraction = frac * donor_vol;
    }
    {
        let xx_frac = xx / arena.arm(n2).arm_len;
        let arm = arena.arm_mut(n2);
        arm.vol_fraction *= 1.0 - xx_frac;
    }
    {
        let arm = arena.arm_mut(n);
        arm.collapsed = false;
        arm.freeze_arm_len_eff = false;
    }
    gobble_arm(arena, ctx, m, n, na, n1);
    {
        let arm = arena.arm_mut(n);
        arm.nxtbranch1 = na;
        arm.nxtbranch2 = 0;
    }
    arena.arm_mut(n2).arm_len -= xx;
    arena.arm_mut(r2).arm_len_end -= xx;

    // splice the new segment into the polymer ring after the split bond
    let nd = arena.arm(n2).down;
    arena.arm_mut(n2).down = na;
    arena.arm_mut(na).up = n2;
    arena.arm_mut(na).down = nd;
    arena.arm_mut(nd).up = na;

    {
        let arm = arena.arm_mut(r2);
        arm.nxtbranch1 = na;
        arm.nxtbranch2 = 0;
    }
    {
        let arm = arena.arm_mut(na);
        arm.nxt_relax = 0;
        arm.prune = false;
        arm.ghost = false;
        arm.collapsed = false;
        arm.phi_collapse = -1.0;
    }
    if arena.arm(r2).arm_len_eff > arena.arm(r2).arm_len_end {
        let end = arena.arm(r2).arm_len_end;
        arena.arm_mut(r2).arm_len_eff = end;
    }
    false
}

/// Pool the arm's drag on the polymer: neither side keeps retracting.
pub fn mk_ghost(arena: &mut PolyArena, ctx: &Context, m: i32, n: i32) {
    let tmpvar = collapse_weight(arena, n, ctx.params.alpha);
    arena.arm_mut(n).ghost = true;
    arena.poly_mut(m).ghost_contrib += tmpvar;
    sv_mass(arena, m, n);
}

/// Unlinks every ghost from the free-end ring of polymer `m`; a polymer
/// whose ring empties is dead.
pub fn del_ghost(arena: &mut PolyArena, m: i32) {
    let n1 = arena.poly(m).first_free;
    if n1 == 0 {
        return;
    }
    let mut n2 = arena.arm(n1).free_down;
    while n2 != n1 {
        let next = arena.arm(n2).free_down;
        if arena.arm(n2).ghost {
            unlink_free(arena, n2);
        }
        n2 = next;
    }
    if arena.arm(n1).ghost {
        let nf1 = arena.arm(n1).free_down;
        unlink_free(arena, n1);
        arena.poly_mut(m).first_free = nf1;
        if nf1 == n1 {
            arena.poly_mut(m).alive = false;
        }
    }
}

fn unlink_free(arena: &mut PolyArena, n: i32) {
    let (nf1, nf2) = {
        let arm = arena.arm(n);
        (arm.free_down, arm.free_up)
    };
    arena.arm_mut(nf2).free_down = nf1;
    arena.arm_mut(nf1).free_up = nf2;
}

/// Removes pruned arms from the free-end ring, banking their mass; the
/// polymer dies when its last free end is pruned.
pub fn prune_chain(arena: &mut PolyArena, m: i32) {
    let n = arena.poly(m).first_free;
    let mut n1 = arena.arm(n).free_down;
    if n1 == n {
        if arena.arm(n).prune {
            if !arena.arm(n).ghost {
                sv_mass(arena, m, n);
            }
            arena.poly_mut(m).alive = false;
        }
        return;
    }

    while n1 != n {
        let next = arena.arm(n1).free_down;
        if arena.arm(n1).prune {
            if !arena.arm(n1).ghost {
                sv_mass(arena, m, n1);
            }
            unlink_free(arena, n1);
        }
        n1 = next;
    }
    // the anchor itself may have been scheduled
    n1 = arena.arm(n).free_down;
    if n1 == n {
        if arena.arm(n).prune {
            if !arena.arm(n).ghost {
                sv_mass(arena, m, n);
            }
            arena.poly_mut(m).alive = false;
        }
    } else if arena.arm(n).prune {
        if !arena.arm(n).ghost {
            sv_mass(arena, m, n);
        }
        unlink_free(arena, n);
        arena.poly_mut(m).first_free = n1;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::{ArenaLimits, PolyArena};
    use crate::context::{Context, Params};
    use crate::relax::poly_start;
    use crate::templates::polygen_h;
    use float_cmp::assert_approx_eq;

    fn h_setup() -> (PolyArena, Context, i32) {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 32,
            max_poly: 2,
        });
        let ctx = Context::seeded(Params::default(), 11);
        let p = arena.request_poly().unwrap();
        assert!(polygen_h(&mut arena, p, &[5.0, 5.0, 10.0, 5.0, 5.0]));
        poly_start(&mut arena, p, 1.0);
        (arena, ctx, p)
    }

    /// Collapse one outer arm pair by hand, then let its partner gobble the
    /// crossbar: the partner becomes a compound arm spanning arm+crossbar.
    #[test]
    fn gobble_builds_a_compound_arm() {
        let (mut arena, mut ctx, p) = h_setup();
        ctx.state.cur_time = 1.0;
        let segs = arena.segments_of(p);
        let (a1, a2, bb) = (segs[0], segs[1], segs[2]);

        // a2 collapsed at t=0.5 under phi=0.8
        {
            let arm = arena.arm_mut(a2);
            arm.collapsed = true;
            arm.tau_collapse = 0.5;
            arm.phi_collapse = 0.8;
            arm.z = arm.arm_len_end;
        }
        // a1 now gobbles the crossbar with a2 as drag donor
        gobble_arm(&mut arena, &ctx, p, a1, bb, a2);

        let arm = arena.arm(a1);
        assert!(arm.compound);
        assert_approx_eq!(f64, arm.arm_len_end, 15.0, epsilon = 1.0e-12);
        let expect = 0.5 * 0.8_f64.powf(2.0 * ctx.params.alpha);
        assert_approx_eq!(f64, arm.extra_drag, expect, epsilon = 1.0e-12);
        assert_eq!(arm.next_friction, a2);
        assert_eq!(arena.arm(a1).nxt_relax, bb);
        assert_eq!(arena.arm(bb).relax_end, a1);
        assert!(arena.arm(bb).relaxing);
        assert!(arena.arm(a2).prune);
    }

    #[test]
    fn ghosts_leave_the_free_ring() {
        let (mut arena, ctx, p) = h_setup();
        let free = arena.free_ends_of(p);
        assert_eq!(free.len(), 4);
        {
            let arm = arena.arm_mut(free[1]);
            arm.tau_collapse = 1.0;
            arm.phi_collapse = 0.5;
        }
        mk_ghost(&mut arena, &ctx, p, free[1]);
        del_ghost(&mut arena, p);
        let left = arena.free_ends_of(p);
        assert_eq!(left.len(), 3);
        assert!(!left.contains(&free[1]));
        assert!(arena.poly(p).ghost_contrib > 0.0);
        assert!(arena.poly(p).alive);
    }

    #[test]
    fn pruning_the_last_end_kills_the_polymer() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 8,
            max_poly: 2,
        });
        let p = arena.request_poly().unwrap();
        assert!(crate::templates::polygen_lin(&mut arena, p, 10.0));
        poly_start(&mut arena, p, 1.0);
        for m in arena.free_ends_of(p) {
            arena.arm_mut(m).prune = true;
        }
        prune_chain(&mut arena, p);
        assert!(!arena.poly(p).alive);
    }
}
