//! Diene-modified CSTR polymerization.
//!
//! Chains grow in a continuous reactor fed with a difunctional diene
//! comonomer. Branch points come from three channels: incorporation of a
//! free diene (which may later react again on its second bond),
//! incorporation of a once-reacted pendent diene, and re-incorporation of a
//! double-bond terminated chain. The conversion coordinate is the negative
//! log-residence of the material; segments whose growth would extend past
//! the collection time are chopped and excluded from further
//! incorporation.

use crate::arena::PolyArena;
use crate::context::Context;
use crate::ensemble::Ensemble;
use crate::polygen::{finish_molecule, ArchAnalysis};
use crate::tobita::nonzero;
use rand::Rng;
use rand_pcg::Pcg64;

/// Reactor recipe of the diene CSTR.
#[derive(Clone, Copy, Debug)]
pub struct DieneRecipe {
    /// Residence time.
    pub tau: f64,
    /// Propagation rate times monomer concentration.
    pub kp_m: f64,
    /// Pendent-diene (once-reacted) incorporation rate constant.
    pub k_dlcb: f64,
    /// Terminated-macromer incorporation rate constant.
    pub kp_lcb: f64,
    /// Free-diene incorporation rate constant.
    pub kp_d: f64,
    /// Double-bond termination rate constant.
    pub keq: f64,
    /// Chain transfer rate constant.
    pub ks: f64,
    /// Diene feed concentration.
    pub d0: f64,
    /// Chain concentration.
    pub c0: f64,
    /// Length of an incorporated diene unit (monomers).
    pub ldiene: f64,
    /// Collection time; older material is not sampled.
    pub t_collection: f64,
}

/// Generator state derived from a [`DieneRecipe`].
pub struct DieneCstr {
    lc_past: f64,
    lc_future: f64,
    lb: f64,
    conv_future_d: f64,
    conv_past_d: f64,
    conv_past_p: f64,
    conv_future_p: f64,
    p_free_diene: f64,
    p_sum_diene: f64,
    p_double_bond: f64,
    ldiene: f64,
    s_kp_m: f64,
    minconv: f64,
    max_rlevel: usize,
    bcount: i32,
    rlevel: usize,
    overflow: bool,
}

impl DieneCstr {
    /// Folds the reactor balance into the sampling densities.
    #[must_use]
    pub fn new(recipe: &DieneRecipe, max_rlevel: usize) -> Self {
        let s = 1.0 / recipe.tau;
        let p = s * recipe.c0 / (s + recipe.keq);
        let lc_past = recipe.kp_m / (s + recipe.keq + recipe.ks);
        let lc_future = recipe.kp_m / (recipe.keq + recipe.ks);
        // mean lengths before each incorporation channel
        let lb1 = recipe.kp_m * (s + recipe.kp_d * p) / (recipe.kp_d * s * recipe.d0);
        let lb2 = recipe.kp_m * (s + recipe.k_dlcb * p) * (s + recipe.kp_d * p)
            / (recipe.k_dlcb * recipe.kp_d * p * s * recipe.d0);
        let lb3 = recipe.kp_m * (s + recipe.kp_lcb * p) / (recipe.kp_lcb * recipe.keq * p);
        let lb = 1.0 / (1.0 / lb1 + 1.0 / lb2 + 1.0 / lb3);

        let p_free_diene = 1.0 / (1.0 + lb1 / lb2 + lb1 / lb3);
        let p_pendant_diene = 1.0 / (1.0 + lb2 / lb1 + lb2 / lb3);

        Self {
            lc_past,
            lc_future,
            lb,
            conv_future_d: s / (recipe.k_dlcb * p),
            conv_past_d: s / (s + recipe.k_dlcb * p),
            conv_past_p: s / (s + recipe.kp_lcb * p),
            conv_future_p: s / (recipe.kp_lcb * p),
            p_free_diene,
            p_sum_diene: p_free_diene + p_pendant_diene,
            p_double_bond: recipe.keq / (recipe.keq + recipe.ks),
            ldiene: recipe.ldiene,
            s_kp_m: s / recipe.kp_m,
            minconv: -recipe.t_collection * s,
            max_rlevel,
            bcount: 0,
            rlevel: 0,
            overflow: false,
        }
    }

    /// Grows one molecule into polymer record `n`.
    pub fn make(
        &mut self,
        arena: &mut PolyArena,
        ctx: &mut Context,
        dist: &mut Ensemble,
        arch: Option<&mut ArchAnalysis<'_>>,
        n: i32,
    ) -> bool {
        self.bcount = 0;
        self.overflow = false;
        let rng = &mut ctx.rng;

        let mut cur_conv = nonzero(rng).ln();
        while cur_conv < self.minconv {
            cur_conv = nonzero(rng).ln();
        }

        if let Some(m) = arena.request_arm() {
            arena.poly_mut(n).first_end = m;
            let (seg_len, is_chopped) = self.calclength_future(rng, cur_conv);
            {
                let arm = arena.arm_mut(m);
                arm.arm_len = seg_len;
                arm.arm_conv = cur_conv;
            }
            self.rlevel = 0;
            self.grow(arena, rng, 1, m, cur_conv, is_chopped);

            if let Some(m1) = arena.request_arm() {
                arena.arm_mut(m).l1 = -m1;
                arena.arm_mut(m1).r2 = m;
                arena.armupdown(m, m1);
                let seg_len = self.calclength_past(rng, cur_conv);
                {
                    let arm = arena.arm_mut(m1);
                    arm.arm_len = seg_len;
                    arm.arm_conv = cur_conv;
                }
                self.rlevel = 0;
                self.grow(arena, rng, -1, m1, cur_conv, false);
            }
        }

        if self.overflow {
            return false;
        }
        finish_molecule(arena, dist, arch, n, self.bcount, true)
    }

    fn grow(
        &mut self,
        arena: &mut PolyArena,
        rng: &mut Pcg64,
        dir: i32,
        m: i32,
        cur_conv: f64,
        chopped: bool,
    ) {
        self.rlevel += 1;
        if self.rlevel > self.max_rlevel {
            self.overflow = true;
            self.rlevel -= 1;
            return;
        }
        if arena.arms_avail {
            let seg_len = -self.lb * nonzero(rng).ln();
            if seg_len < arena.arm(m).arm_len {
                self.branch_point(arena, rng, dir, m, cur_conv, chopped, seg_len);
            } else if dir > 0 && !chopped {
                // the only chain-end event: a double-bond terminated chain
                // later incorporated into younger material
                if rng.gen::<f64>() < self.p_double_bond {
                    let new_conv = cur_conv - self.conv_future_p * nonzero(rng).ln();
                    if new_conv < 0.0 {
                        self.incorporate_end(arena, rng, m, new_conv);
                    }
                }
            }
        }
        self.rlevel -= 1;
    }

    fn branch_point(
        &mut self,
        arena: &mut PolyArena,
        rng: &mut Pcg64,
        dir: i32,
        m: i32,
        cur_conv: f64,
        chopped: bool,
        seg_len: f64,
    ) {
        // pick the incorporation channel; +1 free diene, -1 pendent diene,
        // 0 terminated chain
        let rnd: f64 = rng.gen();
        let (flag_diene_inc, new_conv) = if rnd < self.p_free_diene {
            (1, cur_conv - self.conv_future_d * nonzero(rng).ln())
        } else if rnd < self.p_sum_diene {
            (-1, cur_conv + self.conv_past_d * nonzero(rng).ln())
        } else {
            (0, cur_conv + self.conv_past_p * nonzero(rng).ln())
        };
        if flag_diene_inc != 1 && new_conv <= self.minconv {
            // the incorporated material is older than the collection window
            return;
        }

        self.bcount += 1;
        let Some(m1) = arena.request_arm() else {
            return;
        };
        arena.armupdown(m, m1);
        let Some(m2) = arena.request_arm() else {
            return;
        };
        arena.armupdown(m, m2);

        if dir > 0 {
            arena.arm_mut(m).r1 = m1;
            arena.arm_mut(m1).l2 = -m;
            arena.arm_mut(m1).l1 = -m2;
            arena.arm_mut(m2).r2 = m1;
            arena.arm_mut(m).r2 = -m2;
            arena.arm_mut(m2).r1 = -m;
        } else {
            arena.arm_mut(m).l2 = -m1;
            arena.arm_mut(m1).r1 = m;
            arena.arm_mut(m).l1 = -m2;
            arena.arm_mut(m2).r2 = m;
            arena.arm_mut(m1).r2 = -m2;
            arena.arm_mut(m2).r1 = -m1;
        }
        {
            let rest = arena.arm(m).arm_len - seg_len;
            let arm1 = arena.arm_mut(m1);
            arm1.arm_len = rest;
            arm1.arm_conv = cur_conv;
        }
        arena.arm_mut(m).arm_len = seg_len;
        self.grow(arena, rng, dir, m1, cur_conv, chopped);

        if flag_diene_inc == 0 {
            // incorporated a terminated chain that grew in the past
            let seg = self.calclength_past(rng, new_conv);
            {
                let arm2 = arena.arm_mut(m2);
                arm2.arm_len = seg;
                arm2.arm_conv = new_conv;
            }
            self.grow(arena, rng, -1, m2, new_conv, false);
        } else {
            // incorporated a diene unit of fixed length
            {
                let arm2 = arena.arm_mut(m2);
                arm2.arm_len = self.ldiene;
                arm2.arm_conv = new_conv;
            }
            if self.minconv < new_conv && new_conv < 0.0 {
                // the second bond reacted inside the window: the diene
                // carries a whole chain of its own
                self.bcount += 1;
                let Some(m3) = arena.request_arm() else {
                    return;
                };
                arena.armupdown(m2, m3);
                let Some(m4) = arena.request_arm() else {
                    return;
                };
                arena.armupdown(m2, m4);

                let past = self.calclength_past(rng, new_conv);
                arena.arm_mut(m3).arm_len = past;
                let (future, is_chopped) = self.calclength_future(rng, new_conv);
                arena.arm_mut(m4).arm_len = future;
                arena.arm_mut(m3).arm_conv = new_conv;
                arena.arm_mut(m4).arm_conv = new_conv;

                arena.arm_mut(m2).l2 = -m3;
                arena.arm_mut(m2).l1 = m4;
                arena.arm_mut(m3).r1 = m2;
                arena.arm_mut(m3).r2 = m4;
                arena.arm_mut(m4).l1 = -m3;
                arena.arm_mut(m4).l2 = m2;

                self.grow(arena, rng, -1, m3, new_conv, false);
                self.grow(arena, rng, 1, m4, new_conv, is_chopped);
            }
        }
    }

    /// Chain end incorporated into a younger chain: the chain continues
    /// through segments grown at `new_conv`.
    fn incorporate_end(&mut self, arena: &mut PolyArena, rng: &mut Pcg64, m: i32, new_conv: f64) {
        self.bcount += 1;
        let Some(m1) = arena.request_arm() else {
            return;
        };
        arena.armupdown(m, m1);
        let Some(m2) = arena.request_arm() else {
            return;
        };
        arena.armupdown(m, m2);

        let past = self.calclength_past(rng, new_conv);
        arena.arm_mut(m1).arm_len = past;
        let (future, is_chopped) = self.calclength_future(rng, new_conv);
        arena.arm_mut(m2).arm_len = future;
        arena.arm_mut(m1).arm_conv = new_conv;
        arena.arm_mut(m2).arm_conv = new_conv;

        arena.arm_mut(m).r2 = -m1;
        arena.arm_mut(m).r1 = m2;
        arena.arm_mut(m1).r1 = -m;
        arena.arm_mut(m1).r2 = m2;
        arena.arm_mut(m2).l1 = -m1;
        arena.arm_mut(m2).l2 = -m;

        self.grow(arena, rng, -1, m1, new_conv, false);
        self.grow(arena, rng, 1, m2, new_conv, is_chopped);
    }

    /// Length grown before `cur_conv`; chopped at the collection window.
    fn calclength_past(&self, rng: &mut Pcg64, cur_conv: f64) -> f64 {
        let l_tmp = -self.lc_past * nonzero(rng).ln();
        if self.minconv < cur_conv - l_tmp * self.s_kp_m {
            l_tmp
        } else {
            (cur_conv - self.minconv) / self.s_kp_m
        }
    }

    /// Length grown after `cur_conv`; returns `(length, chopped)` where
    /// `chopped` marks chains cut at the sampling instant.
    fn calclength_future(&self, rng: &mut Pcg64, cur_conv: f64) -> (f64, bool) {
        let l_tmp = -self.lc_future * nonzero(rng).ln();
        if cur_conv + l_tmp * self.s_kp_m < 0.0 {
            (l_tmp, false)
        } else {
            (-cur_conv / self.s_kp_m, true)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::{ArenaLimits, PolyArena};
    use crate::context::Params;
    use crate::polygen::generate_ensemble;

    fn recipe() -> DieneRecipe {
        DieneRecipe {
            tau: 600.0,
            kp_m: 2000.0,
            k_dlcb: 100.0,
            kp_lcb: 100.0,
            kp_d: 500.0,
            keq: 0.02,
            ks: 0.02,
            d0: 1.0e-5,
            c0: 1.0e-5,
            ldiene: 1.0,
            t_collection: 3600.0,
        }
    }

    #[test]
    fn generates_within_collection_window() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 200_000,
            max_poly: 5_000,
        });
        let mut ctx = Context::seeded(Params::default(), 2024);
        let mut dist = Ensemble::new("diene", 28.0, 1120.0);
        dist.bobinit();
        let mut gen = DieneCstr::new(&recipe(), 5000);
        generate_ensemble(&mut arena, &mut ctx, &mut dist, 400, |arena, ctx, dist, n| {
            gen.make(arena, ctx, dist, None, n)
        })
        .unwrap();
        assert!(!dist.error);
        dist.molbin(&arena);
        assert!(dist.m_w > dist.m_n);

        // no surviving segment is older than the collection window (pendent
        // dienes may carry a reaction conversion beyond the sampling instant)
        let minconv = -3600.0 / 600.0;
        for &p in &dist.polymers {
            for m in arena.segments_of(p) {
                assert!(arena.arm(m).arm_conv >= minconv - 1.0e-9);
            }
        }
    }

    #[test]
    fn mean_lengths_follow_the_balance() {
        let gen = DieneCstr::new(&recipe(), 5000);
        // the forward mean exceeds the backward mean: no outflow term
        assert!(gen.lc_future > gen.lc_past);
        assert!(gen.p_free_diene > 0.0 && gen.p_sum_diene < 1.0);
    }
}
