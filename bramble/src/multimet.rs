//! Multiple-metallocene CSTR polymerization.
//!
//! Each segment carries the index of the catalyst that grew it. The site
//! balance of the reactor is folded into cumulative probability tables at
//! construction: `cp_m` picks the catalyst of a random polymerized monomer,
//! `cp_u` the branch type met growing upstream, and `cp_d1`/`cp_d2` the two
//! downstream branching channels. Segment lengths are exponential with the
//! per-catalyst mean `nx`.

use crate::arena::PolyArena;
use crate::context::Context;
use crate::ensemble::Ensemble;
use crate::polygen::{finish_molecule, ArchAnalysis};
use crate::tobita::nonzero;
use ndarray::Array2;
use rand::Rng;
use rand_pcg::Pcg64;

/// Rate constants and concentration of one catalyst site.
#[derive(Clone, Copy, Debug)]
pub struct CatalystSite {
    /// Propagation rate constant.
    pub kp: f64,
    /// Macromonomer (vinyl-ended dead chain) formation rate constant.
    pub kdb: f64,
    /// Chain transfer rate constant.
    pub ks: f64,
    /// Long-chain-branch incorporation rate constant.
    pub kplcb: f64,
    /// Site concentration.
    pub yconc: f64,
}

/// Generator state for a steady-state multi-catalyst CSTR.
pub struct MultiMetCstr {
    ncat: usize,
    cp_m: Vec<f64>,
    nx: Vec<f64>,
    cp_u: Array2<f64>,
    cp_d1: Array2<f64>,
    cp_d2: Array2<f64>,
    max_rlevel: usize,
    bcount: i32,
    rlevel: usize,
    overflow: bool,
}

impl MultiMetCstr {
    /// Assembles the cumulative transition tables from the site balance of
    /// a reactor with residence time `tau` and monomer concentration
    /// `mconc`.
    ///
    /// # Panics
    ///
    /// Panics when `cats` is empty.
    #[must_use]
    pub fn new(cats: &[CatalystSite], tau: f64, mconc: f64, max_rlevel: usize) -> Self {
        assert!(!cats.is_empty());
        let n = cats.len();
        let s = 1.0 / tau;

        let hsp: Vec<f64> = cats.iter().map(|c| s + c.kdb + c.ks).collect();
        let kp_m: Vec<f64> = cats.iter().map(|c| c.kp * mconc).collect();
        let pconc: Vec<f64> = (0..n)
            .map(|i| cats[i].yconc * kp_m[i] / (hsp[i] + kp_m[i]))
            .collect();
        let h1: f64 = (0..n).map(|i| pconc[i] * cats[i].kplcb).sum();
        let h2: f64 = (0..n).map(|i| pconc[i] * cats[i].kdb).sum();
        let mut p_m: Vec<f64> = (0..n).map(|i| pconc[i] * kp_m[i]).collect();
        let sum: f64 = p_m.iter().sum();
        for p in &mut p_m {
            *p /= sum;
        }
        let nx: Vec<f64> = (0..n)
            .map(|i| kp_m[i] * (s + h1) / (hsp[i] * (s + h1) + cats[i].kplcb * h2))
            .collect();

        let mut p_u = Array2::zeros((n, n));
        let mut p_d2 = Array2::zeros((n, n));
        for i in 0..n {
            for j in 0..n {
                p_u[[i, j]] =
                    cats[i].kplcb * cats[j].kdb * pconc[j] / (hsp[i] * (s + h1) + cats[i].kplcb * h2);
                p_d2[[i, j]] =
                    cats[i].kplcb * cats[j].kdb * pconc[i] / (hsp[j] * (s + h1) + cats[j].kplcb * h2);
            }
        }

        let mut cp_m = vec![0.0; n];
        cp_m[0] = p_m[0];
        for i in 1..n {
            cp_m[i] = cp_m[i - 1] + p_m[i];
        }
        cp_m[n - 1] = 1.0;

        let mut cp_u = Array2::zeros((n, n));
        for i in 0..n {
            cp_u[[i, 0]] = p_u[[i, 0]];
            for j in 1..n {
                cp_u[[i, j]] = cp_u[[i, j - 1]] + p_u[[i, j]];
            }
        }
        let cp_d1 = cp_u.clone();

        // cumulative in the other direction, continuing past the type-1 block
        let mut cp_d2 = Array2::zeros((n, n));
        for j in 0..n {
            cp_d2[[0, j]] = cp_d1[[j, n - 1]] + p_d2[[0, j]];
            for i in 1..n {
                cp_d2[[i, j]] = cp_d2[[i - 1, j]] + p_d2[[i, j]];
            }
        }

        Self {
            ncat: n,
            cp_m,
            nx,
            cp_u,
            cp_d1,
            cp_d2,
            max_rlevel,
            bcount: 0,
            rlevel: 0,
            overflow: false,
        }
    }

    /// Mean segment length (monomers) of catalyst `cat`.
    #[must_use]
    pub fn mean_len(&self, cat: usize) -> f64 {
        self.nx[cat]
    }

    fn calclength(&self, rng: &mut Pcg64, cat: usize) -> f64 {
        (-self.nx[cat] * nonzero(rng).ln()).max(1.0)
    }

    fn getcat(&self, rng: &mut Pcg64) -> usize {
        let rnd: f64 = rng.gen();
        let mut cat = 0;
        while cat < self.ncat - 1 && rnd > self.cp_m[cat] {
            cat += 1;
        }
        cat
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
        let cur_cat = self.getcat(rng);

        if let Some(m) = arena.request_arm() {
            arena.poly_mut(n).first_end = m;
            // the starting monomer sits inside its segment: both growth
            // directions contribute a length
            let seg = self.calclength(rng, cur_cat) + self.calclength(rng, cur_cat);
            {
                let arm = arena.arm_mut(m);
                arm.arm_len = seg;
                arm.armcat = cur_cat;
            }
            self.rlevel = 0;
            self.grow(arena, rng, 1, m, cur_cat);
            self.rlevel = 0;
            self.grow(arena, rng, -1, m, cur_cat);
        }

        if self.overflow {
            return false;
        }
        finish_molecule(arena, dist, arch, n, self.bcount, false)
    }

    fn grow(&mut self, arena: &mut PolyArena, rng: &mut Pcg64, dir: i32, m: i32, cur_cat: usize) {
        self.rlevel += 1;
        if self.rlevel > self.max_rlevel || self.overflow {
            self.overflow = true;
            return;
        }

        if arena.arms_avail {
            if dir < 0 {
                self.grow_upstream(arena, rng, m, cur_cat);
            } else {
                self.grow_downstream(arena, rng, m, cur_cat);
            }
        }
        self.rlevel -= 1;
    }

    /// Upstream: the chain may have started on a macromonomer made by
    /// another catalyst.
    fn grow_upstream(&mut self, arena: &mut PolyArena, rng: &mut Pcg64, m: i32, cur_cat: usize) {
        let rnd: f64 = rng.gen();
        if rnd > self.cp_u[[cur_cat, self.ncat - 1]] {
            return;
        }
        self.bcount += 1;
        let mut new_cat = 0;
        while new_cat < self.ncat - 1 && rnd > self.cp_u[[cur_cat, new_cat]] {
            new_cat += 1;
        }
        let Some(m1) = arena.request_arm() else {
            return;
        };
        arena.armupdown(m, m1);
        let Some(m2) = arena.request_arm() else {
            return;
        };
        arena.armupdown(m, m2);

        let len1 = self.calclength(rng, cur_cat);
        {
            let arm = arena.arm_mut(m1);
            arm.arm_len = len1;
            arm.armcat = cur_cat;
        }
        let len2 = self.calclength(rng, new_cat);
        {
            let arm = arena.arm_mut(m2);
            arm.arm_len = len2;
            arm.armcat = new_cat;
        }

        arena.arm_mut(m).l1 = -m1;
        arena.arm_mut(m1).r2 = m;
        arena.arm_mut(m).l2 = -m2;
        arena.arm_mut(m2).r1 = m;
        arena.arm_mut(m1).r1 = -m2;
        arena.arm_mut(m2).r2 = m1;

        self.grow(arena, rng, -1, m1, cur_cat);
        self.grow(arena, rng, -1, m2, new_cat);
    }

    /// Downstream: the live end may have incorporated a macromonomer
    /// (channel 1) or been incorporated into another chain (channel 2).
    fn grow_downstream(&mut self, arena: &mut PolyArena, rng: &mut Pcg64, m: i32, cur_cat: usize) {
        let rnd: f64 = rng.gen();
        let (continue_cat, new_cat) = if rnd <= self.cp_d1[[cur_cat, self.ncat - 1]] {
            let mut new_cat = 0;
            while new_cat < self.ncat - 1 && rnd > self.cp_d1[[cur_cat, new_cat]] {
                new_cat += 1;
            }
            (cur_cat, new_cat)
        } else if rnd <= self.cp_d2[[self.ncat - 1, cur_cat]] {
            let mut new_cat = 0;
            while new_cat < self.ncat - 1 && rnd > self.cp_d2[[new_cat, cur_cat]] {
                new_cat += 1;
            }
            (new_cat, new_cat)
        } else {
            return;
        };

        self.bcount += 1;
        let Some(m1) = arena.request_arm() else {
            return;
        };
        arena.armupdown(m, m1);
        let Some(m2) = arena.request_arm() else {
            return;
        };
        arena.armupdown(m, m2);

        let len1 = self.calclength(rng, continue_cat);
        {
            let arm = arena.arm_mut(m1);
            arm.arm_len = len1;
            arm.armcat = continue_cat;
        }
        let len2 = self.calclength(rng, new_cat);
        {
            let arm = arena.arm_mut(m2);
            arm.arm_len = len2;
            arm.armcat = new_cat;
        }

        arena.arm_mut(m).r1 = m1;
        arena.arm_mut(m1).l2 = -m;
        arena.arm_mut(m).r2 = -m2;
        arena.arm_mut(m2).r1 = -m;
        arena.arm_mut(m1).l1 = -m2;
        arena.arm_mut(m2).r2 = m1;

        self.grow(arena, rng, 1, m1, continue_cat);
        self.grow(arena, rng, -1, m2, new_cat);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::ArenaLimits;
    use crate::context::Params;
    use crate::polygen::generate_ensemble;
    use float_cmp::assert_approx_eq;

    fn two_sites(kp1: f64, kp2: f64) -> Vec<CatalystSite> {
        vec![
            CatalystSite {
                kp: kp1,
                kdb: 0.02,
                ks: 0.01,
                kplcb: 5.0,
                yconc: 1.0e-6,
            },
            CatalystSite {
                kp: kp2,
                kdb: 0.02,
                ks: 0.01,
                kplcb: 5.0,
                yconc: 1.0e-6,
            },
        ]
    }

    #[test]
    fn tables_are_cumulative() {
        let gen = MultiMetCstr::new(&two_sites(2000.0, 1000.0), 500.0, 2.0, 5000);
        assert_approx_eq!(f64, gen.cp_m[1], 1.0);
        assert!(gen.cp_m[0] > 0.0 && gen.cp_m[0] < 1.0);
        // the faster catalyst grows longer segments
        assert!(gen.mean_len(0) > gen.mean_len(1));
        for i in 0..2 {
            assert!(gen.cp_u[[i, 1]] >= gen.cp_u[[i, 0]]);
            assert!(gen.cp_d2[[1, i]] >= gen.cp_d2[[0, i]]);
        }
    }

    #[test]
    fn exchanging_catalysts_mirrors_the_tables() {
        let ab = MultiMetCstr::new(&two_sites(2000.0, 1000.0), 500.0, 2.0, 5000);
        let ba = MultiMetCstr::new(&two_sites(1000.0, 2000.0), 500.0, 2.0, 5000);
        assert_approx_eq!(f64, ab.mean_len(0), ba.mean_len(1), epsilon = 1.0e-12);
        assert_approx_eq!(f64, ab.mean_len(1), ba.mean_len(0), epsilon = 1.0e-12);
        assert_approx_eq!(
            f64,
            ab.cp_u[[0, 0]],
            ba.cp_u[[1, 1]] - ba.cp_u[[1, 0]],
            epsilon = 1.0e-12
        );
    }

    #[test]
    fn generates_branched_ensembles() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 100_000,
            max_poly: 5_000,
        });
        let mut ctx = Context::seeded(Params::default(), 77);
        let mut dist = Ensemble::new("mulmet", 28.0, 1120.0);
        dist.bobinit();
        let mut gen = MultiMetCstr::new(&two_sites(2000.0, 1000.0), 500.0, 2.0, 5000);
        generate_ensemble(&mut arena, &mut ctx, &mut dist, 500, |arena, ctx, dist, n| {
            gen.make(arena, ctx, dist, None, n)
        })
        .unwrap();
        assert!(!dist.error);
        dist.molbin(&arena);
        assert!(dist.m_w > 0.0);
        // each segment remembers its catalyst
        let mut cats_seen = std::collections::HashSet::new();
        for &p in &dist.polymers {
            for m in arena.segments_of(p) {
                cats_seen.insert(arena.arm(m).armcat);
            }
        }
        assert!(cats_seen.len() == 2);
    }
}
