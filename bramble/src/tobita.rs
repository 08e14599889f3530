//! Tobita free-radical polymerization, batch and CSTR variants.
//!
//! Molecules are grown backwards from a randomly chosen creation
//! conversion. Each segment is truncated at the earlier of the next
//! scission point and the next branch point; branch points recurse into two
//! child segments, chain ends choose among termination-by-combination,
//! scission reactivation and transfer branching with their relative
//! populations. The two reactor variants share the growth skeleton and
//! differ only in their kinetics, so the event densities sit behind a
//! trait.

use crate::arena::PolyArena;
use crate::context::Context;
use crate::ensemble::Ensemble;
use crate::polygen::{finish_molecule, ArchAnalysis};
use rand::Rng;
use rand_pcg::Pcg64;

/// Event densities of a Tobita-style free-radical reactor.
pub trait TobitaKinetics {
    /// Creation conversion of the very first segment.
    fn first_conv(&self, rng: &mut Pcg64) -> f64;
    /// Initial length of a segment grown at `conv`.
    fn calclength(&self, rng: &mut Pcg64, conv: f64) -> f64;
    /// Length to the next scission point at `conv`.
    fn scilength(&self, rng: &mut Pcg64, conv: f64) -> f64;
    /// Length to the next branch point at `conv`.
    fn brlength(&self, rng: &mut Pcg64, conv: f64) -> f64;
    /// Conversion of an older segment reached through a branch point.
    fn getconv1(&self, rng: &mut Pcg64, cur_conv: f64) -> f64;
    /// Conversion of a newer segment grown from a scission or branch point.
    fn getconv2(&self, rng: &mut Pcg64, cur_conv: f64) -> f64;
    /// Chain-end event probabilities at `conv`:
    /// `(combination, transfer-branching, scission)`.
    fn end_probs(&self, conv: f64) -> (f64, f64, f64);
}

/// Batch-reactor kinetics: final conversion, transfer-to-monomer `τ`,
/// combination `β`, scission `Cs` and branching `Cb` constants. Event
/// densities depend on how far the local conversion lags the final one.
pub struct BatchKinetics {
    fin_conv: f64,
    tau: f64,
    beta: f64,
    cs: f64,
    cb: f64,
}

impl TobitaKinetics for BatchKinetics {
    fn first_conv(&self, rng: &mut Pcg64) -> f64 {
        self.getconv1(rng, self.fin_conv)
    }

    fn calclength(&self, rng: &mut Pcg64, conv: f64) -> f64 {
        let sigma = self.cs * conv / (1.0 - conv);
        let lambda = self.cb * conv / (1.0 - conv);
        let pref = self.tau + self.beta + sigma + lambda;
        clip_length(-nonzero(rng).ln() / pref)
    }

    fn scilength(&self, rng: &mut Pcg64, conv: f64) -> f64 {
        let eta = self.cs * ((1.0 - conv) / (1.0 - self.fin_conv)).ln() + 1.0e-80;
        clip_length(-nonzero(rng).ln() / eta)
    }

    fn brlength(&self, rng: &mut Pcg64, conv: f64) -> f64 {
        let rho = self.cb * ((1.0 - conv) / (1.0 - self.fin_conv)).ln();
        -nonzero(rng).ln() / rho
    }

    fn getconv1(&self, rng: &mut Pcg64, cur_conv: f64) -> f64 {
        rng.gen::<f64>() * cur_conv
    }

    fn getconv2(&self, rng: &mut Pcg64, cur_conv: f64) -> f64 {
        let rnd: f64 = rng.gen();
        1.0 - (1.0 - cur_conv) * (-rnd * ((1.0 - cur_conv) / (1.0 - self.fin_conv)).ln()).exp()
    }

    fn end_probs(&self, conv: f64) -> (f64, f64, f64) {
        let sigma = self.cs * conv / (1.0 - conv);
        let lambda = self.cb * conv / (1.0 - conv);
        let pref = self.tau + self.beta + sigma + lambda;
        (self.beta / pref, lambda / pref, sigma / pref)
    }
}

/// Steady-state CSTR kinetics: all four event rates are constants, and the
/// "conversion" coordinate is the negative log-residence of the segment.
pub struct CstrKinetics {
    tau: f64,
    beta: f64,
    sigma: f64,
    lambda: f64,
}

impl CstrKinetics {
    fn pref(&self) -> f64 {
        self.tau + self.beta + self.sigma + self.lambda
    }

    fn siglam(&self) -> f64 {
        self.sigma + self.lambda
    }
}

impl TobitaKinetics for CstrKinetics {
    fn first_conv(&self, rng: &mut Pcg64) -> f64 {
        self.getconv1(rng, 0.0)
    }

    fn calclength(&self, rng: &mut Pcg64, _conv: f64) -> f64 {
        clip_length(-nonzero(rng).ln() / self.pref())
    }

    fn scilength(&self, rng: &mut Pcg64, conv: f64) -> f64 {
        let eta = (self.sigma / self.siglam()) * (1.0 - (self.siglam() * conv).exp()) + 1.0e-80;
        clip_length(-nonzero(rng).ln() / eta)
    }

    fn brlength(&self, rng: &mut Pcg64, conv: f64) -> f64 {
        let rho = (self.lambda / self.siglam()) * (1.0 - (self.siglam() * conv).exp()) + 1.0e-80;
        -nonzero(rng).ln() / rho
    }

    fn getconv1(&self, rng: &mut Pcg64, cur_conv: f64) -> f64 {
        cur_conv + nonzero(rng).ln()
    }

    fn getconv2(&self, rng: &mut Pcg64, cur_conv: f64) -> f64 {
        rng.gen::<f64>() * cur_conv
    }

    fn end_probs(&self, _conv: f64) -> (f64, f64, f64) {
        let pref = self.pref();
        (self.beta / pref, self.lambda / pref, self.sigma / pref)
    }
}

/// The recursive grower shared by both Tobita variants.
pub struct TobitaGen<K> {
    kin: K,
    max_rlevel: usize,
    bcount: i32,
    rlevel: usize,
    overflow: bool,
}

/// Tobita batch generator.
pub type TobitaBatch = TobitaGen<BatchKinetics>;

/// Tobita CSTR generator.
pub type TobitaCstr = TobitaGen<CstrKinetics>;

impl TobitaBatch {
    /// Creates a batch generator for the given reactor recipe.
    #[must_use]
    pub fn batch(
        fin_conv: f64,
        tau: f64,
        beta: f64,
        cs: f64,
        cb: f64,
        max_rlevel: usize,
    ) -> Self {
        Self::with_kinetics(
            BatchKinetics {
                fin_conv,
                tau,
                beta,
                cs,
                cb,
            },
            max_rlevel,
        )
    }
}

impl TobitaCstr {
    /// Creates a steady-state CSTR generator.
    #[must_use]
    pub fn cstr(tau: f64, beta: f64, sigma: f64, lambda: f64, max_rlevel: usize) -> Self {
        Self::with_kinetics(
            CstrKinetics {
                tau,
                beta,
                sigma,
                lambda,
            },
            max_rlevel,
        )
    }
}

impl<K: TobitaKinetics> TobitaGen<K> {
    /// Wraps arbitrary kinetics in the shared grower.
    #[must_use]
    pub fn with_kinetics(kin: K, max_rlevel: usize) -> Self {
        Self {
            kin,
            max_rlevel,
            bcount: 0,
            rlevel: 0,
            overflow: false,
        }
    }

    /// Grows one molecule into polymer record `n`. Returns `false` when the
    /// arena ran out of segments or the recursion cap fired; the caller
    /// discards the record.
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
        let cur_conv = self.kin.first_conv(rng);

        if let Some(m) = arena.request_arm() {
            arena.poly_mut(n).first_end = m;
            let seg_len = self.kin.calclength(rng, cur_conv);
            {
                let arm = arena.arm_mut(m);
                arm.arm_len = seg_len;
                arm.arm_conv = cur_conv;
            }
            self.rlevel = 0;
            self.grow(arena, rng, 1, m, cur_conv, true);

            if let Some(m1) = arena.request_arm() {
                arena.arm_mut(m).l1 = -m1;
                arena.arm_mut(m1).r2 = m;
                arena.armupdown(m, m1);
                let seg_len = self.kin.calclength(rng, cur_conv);
                {
                    let arm = arena.arm_mut(m1);
                    arm.arm_len = seg_len;
                    arm.arm_conv = cur_conv;
                }
                self.rlevel = 0;
                self.grow(arena, rng, -1, m1, cur_conv, true);
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
        sc_tag: bool,
    ) {
        self.rlevel += 1;
        if self.rlevel > self.max_rlevel || self.overflow {
            self.overflow = true;
            return;
        }

        if arena.arms_avail {
            let seg_len = self.kin.scilength(rng, cur_conv);
            if sc_tag && seg_len < arena.arm(m).arm_len {
                let arm = arena.arm_mut(m);
                arm.arm_len = seg_len;
                arm.scission = true;
            }
            let seg_len = self.kin.brlength(rng, cur_conv);
            if seg_len < arena.arm(m).arm_len {
                self.branch_point(arena, rng, dir, m, cur_conv, seg_len);
            } else {
                self.chain_end(arena, rng, dir, m, cur_conv);
            }
        }
        self.rlevel -= 1;
    }

    /// Splits segment `m` at `seg_len`: the outer remainder `m1` continues
    /// the chain, a fresh segment `m2` grows out of the new branch point.
    fn branch_point(
        &mut self,
        arena: &mut PolyArena,
        rng: &mut Pcg64,
        dir: i32,
        m: i32,
        cur_conv: f64,
        seg_len: f64,
    ) {
        self.bcount += 1;
        let Some(m1) = arena.request_arm() else {
            return;
        };
        arena.armupdown(m, m1);
        let Some(m2) = arena.request_arm() else {
            return;
        };
        arena.armupdown(m, m2);

        {
            let rest = arena.arm(m).arm_len - seg_len;
            let scission = arena.arm(m).scission;
            let arm1 = arena.arm_mut(m1);
            arm1.arm_len = rest;
            arm1.arm_conv = cur_conv;
            arm1.scission = scission;
        }
        {
            let arm = arena.arm_mut(m);
            arm.arm_len = seg_len;
            arm.scission = false;
        }
        let new_conv = self.kin.getconv2(rng, cur_conv);
        let new_len = self.kin.calclength(rng, new_conv);
        {
            let arm2 = arena.arm_mut(m2);
            arm2.arm_len = new_len;
            arm2.arm_conv = new_conv;
        }

        if dir > 0 {
            arena.arm_mut(m).r1 = m1;
            arena.arm_mut(m1).l2 = -m;
            arena.arm_mut(m1).l1 = m2;
            arena.arm_mut(m2).l2 = m1;
            arena.arm_mut(m).r2 = m2;
            arena.arm_mut(m2).l1 = -m;
        } else {
            arena.arm_mut(m).l1 = -m1;
            arena.arm_mut(m1).r2 = m;
            arena.arm_mut(m1).r1 = m2;
            arena.arm_mut(m2).l2 = -m1;
            arena.arm_mut(m).l2 = m2;
            arena.arm_mut(m2).l1 = m;
        }
        self.grow(arena, rng, 1, m2, new_conv, true);
        self.grow(arena, rng, dir, m1, cur_conv, false);
    }

    fn chain_end(
        &mut self,
        arena: &mut PolyArena,
        rng: &mut Pcg64,
        dir: i32,
        m: i32,
        cur_conv: f64,
    ) {
        if arena.arm(m).scission {
            // half of the scission points have regrown
            if rng.gen::<f64>() < 0.5 {
                let new_conv = self.kin.getconv2(rng, cur_conv);
                let Some(m1) = arena.request_arm() else {
                    return;
                };
                arena.armupdown(m, m1);
                let seg_len = self.kin.calclength(rng, new_conv);
                {
                    let arm = arena.arm_mut(m1);
                    arm.arm_len = seg_len;
                    arm.arm_conv = new_conv;
                }
                if dir > 0 {
                    arena.arm_mut(m).r1 = m1;
                    arena.arm_mut(m1).l2 = -m;
                } else {
                    arena.arm_mut(m).l1 = m1;
                    arena.arm_mut(m1).l2 = m;
                }
                self.grow(arena, rng, 1, m1, new_conv, true);
            }
            return;
        }

        let (p_beta, p_lambda, p_sigma) = self.kin.end_probs(cur_conv);

        if dir > 0 {
            // growing to the right: the only event is combination
            if rng.gen::<f64>() < p_beta {
                let Some(m1) = arena.request_arm() else {
                    return;
                };
                arena.armupdown(m, m1);
                let seg_len = self.kin.calclength(rng, cur_conv);
                {
                    let arm = arena.arm_mut(m1);
                    arm.arm_len = seg_len;
                    arm.arm_conv = cur_conv;
                }
                arena.arm_mut(m).r1 = -m1;
                arena.arm_mut(m1).r2 = -m;
                self.grow(arena, rng, -1, m1, cur_conv, true);
            }
            return;
        }

        // growing to the left: transfer branching or scission reactivation
        let rnd: f64 = rng.gen();
        if rnd < p_lambda {
            self.bcount += 1;
            let new_conv = self.kin.getconv1(rng, cur_conv);
            let Some(m1) = arena.request_arm() else {
                return;
            };
            arena.armupdown(m, m1);
            let Some(m2) = arena.request_arm() else {
                return;
            };
            arena.armupdown(m, m2);
            let seg_len = self.kin.calclength(rng, new_conv);
            {
                let arm = arena.arm_mut(m1);
                arm.arm_len = seg_len;
                arm.arm_conv = new_conv;
            }
            arena.arm_mut(m).l1 = m1;
            arena.arm_mut(m1).l2 = m;
            self.grow(arena, rng, 1, m1, new_conv, true);
            let seg_len = self.kin.calclength(rng, new_conv);
            {
                let arm = arena.arm_mut(m2);
                arm.arm_len = seg_len;
                arm.arm_conv = new_conv;
            }
            arena.arm_mut(m).l2 = -m2;
            arena.arm_mut(m2).r1 = m;
            arena.arm_mut(m1).l1 = -m2;
            arena.arm_mut(m2).r2 = m1;
            self.grow(arena, rng, -1, m2, new_conv, true);
        } else if rnd < p_sigma + p_lambda {
            let new_conv = self.kin.getconv1(rng, cur_conv);
            let Some(m1) = arena.request_arm() else {
                return;
            };
            arena.armupdown(m, m1);
            let seg_len = self.kin.calclength(rng, new_conv);
            {
                let arm = arena.arm_mut(m1);
                arm.arm_len = seg_len;
                arm.arm_conv = new_conv;
            }
            if rng.gen::<f64>() <= 0.5 {
                arena.arm_mut(m).l1 = m1;
                arena.arm_mut(m1).l2 = m;
                self.grow(arena, rng, 1, m1, new_conv, true);
            } else {
                arena.arm_mut(m).l2 = -m1;
                arena.arm_mut(m1).r1 = m;
                self.grow(arena, rng, -1, m1, new_conv, true);
            }
        }
        // grew from initiation: nothing to add
    }
}

/// A unit-interval draw with zero mapped away from the logarithm.
pub(crate) fn nonzero(rng: &mut Pcg64) -> f64 {
    let rnd: f64 = rng.gen();
    if rnd == 0.0 {
        1.0
    } else {
        rnd
    }
}

/// Lengths below 1000 monomers are quantized upward to whole monomers.
pub(crate) fn clip_length(r: f64) -> f64 {
    if r < 1000.0 {
        r.trunc() + 1.0
    } else {
        r
    }
}
