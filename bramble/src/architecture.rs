//! Seniority and priority assignment, molecule classification and the
//! architecture histograms.
//!
//! Seniority of a segment is the number of segments on the way to the
//! furthest free end reachable on its cheaper side; priority is the number
//! of free ends hanging off its cheaper side. Both are assigned level by
//! level: free ends are level 1, and a segment gains level `k` as soon as
//! one of its sides has both neighbors assigned with the right combination.

use crate::arena::PolyArena;
use crate::context::PrioMode;
use crate::ensemble::{Ensemble, MAX_NBR_BINS};
use crate::topology::{set_tmpflag_left, set_tmpflag_right};
use serde::{Deserialize, Serialize};

/// Assigns `seniority` to every segment of polymer `n` and records the
/// maximum on the polymer.
pub fn calc_seniority(arena: &mut PolyArena, n: i32) {
    let segs = arena.segments_of(n);
    let armnum = segs.len();
    let mut nassigned = 0;

    for &m in &segs {
        if arena.arm(m).has_free_end() {
            arena.arm_mut(m).seniority = 1;
            nassigned += 1;
        } else {
            arena.arm_mut(m).seniority = 0;
        }
    }
    if nassigned == armnum {
        arena.poly_mut(n).max_senio = 1;
        return;
    }

    let mut sen_level = 2;
    // every pass over the ring assigns at least one segment
    while nassigned < armnum {
        for &m in &segs {
            if arena.arm(m).seniority != 0 {
                continue;
            }
            let (l1, l2, r1, r2) = {
                let arm = arena.arm(m);
                (arm.l1, arm.l2, arm.r1, arm.r2)
            };
            let sen = |e: i32| arena.arm(e).seniority;
            let (sl1, sl2) = (sen(l1), sen(l2));
            let (sr1, sr2) = (sen(r1), sen(r2));
            let max_l = sl1.max(sl2);
            let max_r = sr1.max(sr2);
            if (sl1 != 0 && sl2 != 0 && max_l == sen_level - 1)
                || (sr1 != 0 && sr2 != 0 && max_r == sen_level - 1)
            {
                arena.arm_mut(m).seniority = sen_level;
                nassigned += 1;
            }
        }
        sen_level += 1;
        if sen_level as usize > armnum + 1 {
            break;
        }
    }
    arena.poly_mut(n).max_senio = segs
        .iter()
        .map(|&m| arena.arm(m).seniority)
        .max()
        .unwrap_or(1);
}

/// Assigns `priority` to every segment of polymer `n`. With
/// [`PrioMode::EntangledOnly`] the side counts skip free ends shorter than
/// one entanglement.
pub fn calc_priority(arena: &mut PolyArena, n: i32, mode: PrioMode) {
    match mode {
        PrioMode::All => calc_priority_levels(arena, n),
        PrioMode::EntangledOnly => calc_priority_walk(arena, n),
    }
}

fn calc_priority_levels(arena: &mut PolyArena, n: i32) {
    let segs = arena.segments_of(n);
    let armnum = segs.len();
    let mut nassigned = 0;

    for &m in &segs {
        if arena.arm(m).has_free_end() {
            arena.arm_mut(m).priority = 1;
            nassigned += 1;
        } else {
            arena.arm_mut(m).priority = 0;
        }
    }
    if nassigned == armnum {
        arena.poly_mut(n).max_prio = 1;
        return;
    }

    let mut prio_level = 2;
    while nassigned < armnum {
        for &m in &segs {
            if arena.arm(m).priority != 0 {
                continue;
            }
            let (l1, l2, r1, r2) = {
                let arm = arena.arm(m);
                (arm.l1, arm.l2, arm.r1, arm.r2)
            };
            let prio = |e: i32| arena.arm(e).priority;
            let (pl1, pl2) = (prio(l1), prio(l2));
            let (pr1, pr2) = (prio(r1), prio(r2));
            if (pl1 != 0 && pl2 != 0 && pl1 + pl2 == prio_level)
                || (pr1 != 0 && pr2 != 0 && pr1 + pr2 == prio_level)
            {
                arena.arm_mut(m).priority = prio_level;
                nassigned += 1;
            }
        }
        prio_level += 1;
        if prio_level as usize > armnum + 1 {
            break;
        }
    }
    arena.poly_mut(n).max_prio = segs
        .iter()
        .map(|&m| arena.arm(m).priority)
        .max()
        .unwrap_or(1);
}

/// Entangled-only priority: count the free ends longer than one entanglement
/// on each side of every interior segment via the tri-color walks.
fn calc_priority_walk(arena: &mut PolyArena, n: i32) {
    let segs = arena.segments_of(n);
    for &m in &segs {
        if arena.arm(m).has_free_end() {
            arena.arm_mut(m).priority = 1;
            continue;
        }
        let count_flagged = |arena: &PolyArena| {
            let mut count = 0;
            arena.for_each_segment(n, |_, arm| {
                if arm.tmpflag && arm.free_end && arm.arm_len > 1.0 {
                    count += 1;
                }
            });
            count
        };
        set_tmpflag_left(arena, n, m);
        let m_l = count_flagged(arena).max(1);
        set_tmpflag_right(arena, n, m);
        let m_r = count_flagged(arena).max(1);
        arena.arm_mut(m).priority = m_l.min(m_r);
    }
    crate::topology::unset_tmpflag(arena, n);
    arena.poly_mut(n).max_prio = segs
        .iter()
        .map(|&m| arena.arm(m).priority)
        .max()
        .unwrap_or(1);
}

/// Classifies polymer `npoly` by segment count (after cleanup a linear is a
/// single segment) and updates the ensemble counters.
pub fn save_architect(arena: &PolyArena, dist: &mut Ensemble, npoly: i32) {
    let wt = arena.poly(npoly).tot_len * dist.monmass;
    let segs = arena.segments_of(npoly);
    let counts = &mut dist.arch.counts;
    match segs.len() {
        1 => {
            counts.lin += 1;
            counts.wlin += wt;
        }
        3 => {
            counts.star += 1;
            counts.wstar += wt;
        }
        5 => {
            counts.h += 1;
            counts.wh += wt;
        }
        7 => {
            counts.seven_arm += 1;
            counts.wseven_arm += wt;
        }
        _ => {
            // a comb has a seniority-1 neighbor on some side of every
            // interior segment
            let is_comb = segs.iter().all(|&m| {
                let arm = arena.arm(m);
                if arm.seniority <= 1 {
                    return true;
                }
                let senio = |e: i32| arena.arm(e).seniority;
                (senio(arm.l1) == 1 || senio(arm.l2) == 1)
                    || (senio(arm.r1) == 1 || senio(arm.r2) == 1)
            });
            if is_comb {
                counts.comb += 1;
                counts.wcomb += wt;
            } else {
                counts.other += 1;
                counts.wother += wt;
            }
        }
    }
}

/// Running seniority-versus-priority averages over an ensemble.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct PrioSenioTable {
    sphi_avsenio_v_prio: Vec<f64>,
    sphi_avprio_v_senio: Vec<f64>,
    avsenio_v_prio: Vec<f64>,
    avprio_v_senio: Vec<f64>,
    avarmlen_v_senio: Vec<f64>,
    avarmlen_v_prio: Vec<f64>,
    n_armlen_v_senio: Vec<usize>,
    n_armlen_v_prio: Vec<usize>,
    proba_prio: Vec<f64>,
    proba_senio: Vec<f64>,
    n_polymer: usize,
}

impl PrioSenioTable {
    fn grow(&mut self, level: usize) {
        let need = level + 1;
        if self.sphi_avsenio_v_prio.len() < need {
            self.sphi_avsenio_v_prio.resize(need, 0.0);
            self.sphi_avprio_v_senio.resize(need, 0.0);
            self.avsenio_v_prio.resize(need, 0.0);
            self.avprio_v_senio.resize(need, 0.0);
            self.avarmlen_v_senio.resize(need, 0.0);
            self.avarmlen_v_prio.resize(need, 0.0);
            self.n_armlen_v_senio.resize(need, 0);
            self.n_armlen_v_prio.resize(need, 0);
            self.proba_prio.resize(need, 0.0);
            self.proba_senio.resize(need, 0.0);
        }
    }

    /// Accumulates every segment of polymer `npoly` into the averages.
    pub fn bin_polymer(&mut self, arena: &PolyArena, npoly: i32) {
        let totlen = arena.poly(npoly).tot_len;
        for m in arena.segments_of(npoly) {
            let arm = arena.arm(m);
            let p = arm.priority.max(0) as usize;
            let s = arm.seniority.max(0) as usize;
            self.grow(p.max(s));
            let phi = arm.arm_len / totlen;

            self.avprio_v_senio[s] += phi * p as f64;
            self.sphi_avprio_v_senio[s] += phi;
            self.avsenio_v_prio[p] += phi * s as f64;
            self.sphi_avsenio_v_prio[p] += phi;
            self.avarmlen_v_senio[s] += arm.arm_len;
            self.n_armlen_v_senio[s] += 1;
            self.avarmlen_v_prio[p] += arm.arm_len;
            self.n_armlen_v_prio[p] += 1;
            self.proba_prio[p] += phi;
            self.proba_senio[s] += phi;
        }
        self.n_polymer += 1;
    }

    /// Mass-weighted average priority at seniority `s`.
    #[must_use]
    pub fn avprio_v_senio(&self, s: usize) -> f64 {
        if s < self.sphi_avprio_v_senio.len() && self.sphi_avprio_v_senio[s] != 0.0 {
            self.avprio_v_senio[s] / self.sphi_avprio_v_senio[s]
        } else {
            0.0
        }
    }

    /// Mass-weighted average seniority at priority `p`.
    #[must_use]
    pub fn avsenio_v_prio(&self, p: usize) -> f64 {
        if p < self.sphi_avsenio_v_prio.len() && self.sphi_avsenio_v_prio[p] != 0.0 {
            self.avsenio_v_prio[p] / self.sphi_avsenio_v_prio[p]
        } else {
            0.0
        }
    }

    /// Average arm length (mass units of `monmass`) at seniority `s`.
    #[must_use]
    pub fn avarmlen_v_senio(&self, s: usize, monmass: f64) -> f64 {
        if s < self.n_armlen_v_senio.len() && self.n_armlen_v_senio[s] != 0 {
            self.avarmlen_v_senio[s] / self.n_armlen_v_senio[s] as f64 * monmass
        } else {
            0.0
        }
    }

    /// Average arm length at priority `p`.
    #[must_use]
    pub fn avarmlen_v_prio(&self, p: usize, monmass: f64) -> f64 {
        if p < self.n_armlen_v_prio.len() && self.n_armlen_v_prio[p] != 0 {
            self.avarmlen_v_prio[p] / self.n_armlen_v_prio[p] as f64 * monmass
        } else {
            0.0
        }
    }

    /// Probability that a monomer sits in a priority-`p` segment.
    #[must_use]
    pub fn proba_prio(&self, p: usize) -> f64 {
        if self.n_polymer != 0 && p < self.proba_prio.len() {
            self.proba_prio[p] / self.n_polymer as f64
        } else {
            0.0
        }
    }

    /// Probability that a monomer sits in a seniority-`s` segment.
    #[must_use]
    pub fn proba_senio(&self, s: usize) -> f64 {
        if self.n_polymer != 0 && s < self.proba_senio.len() {
            self.proba_senio[s] / self.n_polymer as f64
        } else {
            0.0
        }
    }
}

/// Initializes the arm-length and branch-point histograms of an ensemble for
/// the weight window `[arch_minwt, arch_maxwt]`.
pub fn init_arch_bins(dist: &mut Ensemble) {
    let maxwt = if dist.arch_maxwt.is_finite() {
        dist.arch_maxwt
    } else {
        1.0e10
    };
    let lgmax = (maxwt * 1.01).log10();
    let lgmin = (dist.monmass / 1.01).log10();
    let nbin = (((lgmax - lgmin) * 10.0) as usize).max(1);
    dist.arch.armwt_lgmin = lgmin;
    dist.arch.armwt_lgstep = (lgmax - lgmin) / nbin as f64;
    dist.arch.numin_armwt_bin = vec![0; nbin + 1];
    dist.arch.numin_num_br_bin = vec![0; MAX_NBR_BINS];
    dist.arch.max_num_br = 0;
    dist.arch.counts = Default::default();
    dist.arch.max_prio = 0;
    dist.arch.max_senio = 0;
    dist.arch.nsaved_arch = 0;
}

/// Runs seniority/priority on polymer `npoly` if its weight falls in the
/// window, then classifies it and bins its statistics.
pub fn senio_prio(
    arena: &mut PolyArena,
    dist: &mut Ensemble,
    table: &mut PrioSenioTable,
    npoly: i32,
    mode: PrioMode,
) {
    let wt = arena.poly(npoly).tot_len * dist.monmass;
    if wt > dist.arch_maxwt || wt < dist.arch_minwt {
        return;
    }
    calc_seniority(arena, npoly);
    calc_priority(arena, npoly, mode);
    let poly = arena.poly(npoly);
    dist.arch.max_prio = dist.arch.max_prio.max(poly.max_prio);
    dist.arch.max_senio = dist.arch.max_senio.max(poly.max_senio);
    save_architect(arena, dist, npoly);
    dist.arch.nsaved_arch += 1;
    table.bin_polymer(arena, npoly);
}

/// Bins the arm lengths and branch-point count of polymer `npoly`.
pub fn bin_arm_length(arena: &PolyArena, dist: &mut Ensemble, npoly: i32) {
    let wt = arena.poly(npoly).tot_len * dist.monmass;
    if wt > dist.arch_maxwt || wt < dist.arch_minwt {
        return;
    }

    let num_br = arena.poly(npoly).num_br.max(0) as usize;
    dist.arch.max_num_br = dist.arch.max_num_br.max(num_br);
    if num_br < dist.arch.numin_num_br_bin.len() {
        dist.arch.numin_num_br_bin[num_br] += 1;
    }

    let nbin = dist.arch.numin_armwt_bin.len() - 1;
    for m in arena.segments_of(npoly) {
        let warm = arena.arm(m).arm_len * dist.monmass;
        let raw =
            ((warm.log10() - dist.arch.armwt_lgmin) / dist.arch.armwt_lgstep).trunc() as i64 + 1;
        let ibin = raw.clamp(1, nbin as i64) as usize;
        dist.arch.numin_armwt_bin[ibin] += 1;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::{ArenaLimits, PolyArena};
    use crate::relax::poly_start;
    use crate::templates::polygen_h;

    fn arena() -> PolyArena {
        PolyArena::new(ArenaLimits {
            max_arm: 64,
            max_poly: 4,
        })
    }

    #[test]
    fn h_polymer_priorities_and_seniorities() {
        let mut arena = arena();
        let p = arena.request_poly().unwrap();
        assert!(polygen_h(&mut arena, p, &[25.0, 25.0, 50.0, 25.0, 25.0]));
        poly_start(&mut arena, p, 1.0);

        calc_seniority(&mut arena, p);
        calc_priority(&mut arena, p, PrioMode::All);

        let segs = arena.segments_of(p);
        let senio: Vec<i32> = segs.iter().map(|&m| arena.arm(m).seniority).collect();
        let prio: Vec<i32> = segs.iter().map(|&m| arena.arm(m).priority).collect();
        assert_eq!(senio, vec![1, 1, 2, 1, 1]);
        assert_eq!(prio, vec![1, 1, 2, 1, 1]);
        assert_eq!(arena.poly(p).max_senio, 2);
        assert_eq!(arena.poly(p).max_prio, 2);
    }

    #[test]
    fn entangled_only_ignores_short_hangs() {
        let mut arena = arena();
        let p = arena.request_poly().unwrap();
        // H with sub-entanglement outer arms: the crossbar sees one
        // effective end per side
        assert!(polygen_h(&mut arena, p, &[0.5, 0.5, 50.0, 0.5, 0.5]));
        poly_start(&mut arena, p, 1.0);
        calc_seniority(&mut arena, p);
        calc_priority(&mut arena, p, PrioMode::EntangledOnly);
        let segs = arena.segments_of(p);
        assert_eq!(arena.arm(segs[2]).priority, 1);
    }

    #[test]
    fn priority_sum_at_crossbar_matches_free_end_count() {
        let mut arena = arena();
        let p = arena.request_poly().unwrap();
        assert!(polygen_h(&mut arena, p, &[10.0, 10.0, 20.0, 10.0, 10.0]));
        poly_start(&mut arena, p, 1.0);
        calc_priority(&mut arena, p, PrioMode::All);
        let free_ends = arena.free_ends_of(p).len() as i32;
        // the maximum priority of an H equals half its free ends
        assert_eq!(arena.poly(p).max_prio * 2, free_ends);
    }
}
