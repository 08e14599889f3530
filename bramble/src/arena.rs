//! Preallocated arenas for segment and polymer records.
//!
//! All graph topology is expressed as signed `i32` indices into the segment
//! arena: index `0` means "no neighbor" and the sign of a non-zero entry
//! encodes the direction in which the neighbor is traversed when arriving
//! from the current segment. Slot `0` of both arenas is a permanently dead
//! sentinel so that following a zero index is harmless.

use serde::{Deserialize, Serialize};

/// Number of `(time, arm_len_eff)` samples kept per compound arm for the
/// Rouse-time interpolation of the nonlinear pipeline.
pub const FIT_SAMPLES: usize = 10;

/// One entanglement-length segment of a polymer graph.
#[derive(Clone, Debug, Default)]
pub struct Arm {
    /// Left-side neighbor pair (signed arena indices, 0 = none).
    pub l1: i32,
    /// Second left-side neighbor.
    pub l2: i32,
    /// Right-side neighbor pair.
    pub r1: i32,
    /// Second right-side neighbor.
    pub r2: i32,
    /// Forward link in the owning polymer's circular segment list.
    pub up: i32,
    /// Backward link in the owning polymer's circular segment list.
    pub down: i32,
    /// Forward link in the circular list of free-ended segments.
    pub free_up: i32,
    /// Backward link in the circular list of free-ended segments.
    pub free_down: i32,

    /// Segment length in units of entanglement lengths.
    pub arm_len: f64,
    /// Weight contribution of this segment to the whole ensemble.
    pub vol_fraction: f64,
    /// Monomer conversion at which the segment was created.
    pub arm_conv: f64,
    /// Catalyst index that grew the segment (multi-catalyst chemistries).
    pub armcat: usize,
    /// Whether the segment was terminated by chain scission.
    pub scission: bool,
    /// Polymer-local renumbering used by the configuration writer.
    pub armnum: i32,

    /// True while the segment has an unattached end.
    pub free_end: bool,
    /// True while the arm (or the compound arm owning it) still retracts.
    pub relaxing: bool,
    /// True once the arm owns more than one segment of tube.
    pub compound: bool,
    /// Scratch flag for the tri-color graph walks.
    pub tmpflag: bool,
    /// Outermost segment of the compound arm containing this one.
    pub relax_end: i32,
    /// Next inner segment of the compound arm (0 = none).
    pub nxt_relax: i32,

    /// Retraction coordinate, 0..`arm_len_end`.
    pub z: f64,
    /// Increment of `z` taken in the previous step.
    pub dz: f64,
    /// Effective retraction potential U(z).
    pub pot: f64,
    /// Accumulated `∫ exp(U) dz` for the Kramers first-passage time.
    pub pot_int: f64,
    /// Current Kramers first-passage time estimate.
    pub tau_k: f64,
    /// Rouse retraction prefactor `sqrt(3 π⁵ L³ / φ_init / 2)`.
    pub gamma2: f64,
    /// Current reach of the retraction front along the compound arm.
    pub arm_len_eff: f64,
    /// Terminal reach of the compound arm.
    pub arm_len_end: f64,
    /// Increment of `arm_len_eff` taken in the previous step.
    pub deltazeff: f64,
    /// Weighted-mean numerator for the diluted effective reach.
    pub zeff_numer: f64,
    /// Weighted-mean denominator for the diluted effective reach.
    pub zeff_denom: f64,
    /// Drag inherited from collapsed neighbors.
    pub extra_drag: f64,
    /// Head of the singly linked list of collapsed friction donors.
    pub next_friction: i32,
    /// First segment beyond the next branch point (unsigned, 0 = none).
    pub nxtbranch1: i32,
    /// Second segment beyond the next branch point.
    pub nxtbranch2: i32,

    /// Retraction coordinate reached the terminal reach.
    pub collapsed: bool,
    /// Collapsed with no side to keep retracting; drag pooled on the polymer.
    pub ghost: bool,
    /// Scheduled for removal from the free-end ring.
    pub prune: bool,
    /// The effective reach may not grow any further (stars, linears).
    pub freeze_arm_len_eff: bool,
    /// Time at which the arm collapsed.
    pub tau_collapse: f64,
    /// Unrelaxed fraction at the moment of collapse.
    pub phi_collapse: f64,

    /// Number of free ends hanging off the less populated side.
    pub priority: i32,
    /// Topological depth of the segment.
    pub seniority: i32,
    /// Position of this segment in the polycopy snapshot.
    pub copy_num: usize,

    /// Sampled Rouse/stretch time of the arm (flow pipeline).
    pub armtaus: f64,
    /// Drag coefficient sampled at snip time (flow pipeline).
    pub armzeta: f64,
    /// Time at which stretch of this segment started (flow pipeline).
    pub str_time: f64,

    /// Sample times for the compound-arm Rouse interpolation.
    pub fit_time: [f64; FIT_SAMPLES],
    /// Sampled effective reaches matching `fit_time`.
    pub fit_zeff: [f64; FIT_SAMPLES],
    /// Number of valid entries in `fit_time`/`fit_zeff`.
    pub fit_len: usize,
}

impl Arm {
    /// Returns the neighbor pair on the side away from the arena index
    /// `from`. Exactly one of the two sides must contain `from`.
    #[must_use]
    pub fn far_side(&self, from: i32) -> (i32, i32) {
        if self.l1.abs() == from || self.l2.abs() == from {
            (self.r1, self.r2)
        } else {
            (self.l1, self.l2)
        }
    }

    /// Returns true if one of the two neighbor pairs is empty.
    #[must_use]
    pub fn has_free_end(&self) -> bool {
        (self.l1 == 0 && self.l2 == 0) || (self.r1 == 0 && self.r2 == 0)
    }
}

/// One molecule: entry points into the segment rings plus per-molecule
/// relaxation bookkeeping.
#[derive(Clone, Debug, Default)]
pub struct Polymer {
    /// Any segment of the molecule's circular segment list.
    pub first_end: i32,
    /// Any free-ended segment; entry into the free-end ring.
    pub first_free: i32,
    /// Number of segments (`2·branches + 1` for a tree).
    pub num_branch: i32,
    /// Number of branch points recorded by the generator.
    pub num_br: i32,
    /// Total length in entanglement units.
    pub tot_len: f64,
    /// False once the molecule fully relaxed or reptated away.
    pub alive: bool,
    /// The molecule has at most two retracting ends left.
    pub linear_tag: bool,
    /// The in-between reptation schemes latched their tube dilution.
    pub rept_set: bool,
    /// Unrelaxed fraction cached when `rept_set` latched.
    pub phi_rept: f64,
    /// Weight fraction of the molecule that has relaxed so far.
    pub relaxed_frac: f64,
    /// Drag pooled from ghost arms.
    pub ghost_contrib: f64,
    /// Radius-of-gyration contraction factor g.
    pub gfactor: f64,
    /// Molar mass of the molecule.
    pub molmass: f64,
    /// Weight fraction of the molecule in the blend.
    pub wtfrac: f64,
    /// Largest segment priority in the molecule.
    pub max_prio: i32,
    /// Largest segment seniority in the molecule.
    pub max_senio: i32,
    /// Export bin the molecule was counted into (0 = none).
    pub bin: usize,
    /// Whether the molecule's arms are retained for export.
    pub saved: bool,
    /// Free-list threading for polymer records.
    pub next_poly: i32,
}

/// Capacity knobs for [`PolyArena::new`].
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct ArenaLimits {
    /// Number of segment records.
    pub max_arm: usize,
    /// Number of polymer records.
    pub max_poly: usize,
}

impl Default for ArenaLimits {
    fn default() -> Self {
        Self {
            max_arm: 1_000_000,
            max_poly: 1_000_000,
        }
    }
}

/// The preallocated segment and polymer pools.
pub struct PolyArena {
    arms: Vec<Arm>,
    polymers: Vec<Polymer>,
    first_arm_in_pool: i32,
    first_poly_in_pool: i32,
    /// Sticky availability flag; cleared when `request_arm` fails.
    pub arms_avail: bool,
    /// Sticky availability flag for polymer records.
    pub polys_avail: bool,
    arms_left: usize,
}

impl PolyArena {
    /// Allocates both pools and threads every record into its free list.
    #[must_use]
    pub fn new(limits: ArenaLimits) -> Self {
        let mut arena = Self {
            arms: vec![Arm::default(); limits.max_arm + 1],
            polymers: vec![Polymer::default(); limits.max_poly + 1],
            first_arm_in_pool: 1,
            first_poly_in_pool: 1,
            arms_avail: true,
            polys_avail: true,
            arms_left: limits.max_arm,
        };
        arena.thread_free_lists(1, 1);
        arena
    }

    fn thread_free_lists(&mut self, arm_from: usize, poly_from: usize) {
        let max_arm = self.arms.len() - 1;
        for i in arm_from..=max_arm {
            self.arms[i].l1 = i as i32 - 1;
            self.arms[i].r1 = i as i32 + 1;
        }
        self.arms[arm_from].l1 = 0;
        self.arms[max_arm].r1 = 0;

        let max_poly = self.polymers.len() - 1;
        for i in poly_from..max_poly {
            self.polymers[i].next_poly = i as i32 + 1;
        }
        self.polymers[max_poly].next_poly = 0;
    }

    /// Shared access to a segment record by (possibly signed) index.
    #[must_use]
    pub fn arm(&self, m: i32) -> &Arm {
        &self.arms[m.unsigned_abs() as usize]
    }

    /// Mutable access to a segment record by (possibly signed) index.
    pub fn arm_mut(&mut self, m: i32) -> &mut Arm {
        &mut self.arms[m.unsigned_abs() as usize]
    }

    /// Shared access to a polymer record.
    #[must_use]
    pub fn poly(&self, n: i32) -> &Polymer {
        &self.polymers[n.unsigned_abs() as usize]
    }

    /// Mutable access to a polymer record.
    pub fn poly_mut(&mut self, n: i32) -> &mut Polymer {
        &mut self.polymers[n.unsigned_abs() as usize]
    }

    /// Number of segment records still in the free list.
    #[must_use]
    pub const fn arms_left(&self) -> usize {
        self.arms_left
    }

    /// Pops a segment record off the free list. Returns `None` (and latches
    /// `arms_avail = false`) when the pool is exhausted; the caller must
    /// unwind the partial molecule.
    pub fn request_arm(&mut self) -> Option<i32> {
        let m = self.first_arm_in_pool;
        if self.arms[m as usize].r1 == 0 {
            self.arms_avail = false;
            return None;
        }
        self.first_arm_in_pool = self.arms[m as usize].r1;
        self.arms[self.first_arm_in_pool as usize].l1 = 0;
        let arm = &mut self.arms[m as usize];
        *arm = Arm {
            up: m,
            down: m,
            ..Arm::default()
        };
        self.arms_left -= 1;
        Some(m)
    }

    /// Pushes a segment record back onto the free list and clears it.
    pub fn return_arm(&mut self, m: i32) {
        let head = self.first_arm_in_pool;
        self.arms[head as usize].l1 = m;
        let arm = &mut self.arms[m as usize];
        *arm = Arm {
            r1: head,
            ..Arm::default()
        };
        self.first_arm_in_pool = m;
        self.arms_avail = true;
        self.arms_left += 1;
    }

    /// Pops a polymer record off the free list.
    pub fn request_poly(&mut self) -> Option<i32> {
        let n = self.first_poly_in_pool;
        if self.polymers[n as usize].next_poly == 0 {
            self.polys_avail = false;
            return None;
        }
        self.first_poly_in_pool = self.polymers[n as usize].next_poly;
        let poly = &mut self.polymers[n as usize];
        *poly = Polymer {
            saved: true,
            ..Polymer::default()
        };
        Some(n)
    }

    /// Releases every segment of polymer `n` back to the pool.
    pub fn return_poly_arms(&mut self, n: i32) {
        let first = self.polymers[n as usize].first_end;
        if first != 0 {
            let mut m = first;
            loop {
                let next = self.arms[m as usize].down;
                self.return_arm(m);
                m = next;
                if m == first {
                    break;
                }
            }
        }
        self.polymers[n as usize].first_end = 0;
        self.polymers[n as usize].saved = false;
    }

    /// Releases polymer `n` (and its remaining arms) back to the pools.
    pub fn return_poly(&mut self, n: i32) {
        if self.polymers[n as usize].saved {
            self.return_poly_arms(n);
        }
        self.polymers[n as usize].next_poly = self.first_poly_in_pool;
        self.polymers[n as usize].max_prio = 0;
        self.polymers[n as usize].max_senio = 0;
        self.first_poly_in_pool = n;
        self.polys_avail = true;
    }

    /// Splices segment `m1` immediately after `m` in the polymer's ring.
    pub fn armupdown(&mut self, m: i32, m1: i32) {
        let md = self.arms[m as usize].down;
        self.arms[m1 as usize].down = md;
        self.arms[m as usize].down = m1;
        self.arms[m1 as usize].up = m;
        self.arms[md as usize].up = m1;
    }

    /// Unlinks segment `m` from the polymer ring.
    pub fn remove_from_ring(&mut self, m: i32) {
        let (nu, nd) = {
            let arm = &self.arms[m as usize];
            (arm.up, arm.down)
        };
        self.arms[nu as usize].down = nd;
        self.arms[nd as usize].up = nu;
    }

    /// Grows the segment pool to `new_max` records, re-threading the free
    /// list over the new tail. Live indices stay valid.
    pub fn grow_arms(&mut self, new_max: usize) {
        let old_max = self.arms.len() - 1;
        if new_max <= old_max {
            return;
        }
        self.arms.resize(new_max + 1, Arm::default());
        for i in old_max + 1..=new_max {
            self.return_arm(i as i32);
        }
    }

    /// Grows the polymer pool to `new_max` records.
    pub fn grow_polymers(&mut self, new_max: usize) {
        let old_max = self.polymers.len() - 1;
        if new_max <= old_max {
            return;
        }
        self.polymers.resize(new_max + 1, Polymer::default());
        for i in old_max..new_max {
            self.polymers[i].next_poly = i as i32 + 1;
        }
        self.polymers[new_max].next_poly = 0;
        self.polys_avail = true;
    }

    /// Visits every segment of polymer `n` in ring order.
    pub fn for_each_segment(&self, n: i32, mut f: impl FnMut(i32, &Arm)) {
        let first = self.polymers[n as usize].first_end;
        if first == 0 {
            return;
        }
        let mut m = first;
        loop {
            f(m, &self.arms[m as usize]);
            m = self.arms[m as usize].down;
            if m == first {
                break;
            }
        }
    }

    /// Collects the ring of polymer `n` into a vector of indices.
    #[must_use]
    pub fn segments_of(&self, n: i32) -> Vec<i32> {
        let mut out = Vec::new();
        self.for_each_segment(n, |m, _| out.push(m));
        out
    }

    /// Collects the free-end ring of polymer `n` into a vector of indices.
    #[must_use]
    pub fn free_ends_of(&self, n: i32) -> Vec<i32> {
        let mut out = Vec::new();
        let first = self.polymers[n as usize].first_free;
        if first == 0 {
            return out;
        }
        let mut m = first;
        loop {
            out.push(m);
            m = self.arms[m as usize].free_down;
            if m == first {
                break;
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_and_return_cycle() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 8,
            max_poly: 4,
        });
        assert_eq!(arena.arms_left(), 8);

        let a = arena.request_arm().unwrap();
        let b = arena.request_arm().unwrap();
        assert_ne!(a, b);
        assert_eq!(arena.arms_left(), 6);

        arena.return_arm(a);
        assert_eq!(arena.arms_left(), 7);
        // the returned record is handed out again first
        assert_eq!(arena.request_arm().unwrap(), a);
    }

    #[test]
    fn exhaustion_is_sticky_until_return() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 3,
            max_poly: 2,
        });
        let mut taken = Vec::new();
        while let Some(m) = arena.request_arm() {
            taken.push(m);
        }
        // the final record is never handed out; it terminates the list
        assert_eq!(taken.len(), 2);
        assert!(!arena.arms_avail);
        arena.return_arm(taken.pop().unwrap());
        assert!(arena.arms_avail);
    }

    #[test]
    fn armupdown_splices_after() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 8,
            max_poly: 2,
        });
        let a = arena.request_arm().unwrap();
        let b = arena.request_arm().unwrap();
        let c = arena.request_arm().unwrap();
        arena.armupdown(a, b);
        arena.armupdown(a, c);
        // ring is a -> c -> b -> a
        assert_eq!(arena.arm(a).down, c);
        assert_eq!(arena.arm(c).down, b);
        assert_eq!(arena.arm(b).down, a);
        assert_eq!(arena.arm(a).up, b);
    }

    #[test]
    fn grow_preserves_live_records() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 3,
            max_poly: 2,
        });
        let a = arena.request_arm().unwrap();
        arena.arm_mut(a).arm_len = 7.5;
        while arena.request_arm().is_some() {}
        assert!(!arena.arms_avail);

        arena.grow_arms(16);
        assert!(arena.arms_avail);
        assert!((arena.arm(a).arm_len - 7.5).abs() < f64::EPSILON);
        assert!(arena.request_arm().is_some());
    }
}
