//! Nonlinear flow pipeline: polycopy snapshots, stretch and
//! retraction-time sampling during the LVE pass, and the per-Maxwell-mode
//! `(priority, stretch-rate)` mass accumulators that feed the pom-pom
//! solver.

use crate::arena::{PolyArena, FIT_SAMPLES};
use crate::context::{Context, Params};
use ndarray::Array2;
use serde::Serialize;

/// Immutable architecture snapshot of one polymer with mutable
/// flow-history arrays indexed by `copy_num`.
#[derive(Clone, Debug, Default)]
pub struct PolyCopy {
    /// Number of segments at snapshot time.
    pub narm: usize,
    /// `0` while the polymer is alive, `-1` once its leftovers were flushed.
    pub active: i32,
    /// Arena index of each snapshot slot (immutable once written).
    pub armindx: Vec<i32>,
    /// Topological priority per slot.
    pub priority: Vec<i32>,
    /// `-1` unsampled, `0` sampled.
    pub assigned_trelax: Vec<i8>,
    /// Latest sampled retraction time.
    pub trelax: Vec<f64>,
    /// Drag coefficient sampled with `trelax`.
    pub zeta: Vec<f64>,
    /// Relax end recorded with the sample.
    pub relax_end: Vec<i32>,
    /// `-1` unsampled, `1` provisional, `0` final.
    pub assigned_taus: Vec<i8>,
    /// Latest sampled stretch (Rouse) time.
    pub taus: Vec<f64>,
}

/// One emitted nonlinear mode row.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct NlinMode {
    /// Priority of the mode (1-based, as consumed by the pom-pom solver).
    pub priority: usize,
    /// Weight of the mode.
    pub phi: f64,
    /// Relative stretch rate of the mode's bin.
    pub stretch_rate: f64,
}

/// The modes collected around one Maxwell time.
#[derive(Clone, Debug, Serialize)]
pub struct NlinModeBlock {
    /// The Maxwell time the block is aligned with.
    pub t_maxwell: f64,
    /// Mode rows.
    pub modes: Vec<NlinMode>,
}

/// Saved per-arm flow history, one row per polycopy slot.
#[derive(Clone, Copy, Debug)]
pub struct SavedPrio {
    /// Topological priority.
    pub priority: i32,
    /// Time the segment's tube was first vacated.
    pub trelax: f64,
    /// Sampled stretch time.
    pub armtaus: f64,
    /// Drag coefficient at the sample.
    pub armzeta: f64,
}

/// Accumulator state of the nonlinear pipeline.
pub struct NlinState {
    /// Polycopy snapshots, parallel to the driver's polymer list.
    pub br_copy: Vec<PolyCopy>,
    /// Mass relaxed per `(priority, stretch-rate)` bin.
    pub prio_phi_relax: Array2<f64>,
    /// Mass still held per `(priority, stretch-rate)` bin.
    pub prio_phi_held: Array2<f64>,
    phi_true_acc: f64,
    phi_st_acc: f64,
    dphi_true_acc: f64,
    dphi_st_acc: f64,
    num_data_av: usize,
    collecting: bool,
    t_maxwell: Vec<f64>,
    nxt_data: usize,
    t_min: f64,
    t_max: f64,
    /// Emitted mode blocks, one per Maxwell time.
    pub blocks: Vec<NlinModeBlock>,
}

impl NlinState {
    /// Prepares the accumulators for `max_prio` priorities and the Maxwell
    /// times in `t_maxwell` (read from file or geometrically spaced).
    #[must_use]
    pub fn new(params: &Params, max_prio: usize, t_maxwell: Vec<f64>) -> Self {
        let (t_min, t_max) = t_maxwell.first().map_or((1.0e32, 1.0e32), |&t0| {
            (t0 / params.nlin_av_dt, t0 * params.nlin_av_dt)
        });
        Self {
            br_copy: Vec::new(),
            prio_phi_relax: Array2::zeros((max_prio + 2, params.num_nlin_stretch)),
            prio_phi_held: Array2::zeros((max_prio + 2, params.num_nlin_stretch)),
            phi_true_acc: 0.0,
            phi_st_acc: 0.0,
            dphi_true_acc: 0.0,
            dphi_st_acc: 0.0,
            num_data_av: 0,
            collecting: false,
            t_maxwell,
            nxt_data: 0,
            t_min,
            t_max,
            blocks: Vec::new(),
        }
    }

    /// Geometric Maxwell-time schedule used when no mode file is supplied.
    #[must_use]
    pub fn default_maxwell_times(params: &Params, count: usize) -> Vec<f64> {
        let mut times = Vec::with_capacity(count);
        let mut t = 100.0 * params.t_start;
        for _ in 0..count {
            times.push(t);
            t *= params.maxwell_interval;
        }
        times
    }

    /// Current Maxwell time the collection window is aligned with.
    #[must_use]
    pub fn cur_t_maxwell(&self) -> Option<f64> {
        self.t_maxwell.get(self.nxt_data).copied()
    }

    /// True while the current step falls in the collection window.
    #[must_use]
    pub const fn collecting(&self) -> bool {
        self.collecting
    }

    /// Advances the collection window; call once per time step before the
    /// retraction pass. Returns `true` when a block was just emitted.
    pub fn on_step(&mut self, params: &Params, cur_time: f64) -> bool {
        if self.collecting && cur_time > self.t_max {
            self.emit_block(params);
            self.collecting = false;
            return true;
        }
        if !self.collecting && cur_time >= self.t_min && cur_time <= self.t_max {
            self.collecting = true;
        }
        if self.collecting {
            self.num_data_av += 1;
        }
        false
    }

    /// Accumulates the per-step dilution bookkeeping.
    pub fn track_phi(&mut self, phi_true: f64, phi_st: f64, dphi_true: f64, dphi_st: f64) {
        if self.collecting {
            self.phi_true_acc += phi_true;
            self.phi_st_acc += phi_st;
            self.dphi_true_acc += dphi_true;
            self.dphi_st_acc += dphi_st;
        }
    }

    fn emit_block(&mut self, params: &Params) {
        let n_av = self.num_data_av.max(1) as f64;
        let phi_true = self.phi_true_acc / n_av;
        let phi_st = self.phi_st_acc / n_av;

        // split the relaxed weight between freed and still-held material
        let freed = self.dphi_true_acc * phi_st.powf(params.alpha);
        let held = params.alpha * phi_true * phi_st.powf(params.alpha - 1.0) * self.dphi_st_acc;
        let w_split = if freed + held != 0.0 {
            freed / (freed + held)
        } else {
            1.0
        };

        let tot_relax: f64 = self.prio_phi_relax.iter().filter(|v| **v > 1.0e-16).sum();
        let tot_held: f64 = self.prio_phi_held.iter().filter(|v| **v > 1.0e-16).sum();

        let mut modes = Vec::new();
        let (nprio, nrate) = self.prio_phi_relax.dim();
        for i in 0..nprio {
            let mut cur_rate = 1.0;
            for j in 0..nrate {
                if self.prio_phi_relax[[i, j]] > 1.0e-16 {
                    modes.push(NlinMode {
                        priority: i + 1,
                        phi: (1.0 - w_split) * self.prio_phi_relax[[i, j]] / tot_relax,
                        stretch_rate: cur_rate,
                    });
                }
                if self.prio_phi_held[[i, j]] > 1.0e-16 {
                    modes.push(NlinMode {
                        priority: i + 1,
                        phi: w_split * self.prio_phi_held[[i, j]] / tot_held,
                        stretch_rate: cur_rate,
                    });
                }
                cur_rate *= params.stretch_bin_width;
            }
        }
        self.blocks.push(NlinModeBlock {
            t_maxwell: self.t_maxwell[self.nxt_data],
            modes,
        });

        self.prio_phi_relax.fill(0.0);
        self.prio_phi_held.fill(0.0);
        self.phi_true_acc = 0.0;
        self.phi_st_acc = 0.0;
        self.dphi_true_acc = 0.0;
        self.dphi_st_acc = 0.0;
        self.num_data_av = 0;
        self.nxt_data += 1;
        if let Some(&t) = self.t_maxwell.get(self.nxt_data) {
            self.t_min = t / params.nlin_av_dt;
            self.t_max = t * params.nlin_av_dt;
        } else {
            self.t_min = 1.0e32;
            self.t_max = 1.0e32;
        }
    }

    /// Flushes a final partial block, if one was being collected.
    pub fn finish(&mut self, params: &Params) {
        if self.collecting {
            self.emit_block(params);
            self.collecting = false;
        }
    }
}

/// Builds the polycopy snapshot of every polymer in `polys`.
pub fn snapshot_polymers(arena: &mut PolyArena, polys: &[i32]) -> Vec<PolyCopy> {
    let mut out = Vec::with_capacity(polys.len());
    for &i in polys {
        let segs = arena.segments_of(i);
        let narm = segs.len();
        let mut copy = PolyCopy {
            narm,
            active: 0,
            armindx: segs.clone(),
            priority: Vec::with_capacity(narm),
            assigned_trelax: vec![-1; narm],
            trelax: vec![0.0; narm],
            zeta: vec![0.0; narm],
            relax_end: vec![0; narm],
            assigned_taus: vec![-1; narm],
            taus: vec![0.0; narm],
        };
        for (k, &m) in segs.iter().enumerate() {
            arena.arm_mut(m).copy_num = k;
            copy.priority.push(arena.arm(m).priority.max(1));
        }
        out.push(copy);
    }
    out
}

/// Maps a stretch (Rouse) time onto a geometric stretch-rate bin of width
/// `StretchBinWidth`, relative to the sampling time.
#[must_use]
pub fn find_rate_indx(params: &Params, cur_time: f64, t_stretch: f64) -> usize {
    if t_stretch >= cur_time || t_stretch <= 0.0 {
        return 0;
    }
    let indx = ((cur_time / t_stretch).ln() / params.stretch_bin_width.ln()).floor();
    (indx.max(0.0) as usize).min(params.num_nlin_stretch - 1)
}

/// The segment of the compound chain anchored at `n` that contains the
/// coordinate `z`.
#[must_use]
pub fn nlin_relaxing_arm(arena: &PolyArena, n: i32, z: f64) -> i32 {
    let mut na = n;
    let mut dz = arena.arm(n).arm_len;
    while dz < z {
        let nxt = arena.arm(na).nxt_relax;
        if nxt == 0 {
            if z - dz > 1.0e-6 {
                log::debug!("retraction coordinate beyond the compound chain");
            }
            break;
        }
        na = nxt;
        dz += arena.arm(na).arm_len;
    }
    na
}

/// Log-linear interpolation of the Rouse time of a compound arm from its
/// sampled `(reach, time)` pairs.
#[must_use]
pub fn interp_rouse_time(za: &[f64], ta: &[f64], n: usize, z: f64, cur_time: f64) -> f64 {
    if n == 0 {
        return cur_time;
    }
    if z <= za[0] + 1.0e-12 {
        return ta[0];
    }
    if z >= za[n - 1] - 1.0e-12 {
        return ta[n - 1];
    }
    let mut k2 = 1;
    while k2 < n && z >= za[k2] {
        k2 += 1;
    }
    let dz = za[k2] - za[k2 - 1];
    if z - za[k2 - 1] > 1.0e-6 {
        (ta[k2 - 1].ln() + (ta[k2].ln() - ta[k2 - 1].ln()) * (z - za[k2 - 1]) / dz).exp()
    } else {
        ta[k2 - 1]
    }
}

/// Records a `(time, reach)` sample on the innermost segment of the
/// compound arm `nnn`, keeping at most [`FIT_SAMPLES`] spread-out points.
pub fn sample_eff_arm_len(arena: &mut PolyArena, cur_time: f64, nnn: i32) {
    let zeff = arena.arm(nnn).arm_len_eff;
    let n = nlin_relaxing_arm(arena, nnn, zeff);
    let ddz = arena.arm(n).arm_len / 50.0;
    let z_outer = arena.arm(nnn).z;

    let ndt = arena.arm(n).fit_len;
    if ndt < FIT_SAMPLES {
        if ndt == 0 || zeff - arena.arm(n).fit_zeff[ndt - 1] > ddz {
            let arm = arena.arm_mut(n);
            arm.fit_time[ndt] = cur_time;
            arm.fit_zeff[ndt] = zeff;
            arm.fit_len = ndt + 1;
        }
        return;
    }
    if zeff - arena.arm(n).fit_zeff[ndt - 1] <= ddz {
        return;
    }
    // the deque is full: drop either the stale head or every other early
    // sample, depending on how far the retraction has come
    if z_outer > arena.arm(n).fit_zeff[0] {
        let arm = arena.arm_mut(n);
        for j in 0..FIT_SAMPLES - 1 {
            arm.fit_time[j] = arm.fit_time[j + 1];
            arm.fit_zeff[j] = arm.fit_zeff[j + 1];
        }
        arm.fit_time[FIT_SAMPLES - 1] = cur_time;
        arm.fit_zeff[FIT_SAMPLES - 1] = zeff;
    } else {
        let arm = arena.arm_mut(n);
        for j in 1..5 {
            arm.fit_time[j] = arm.fit_time[2 * j];
            arm.fit_zeff[j] = arm.fit_zeff[2 * j];
        }
        arm.fit_time[5] = cur_time;
        arm.fit_zeff[5] = zeff;
        arm.fit_len = 6;
    }
}

/// Accumulates the mass freed by this step's retraction of arm `n` into the
/// `(priority, stretch-rate)` bins.
pub fn nlin_retraction(arena: &PolyArena, nlin: &mut NlinState, params: &Params, cur_time: f64, n: i32) {
    let z0 = arena.arm(n).z;
    let dz = arena.arm(n).dz;
    if dz <= 0.0 {
        return;
    }
    let na = nlin_relaxing_arm(arena, n, z0);
    let t_stretch = if na == n {
        z0 * z0
    } else {
        let arm = arena.arm(na);
        interp_rouse_time(&arm.fit_zeff, &arm.fit_time, arm.fit_len, z0, cur_time)
    };
    let rate_indx = find_rate_indx(params, cur_time, t_stretch);
    let prio = arena.arm(na).priority.max(1) as usize;
    let row = prio.min(nlin.prio_phi_relax.dim().0 - 1);
    nlin.prio_phi_relax[[row, rate_indx]] += dz;
}

fn reptate_nlin_sngl_arm(
    arena: &PolyArena,
    nlin: &mut NlinState,
    params: &Params,
    cur_time: f64,
    n: i32,
) {
    let z0 = arena.arm(n).z;
    let max_prio = nlin.prio_phi_relax.dim().0 - 1;

    // find the segment holding the front, then sweep the remaining tube in
    // tenth-of-an-entanglement slices
    let mut dz1 = 0.0;
    let mut cumulative_z = arena.arm(n).arm_len;
    let mut n0 = n;
    while cumulative_z < z0 {
        dz1 += arena.arm(n0).arm_len;
        let nxt = arena.arm(n0).nxt_relax;
        if nxt == 0 {
            break;
        }
        n0 = nxt;
        cumulative_z += arena.arm(n0).arm_len;
    }
    let mut zz = z0;
    let mut dz = arena.arm(n0).arm_len - (z0 - dz1);

    loop {
        if dz > 1.0e-12 {
            let cur_prio = (arena.arm(n0).priority.max(1) as usize).min(max_prio);
            let nsplit = (dz / 0.10).ceil().max(1.0);
            let slice = dz / nsplit;
            for _ in 0..nsplit as usize {
                zz += slice;
                let t_stretch = if n0 == n {
                    zz * zz
                } else {
                    let arm = arena.arm(n0);
                    interp_rouse_time(&arm.fit_zeff, &arm.fit_time, arm.fit_len, zz, cur_time)
                };
                let rate_indx = find_rate_indx(params, cur_time, t_stretch);
                nlin.prio_phi_relax[[cur_prio, rate_indx]] += slice;
            }
        }
        let nxt = arena.arm(n0).nxt_relax;
        if nxt == 0 {
            break;
        }
        n0 = nxt;
        dz = arena.arm(n0).arm_len;
    }
}

/// Banks the not-yet-relaxed mass of a reptating polymer into the bins.
pub fn reptate_nlin(
    arena: &PolyArena,
    nlin: &mut NlinState,
    params: &Params,
    cur_time: f64,
    m: i32,
) {
    let n1 = arena.poly(m).first_free;
    let n2 = arena.arm(n1).free_down;
    reptate_nlin_sngl_arm(arena, nlin, params, cur_time, n1);
    if n1 != n2 {
        reptate_nlin_sngl_arm(arena, nlin, params, cur_time, n2);
    }
    let max_prio = nlin.prio_phi_relax.dim().0 - 1;
    for s in arena.segments_of(m) {
        let arm = arena.arm(s);
        if !arm.relaxing {
            let prio = (arm.priority.max(1) as usize).min(max_prio);
            nlin.prio_phi_relax[[prio, 0]] += arm.vol_fraction;
        }
    }
}

fn held_of_free_arm(arena: &PolyArena, nlin: &mut NlinState, n: i32) {
    let max_prio = nlin.prio_phi_held.dim().0 - 1;
    // the unswept part of every segment of the compound chain is held
    let mut z_left = arena.arm(n).z;
    let mut n0 = n;
    loop {
        let arm = arena.arm(n0);
        let swept = z_left.min(arm.arm_len).max(0.0);
        let held = arm.arm_len - swept;
        if held > 0.0 {
            let prio = (arm.priority.max(1) as usize).min(max_prio);
            nlin.prio_phi_held[[prio, 0]] += held;
        }
        z_left -= swept;
        let nxt = arm.nxt_relax;
        if nxt == 0 {
            break;
        }
        n0 = nxt;
    }
}

/// Accumulates the still-held mass of every live polymer.
pub fn calc_nlin_phi_held(arena: &PolyArena, nlin: &mut NlinState, polys: &[i32]) {
    let max_prio = nlin.prio_phi_held.dim().0 - 1;
    for &i in polys {
        if !arena.poly(i).alive {
            continue;
        }
        for n in arena.free_ends_of(i) {
            held_of_free_arm(arena, nlin, n);
        }
        for s in arena.segments_of(i) {
            let arm = arena.arm(s);
            if !arm.relaxing {
                let prio = (arm.priority.max(1) as usize).min(max_prio);
                nlin.prio_phi_held[[prio, 0]] += arm.arm_len;
            }
        }
    }
}

/// Per-arm snip-time sampling of the retraction front: records the first
/// time each segment's tube was vacated, with the drag coefficient at that
/// instant.
pub fn sample_alt_time(arena: &PolyArena, ctx: &Context, nlin: &mut NlinState, polys: &[i32]) {
    let cur_time = ctx.state.cur_time;
    let zeta = 2.0 * ctx.state.phi_st.powf(ctx.params.alpha) * cur_time / 3.0 / ctx.params.p_square;

    for (i, &poly) in polys.iter().enumerate() {
        if arena.poly(poly).alive {
            for s in arena.segments_of(poly) {
                let arm = arena.arm(s);
                let gone = arm.collapsed || arm.ghost || arm.prune;
                if !arm.compound {
                    if gone {
                        alt_time_assign(nlin, i, arm.copy_num, arm.relax_end, cur_time, zeta);
                    }
                    continue;
                }
                // a compound front may have swallowed inner segments
                let zz = arm.z;
                let na = nlin_relaxing_arm(arena, s, zz);
                if na == s {
                    continue;
                }
                alt_time_assign(nlin, i, arm.copy_num, arm.relax_end, cur_time, zeta);
                let mut nb = arm.nxt_relax;
                while nb != na && nb != 0 {
                    let inner = arena.arm(nb);
                    alt_time_assign(nlin, i, inner.copy_num, inner.relax_end, cur_time, zeta);
                    nb = inner.nxt_relax;
                }
                if arm.arm_len_end - zz < 1.0e-1 {
                    let last = arena.arm(na);
                    alt_time_assign(nlin, i, last.copy_num, last.relax_end, cur_time, zeta);
                }
            }
        } else if nlin.br_copy[i].active == 0 {
            let copy = &mut nlin.br_copy[i];
            for j in 0..copy.narm {
                if copy.assigned_trelax[j] != 0 {
                    copy.assigned_trelax[j] = 0;
                    copy.relax_end[j] = 0;
                    copy.trelax[j] = cur_time;
                    copy.zeta[j] = zeta;
                }
            }
        }
    }
}

fn alt_time_assign(
    nlin: &mut NlinState,
    i: usize,
    copy_num: usize,
    relax_end: i32,
    cur_time: f64,
    zeta: f64,
) {
    let copy = &mut nlin.br_copy[i];
    if copy.assigned_trelax[copy_num] != 0 {
        copy.assigned_trelax[copy_num] = 0;
        copy.relax_end[copy_num] = relax_end;
        copy.trelax[copy_num] = cur_time;
        copy.zeta[copy_num] = zeta;
    }
}

/// Samples the stretch (Rouse) times of every segment still carried by a
/// retraction front.
pub fn sample_alt_taus(arena: &PolyArena, ctx: &Context, nlin: &mut NlinState, polys: &[i32]) {
    let cur_time = ctx.state.cur_time;

    for (i, &poly) in polys.iter().enumerate() {
        if arena.poly(poly).alive {
            for n in arena.free_ends_of(poly) {
                let arm_len = arena.arm(n).arm_len;
                alt_taus_assign(nlin, i, arena.arm(n).copy_num, arm_len * arm_len);

                if !arena.arm(n).compound {
                    continue;
                }
                let zeff = arena.arm(n).arm_len_eff;
                let na = nlin_relaxing_arm(arena, n, zeff);
                if na == n {
                    continue;
                }
                let mut zlen = arena.arm(n).arm_len;
                let mut nb = arena.arm(n).nxt_relax;
                while nb != na && nb != 0 {
                    zlen += arena.arm(nb).arm_len;
                    alt_taus_assign(nlin, i, arena.arm(nb).copy_num, cur_time);
                    nb = arena.arm(nb).nxt_relax;
                }
                zlen += arena.arm(na).arm_len;
                if (zlen - zeff) / arena.arm(na).arm_len < 1.0e-2 {
                    alt_taus_assign(nlin, i, arena.arm(na).copy_num, cur_time);
                } else {
                    alt_taus_assign2(nlin, i, arena.arm(na).copy_num, cur_time);
                }
            }
        } else if nlin.br_copy[i].active == 0 {
            let copy = &mut nlin.br_copy[i];
            copy.active = -1;
            for j in 0..copy.narm {
                if copy.assigned_taus[j] != 0 {
                    if copy.assigned_taus[j] != 1 {
                        copy.taus[j] = cur_time;
                    }
                    copy.assigned_taus[j] = 0;
                }
            }
        }
    }
}

fn alt_taus_assign(nlin: &mut NlinState, i: usize, copy_num: usize, tau_s: f64) {
    let copy = &mut nlin.br_copy[i];
    if copy.assigned_taus[copy_num] != 0 {
        copy.assigned_taus[copy_num] = 0;
        copy.taus[copy_num] = tau_s;
    }
}

fn alt_taus_assign2(nlin: &mut NlinState, i: usize, copy_num: usize, tau_s: f64) {
    let copy = &mut nlin.br_copy[i];
    if copy.assigned_taus[copy_num] != 0 && copy.assigned_taus[copy_num] != 1 {
        copy.assigned_taus[copy_num] = 1;
        copy.taus[copy_num] = tau_s;
    }
}

/// Copies the sampled flow history back onto the arms and returns the rows
/// of the saved-priority interchange format, in polycopy order.
pub fn finalize_saved_prio(arena: &mut PolyArena, nlin: &NlinState) -> Vec<SavedPrio> {
    let mut rows = Vec::new();
    for copy in &nlin.br_copy {
        for (k, &m) in copy.armindx.iter().enumerate() {
            {
                let arm = arena.arm_mut(m);
                arm.str_time = copy.trelax[k];
                arm.armtaus = copy.taus[k];
                arm.armzeta = copy.zeta[k];
                arm.priority = copy.priority[k];
            }
            rows.push(SavedPrio {
                priority: copy.priority[k],
                trelax: copy.trelax[k],
                armtaus: copy.taus[k],
                armzeta: copy.zeta[k],
            });
        }
    }
    rows
}

/// Writes the saved-priority interchange format: one
/// `(priority trelax armtaus armzeta)` row per snapshot slot.
///
/// # Errors
///
/// Propagates I/O errors from `out`.
pub fn write_saved_prio(out: &mut impl std::io::Write, rows: &[SavedPrio]) -> crate::Result<()> {
    for row in rows {
        writeln!(
            out,
            "{} {:e} {:e} {:e}",
            row.priority, row.trelax, row.armtaus, row.armzeta
        )?;
    }
    Ok(())
}

/// Reads a saved-priority table written by [`write_saved_prio`].
///
/// # Errors
///
/// Returns [`crate::Error::Parse`] on malformed content.
pub fn read_saved_prio(text: &str) -> crate::Result<Vec<SavedPrio>> {
    let parse_err = |reason: &str| crate::Error::Parse {
        file: "saved-priority".to_owned(),
        reason: reason.to_owned(),
    };
    let mut rows = Vec::new();
    let mut tokens = text.split_whitespace();
    while let Some(first) = tokens.next() {
        let priority: i32 = first
            .parse()
            .map_err(|_| parse_err("bad priority"))?;
        let mut next = |what: &str| -> crate::Result<f64> {
            tokens
                .next()
                .ok_or_else(|| parse_err("truncated row"))?
                .parse()
                .map_err(|_| parse_err(what))
        };
        rows.push(SavedPrio {
            priority,
            trelax: next("bad relaxation time")?,
            armtaus: next("bad stretch time")?,
            armzeta: next("bad drag")?,
        });
    }
    Ok(rows)
}

/// Writes the nonlinear mode blocks: per Maxwell time a `(t_k, num_modes)`
/// row followed by `(priority, phi, stretch_rate)` rows.
///
/// # Errors
///
/// Propagates I/O errors from `out`.
pub fn write_nlin_modes(out: &mut impl std::io::Write, blocks: &[NlinModeBlock]) -> crate::Result<()> {
    for block in blocks {
        writeln!(out, "{:e} {}", block.t_maxwell, block.modes.len())?;
        for mode in &block.modes {
            writeln!(out, "{} {:e} {:e}", mode.priority, mode.phi, mode.stretch_rate)?;
        }
    }
    Ok(())
}

/// Loads a saved-priority table back onto freshly rebuilt polymers, in the
/// same snapshot order.
pub fn apply_saved_prio(arena: &mut PolyArena, polys: &[i32], rows: &[SavedPrio]) {
    let mut it = rows.iter();
    for &poly in polys {
        for m in arena.segments_of(poly) {
            let Some(row) = it.next() else {
                log::warn!("saved-priority table shorter than the ensemble");
                return;
            };
            let arm = arena.arm_mut(m);
            arm.priority = row.priority;
            arm.str_time = row.trelax;
            arm.armtaus = row.armtaus;
            arm.armzeta = row.armzeta;
        }
    }
}

/// Recomputes the priority of every segment of polymer `n` on the snipped
/// graph: side arms whose sampled stretch time reaches past the snip time
/// still transmit stress; faster ones only count if their tube re-entered
/// before the snip. Returns the polymer's largest flow priority.
pub fn calc_flow_priority(arena: &mut PolyArena, snip_time: f64, n: i32) -> i32 {
    let segs = arena.segments_of(n);
    let mut max_prio = 0;
    for &n1 in &segs {
        let prio = set_flow_prio(arena, snip_time, n1);
        arena.arm_mut(n1).priority = prio;
        max_prio = max_prio.max(prio);
    }
    max_prio
}

fn set_flow_prio(arena: &PolyArena, snip_time: f64, n1: i32) -> i32 {
    let (l1, r1) = {
        let arm = arena.arm(n1);
        (arm.l1.abs(), arm.r1.abs())
    };
    // probe the segment itself from each side: entering "from" the R
    // neighbor walks the L half and vice versa; a free face probes as 0 and
    // matches its own empty side
    let m_l = flow_travel(arena, snip_time, r1, n1).max(1);
    let m_r = flow_travel(arena, snip_time, l1, n1).max(1);
    m_l.min(m_r)
}

/// Counts the live ends on the far side of `n1` seen from `n0`.
fn flow_travel(arena: &PolyArena, snip_time: f64, n0: i32, n1: i32) -> i32 {
    let (far1, far2) = {
        let arm = arena.arm(n1);
        let (l1, l2, r1, r2) = (arm.l1.abs(), arm.l2.abs(), arm.r1.abs(), arm.r2.abs());
        if l1 == n0 || l2 == n0 {
            (r1, r2)
        } else {
            (l1, l2)
        }
    };
    if far1 == 0 && far2 == 0 {
        return 1;
    }
    if far1 != 0 && far2 != 0 {
        let live1 = arena.arm(far1).armtaus >= snip_time;
        let live2 = arena.arm(far2).armtaus >= snip_time;
        return match (live1, live2) {
            (false, false) => 2,
            (true, true) => {
                flow_travel(arena, snip_time, n1, far1) + flow_travel(arena, snip_time, n1, far2)
            }
            (false, true) => {
                side_arm_contrib(arena, snip_time, n1, far1)
                    + flow_travel(arena, snip_time, n1, far2)
            }
            (true, false) => {
                side_arm_contrib(arena, snip_time, n1, far2)
                    + flow_travel(arena, snip_time, n1, far1)
            }
        };
    }
    let only = if far1 != 0 { far1 } else { far2 };
    if arena.arm(only).armtaus >= snip_time {
        flow_travel(arena, snip_time, n1, only)
    } else {
        1
    }
}

/// A relaxed side arm still counts when its equilibration time reaches past
/// the snip, judged from the tube length it must re-enter.
fn side_arm_contrib(arena: &PolyArena, snip_time: f64, from: i32, side: i32) -> i32 {
    if arena.arm(side).str_time >= snip_time {
        return 1;
    }
    let mut length = 0.0;
    flow_lencal(
        arena,
        arena.arm(side).str_time,
        from,
        side,
        &mut length,
    );
    let teq = arena.arm(side).armzeta * length;
    i32::from(teq >= snip_time)
}

/// Tube length the relaxed side of `n1` would have to re-enter before
/// `time`; walks outward until both continuations were already relaxed.
fn flow_lencal(arena: &PolyArena, time: f64, n0: i32, n1: i32, zlength: &mut f64) {
    *zlength += arena.arm(n1).arm_len;
    let (far1, far2) = {
        let arm = arena.arm(n1);
        let (l1, l2, r1, r2) = (arm.l1.abs(), arm.l2.abs(), arm.r1.abs(), arm.r2.abs());
        if l1 == n0 || l2 == n0 {
            (r1, r2)
        } else {
            (l1, l2)
        }
    };
    if far1 == 0 && far2 == 0 {
        return;
    }
    if far1 != 0 && far2 != 0 {
        let live1 = arena.arm(far1).str_time >= time;
        let live2 = arena.arm(far2).str_time >= time;
        match (live1, live2) {
            (true, false) => flow_lencal(arena, time, n1, far1, zlength),
            (false, true) => flow_lencal(arena, time, n1, far2, zlength),
            _ => {}
        }
        return;
    }
    let only = if far1 != 0 { far1 } else { far2 };
    if arena.arm(only).str_time >= time {
        flow_lencal(arena, time, n1, only, zlength);
    }
}
