//! Per-chemistry ensembles: the polymer list, molecular-weight-distribution
//! histograms, export-bin quotas and global averages.

use crate::arena::PolyArena;
use itertools::{Itertools, MinMaxResult};
use serde::{Deserialize, Serialize};

fn minmax_or(values: impl Iterator<Item = f64>, fallback: (f64, f64)) -> (f64, f64) {
    match values.minmax_by(|a, b| a.partial_cmp(b).unwrap()) {
        MinMaxResult::NoElements => fallback,
        MinMaxResult::OneElement(x) => (x, x),
        MinMaxResult::MinMax(a, b) => (a, b),
    }
}

/// Number of saturating bins of the branch-point-count histogram.
pub const MAX_NBR_BINS: usize = 101;

/// Finalized MWD histogram, ready for plotting.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct MwdHistogram {
    /// Mid-point of each bin in log₁₀(M).
    pub lgmid: Vec<f64>,
    /// Weight fraction per unit log₁₀(M).
    pub wt: Vec<f64>,
    /// Average branches per 500 monomers in the bin.
    pub avbr: Vec<f64>,
    /// Mass-weighted average g-factor in the bin.
    pub avg: Vec<f64>,
    /// Accumulated chain length per bin (working quantity).
    pub wmass: Vec<f64>,
}

/// Molecule classification counters, by number and by weight.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct ArchCounts {
    /// Linear molecules.
    pub lin: usize,
    /// Three-arm stars.
    pub star: usize,
    /// Five-segment H molecules.
    pub h: usize,
    /// Seven-segment molecules.
    pub seven_arm: usize,
    /// Combs (every interior segment touches a free end).
    pub comb: usize,
    /// Everything more branched.
    pub other: usize,
    /// Weight totals matching the counts above.
    pub wlin: f64,
    /// Weight of stars.
    pub wstar: f64,
    /// Weight of H molecules.
    pub wh: f64,
    /// Weight of seven-segment molecules.
    pub wseven_arm: f64,
    /// Weight of combs.
    pub wcomb: f64,
    /// Weight of the rest.
    pub wother: f64,
}

/// Architecture statistics accumulated per ensemble.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ArchStats {
    /// Classification counters.
    pub counts: ArchCounts,
    /// Arm-length histogram (log bins, a decade split in ten).
    pub numin_armwt_bin: Vec<usize>,
    /// Left edge of the arm-length histogram in log₁₀(M).
    pub armwt_lgmin: f64,
    /// Bin width of the arm-length histogram.
    pub armwt_lgstep: f64,
    /// Branch-point-count histogram, saturating at the last bin.
    pub numin_num_br_bin: Vec<usize>,
    /// Largest branch-point count seen.
    pub max_num_br: usize,
    /// Largest priority seen in the ensemble.
    pub max_prio: i32,
    /// Largest seniority seen in the ensemble.
    pub max_senio: i32,
    /// Number of molecules that passed the weight window.
    pub nsaved_arch: usize,
}

/// One reaction product: the molecules of a single chemistry run plus their
/// statistics.
pub struct Ensemble {
    /// Identifier written into configuration headers.
    pub name: String,
    /// Arena indices of the molecules, in creation order.
    pub polymers: Vec<i32>,
    /// Monomer molar mass.
    pub monmass: f64,
    /// Entanglement molar mass.
    pub m_e: f64,
    /// Monomers per entanglement (`m_e / monmass`).
    pub n_e: f64,
    /// Number of MWD bins.
    pub nummwdbins: usize,
    /// Number of export quota bins.
    pub numbobbins: usize,
    /// Per-bin export quota.
    pub bobbinmax: usize,
    /// Lower log₁₀(M) edge of the export bins.
    pub boblgmin: f64,
    /// Upper log₁₀(M) edge of the export bins.
    pub boblgmax: f64,
    /// Molecules counted into each export bin.
    pub numinbin: Vec<usize>,
    /// Molecules whose arms are retained for export.
    pub nsaved: usize,
    /// Finalized MWD histogram.
    pub mwd: MwdHistogram,
    /// Weight-average molar mass.
    pub m_w: f64,
    /// Number-average molar mass.
    pub m_n: f64,
    /// Average branches per 500 monomers.
    pub brav: f64,
    /// Architecture statistics.
    pub arch: ArchStats,
    /// Weight window for the architecture statistics.
    pub arch_minwt: f64,
    /// Upper edge of the weight window.
    pub arch_maxwt: f64,
    /// Sticky error flag; set on arena exhaustion or recursion overflow,
    /// refuses further molecules of this chemistry.
    pub error: bool,
}

impl Ensemble {
    /// Creates an empty ensemble for a chemistry producing monomers of mass
    /// `monmass` with entanglement mass `m_e`.
    #[must_use]
    pub fn new(name: &str, monmass: f64, m_e: f64) -> Self {
        Self {
            name: name.to_owned(),
            polymers: Vec::new(),
            monmass,
            m_e,
            n_e: m_e / monmass,
            nummwdbins: 100,
            numbobbins: 100,
            bobbinmax: 2,
            boblgmin: 1.0,
            boblgmax: 9.0,
            numinbin: vec![0; 101],
            nsaved: 0,
            mwd: MwdHistogram::default(),
            m_w: 0.0,
            m_n: 0.0,
            brav: 0.0,
            arch: ArchStats::default(),
            arch_minwt: 0.0,
            arch_maxwt: f64::INFINITY,
            error: false,
        }
    }

    /// Resets the export quota counters.
    pub fn bobinit(&mut self) {
        self.numinbin = vec![0; self.numbobbins + 1];
        self.nsaved = 0;
    }

    /// Counts polymer `m` into its export bin and decides whether its arms
    /// are kept. Overflowing molecules release their arms but stay in the
    /// list so their statistics still contribute.
    pub fn bobcount(&mut self, arena: &mut PolyArena, m: i32) {
        let lg = (arena.poly(m).tot_len * self.monmass).log10();
        let span = self.boblgmax - self.boblgmin;
        let raw = ((lg - self.boblgmin) / span * self.numbobbins as f64).trunc() as i64 + 1;
        let ibin = raw.clamp(1, self.numbobbins as i64) as usize;
        self.numinbin[ibin] += 1;
        if self.numinbin[ibin] <= self.bobbinmax {
            let poly = arena.poly_mut(m);
            poly.saved = true;
            poly.bin = ibin;
            self.nsaved += 1;
        } else {
            let poly = arena.poly_mut(m);
            poly.saved = false;
            poly.bin = 0;
            arena.return_poly_arms(m);
        }
    }

    /// Bins every molecule of the ensemble into the MWD histogram and
    /// updates the global averages. Molecules are assumed to be created on a
    /// weight basis.
    pub fn molbin(&mut self, arena: &PolyArena) {
        if self.polymers.is_empty() {
            return;
        }
        let nbins = self.nummwdbins;
        let (lgmin, lgmax) =
            minmax_or(self.polymers.iter().map(|&i| arena.poly(i).tot_len), (1.0, 1.0));
        let lgmax = (lgmax * 1.01 * self.monmass).log10();
        let lgmin = (lgmin / 1.01 * self.monmass).log10();
        let lgstep = (lgmax - lgmin) / nbins as f64;

        let mut wt = vec![0.0; nbins];
        let mut avbr = vec![0.0; nbins];
        let mut avg = vec![0.0; nbins];
        let mut wmass = vec![0.0; nbins];
        let (mut wttot, mut m_w, mut m_n, mut brav) = (0.0, 0.0, 0.0, 0.0);

        for &i in &self.polymers {
            let poly = arena.poly(i);
            let cplen = poly.tot_len * self.monmass;
            let ibin = ((cplen.log10() - lgmin) / lgstep).trunc() as i64;
            wttot += 1.0;
            m_w += cplen;
            m_n += 1.0 / cplen;
            brav += f64::from(poly.num_br) / poly.tot_len;
            if ibin >= 0 && (ibin as usize) < nbins {
                let ibin = ibin as usize;
                wt[ibin] += 1.0;
                avbr[ibin] += f64::from(poly.num_br);
                avg[ibin] += poly.gfactor;
                wmass[ibin] += poly.tot_len;
            }
        }

        let lgmid = (0..nbins)
            .map(|i| (i as f64 + 0.5).mul_add(lgstep, lgmin))
            .collect();
        for i in 0..nbins {
            avbr[i] = avbr[i] / (wmass[i] + 1.0e-80) * 500.0;
            avg[i] /= wt[i] + 1.0e-80;
            wt[i] = wt[i] / lgstep / wttot;
        }
        self.mwd = MwdHistogram {
            lgmid,
            wt,
            avbr,
            avg,
            wmass,
        };
        self.m_w = m_w / wttot;
        self.m_n = wttot / m_n;
        self.brav = brav / wttot * 500.0;
    }

    /// Releases every molecule of the ensemble back to the arena.
    pub fn release(&mut self, arena: &mut PolyArena) {
        for &i in &self.polymers {
            arena.return_poly(i);
        }
        self.polymers.clear();
        self.nsaved = 0;
        self.arch = ArchStats::default();
    }
}

/// MWD histogram of a blend of ensembles with the given weights.
///
/// Entries with non-positive weight are skipped. Returns the histogram and
/// the blend's `(m_w, m_n, brav)` summary.
#[must_use]
pub fn multimolbin(
    arena: &PolyArena,
    reqbins: usize,
    mix: &[(f64, &Ensemble)],
) -> (MwdHistogram, f64, f64, f64) {
    let nbins = reqbins.max(1);
    let (lgmin, lgmax) = minmax_or(
        mix.iter()
            .filter(|&&(weight, _)| weight > 0.0)
            .flat_map(|&(_, dist)| {
                dist.polymers
                    .iter()
                    .map(move |&i| arena.poly(i).tot_len * dist.monmass)
            }),
        (1.0, 1.0),
    );
    let lgmax = (lgmax * 1.01).log10();
    let lgmin = (lgmin / 1.01).log10();
    let lgstep = (lgmax - lgmin) / nbins as f64;

    let mut hist = MwdHistogram {
        lgmid: (0..nbins)
            .map(|i| (i as f64 + 0.5).mul_add(lgstep, lgmin))
            .collect(),
        wt: vec![0.0; nbins],
        avbr: vec![0.0; nbins],
        avg: vec![0.0; nbins],
        wmass: vec![0.0; nbins],
    };
    let (mut wttot, mut m_w, mut m_n, mut brav) = (0.0, 0.0, 0.0, 0.0);

    for &(weight, dist) in mix {
        if weight <= 0.0 || dist.polymers.is_empty() {
            continue;
        }
        let wtpoly = weight / dist.polymers.len() as f64;
        for &i in &dist.polymers {
            let poly = arena.poly(i);
            let cplen = poly.tot_len * dist.monmass;
            let ibin = ((cplen.log10() - lgmin) / lgstep).trunc() as i64;
            wttot += wtpoly;
            m_w += cplen * wtpoly;
            m_n += wtpoly / cplen;
            brav += f64::from(poly.num_br) / poly.tot_len * wtpoly;
            if ibin >= 0 && (ibin as usize) < nbins {
                let ibin = ibin as usize;
                hist.wt[ibin] += wtpoly;
                hist.avbr[ibin] += f64::from(poly.num_br) * wtpoly;
                hist.avg[ibin] += poly.gfactor * wtpoly;
                hist.wmass[ibin] += poly.tot_len * wtpoly;
            }
        }
    }

    for i in 0..nbins {
        hist.avbr[i] = hist.avbr[i] / (hist.wmass[i] + 1.0e-80) * 500.0;
        hist.avg[i] /= hist.wt[i] + 1.0e-80;
        hist.wt[i] = hist.wt[i] / lgstep / wttot;
    }

    (hist, m_w / wttot, wttot / m_n, brav / wttot * 500.0)
}

/// GPC-style histogram over explicit per-molecule `(mass, g, branches,
/// weight)` rows; used by the GPC trace of relaxation inputs.
#[must_use]
pub fn gpc_hist(
    num_bin: usize,
    mass_mono: f64,
    rows: &[(f64, f64, f64, f64)],
) -> Option<MwdHistogram> {
    let nnn = num_bin.min(rows.len() / 5).max(2);
    let (massmin, massmax) = minmax_or(rows.iter().map(|r| r.0), (0.0, 0.0));
    if massmax - massmin < 0.01 {
        log::warn!("polymers are too monodisperse for a GPC histogram");
        return None;
    }
    let lgmin = massmin.log10();
    let lgstep = (massmax.log10() - lgmin) / nnn as f64;

    let mut hist = MwdHistogram {
        lgmid: (0..nnn)
            .map(|i| (i as f64 + 0.5).mul_add(lgstep, lgmin))
            .collect(),
        wt: vec![0.0; nnn],
        avbr: vec![0.0; nnn],
        avg: vec![0.0; nnn],
        wmass: vec![0.0; nnn],
    };
    let mut wttot = 0.0;
    for &(mass, g, branches, wt_frac) in rows {
        let indx = (((mass.log10() - lgmin) / lgstep).floor() as usize).min(nnn - 1);
        hist.wt[indx] += wt_frac;
        wttot += wt_frac;
        hist.avbr[indx] += branches * wt_frac * mass_mono * 500.0 / mass;
        hist.avg[indx] += g * wt_frac;
    }
    for i in 0..nnn {
        if hist.wt[i] > 1.0e-12 {
            hist.avg[i] /= hist.wt[i];
            hist.avbr[i] /= hist.wt[i];
        }
        hist.wt[i] = hist.wt[i] / (lgstep * wttot);
    }
    Some(hist)
}
