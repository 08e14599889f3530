//! Run parameters, mutable run state and host callbacks.
//!
//! The reference implementation kept roughly forty process-wide scalars;
//! here they are gathered into [`Params`] (immutable for the duration of a
//! run) and [`RunState`] (the driver's mutable bookkeeping), threaded
//! explicitly through the generators and the relaxation driver.

use rand::SeedableRng;
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Rouse retraction prefactor for the step-0 solution, `9 π³ / 16`.
pub const GAMMA1: f64 = 9.0 * PI * PI * PI / 16.0;

/// π² as used by the reptation and drag formulas.
pub const PI_POW_2: f64 = PI * PI;

/// π⁵ as used by the arm retraction prefactors.
pub const PI_POW_5: f64 = PI * PI * PI * PI * PI;

/// Smallest meaningful increment in retraction coordinates.
pub const TINY: f64 = 1.0e-14;

/// Output flavor of the standalone traces.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum OutMode {
    /// Plain whitespace-separated columns.
    #[default]
    PlainText,
    /// Grace project headers around each data set.
    Grace,
    /// Reptate-importable data blocks.
    Reptate,
}

/// Drag prefactor used for compound-arm retraction.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum PrefMode {
    /// Keep the outermost arm's Rouse prefactor.
    Outer,
    /// Rebuild the prefactor from the current effective length.
    #[default]
    EffectiveLen,
    /// Sum the collapsed-neighbor friction plus the backbone contribution.
    EffectiveFriction,
}

/// Tube diameter used in the reptation test.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum ReptScheme {
    /// Thin (undilated) tube.
    #[default]
    ThinTube,
    /// Tube dilated to the current unrelaxed fraction.
    CurrentTube,
    /// φ frozen once `drag · ReptAmount² φ^α / π²` has elapsed.
    FixedAmount,
    /// As `FixedAmount`, scaled by the backbone length.
    BackboneAmount,
}

/// Whether sub-entanglement side arms count toward priority.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum PrioMode {
    /// Every side arm counts.
    #[default]
    All,
    /// Only entangled side arms count.
    EntangledOnly,
}

/// Blend weighting used when assigning segment volume fractions.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum VolFracWeighting {
    /// Each molecule carries the same number weight (reactor generators).
    #[default]
    ByNumber,
    /// Each molecule carries weight proportional to its mass
    /// (prototype/UDF and the weight-averaged builders).
    ByWeight,
}

/// Immutable run parameters, read from the flat option file.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Params {
    /// Dilution exponent α.
    pub alpha: f64,
    /// Branch-point hop prefactor p²/2 (the option value is halved on read).
    pub p_square: f64,
    /// Distance from the arm tip (in tube units) below which an arm counts
    /// as fully retracted.
    pub ret_lim: f64,
    /// First relaxation time.
    pub t_start: f64,
    /// Multiplicative time step.
    pub dt_mult: f64,
    /// Lower end of the LVE frequency sweep.
    pub freq_min: f64,
    /// Upper end of the LVE frequency sweep.
    pub freq_max: f64,
    /// Multiplicative frequency step.
    pub freq_interval: f64,
    /// Geometric spacing of the resolved Maxwell modes.
    pub maxwell_interval: f64,
    /// Read Maxwell modes from file instead of resolving them.
    pub defined_maxwell_modes: bool,
    /// Geometric width of a stretch-rate bin.
    pub stretch_bin_width: f64,
    /// Number of stretch-rate bins.
    pub num_nlin_stretch: usize,
    /// Averaging half-window (multiplicative) around each Maxwell time for
    /// the nonlinear data collection.
    pub nlin_av_dt: f64,
    /// Output flavor.
    pub out_mode: OutMode,
    /// Compound-arm drag prefactor model.
    pub pref_mode: PrefMode,
    /// Reptation tube selection.
    pub rept_scheme: ReptScheme,
    /// Amount parameter for the in-between reptation schemes.
    pub rept_amount: f64,
    /// Run the GPC light-scattering module.
    pub calc_gpcls: bool,
    /// Number of GPC bins.
    pub gpc_num_bin: usize,
    /// Polymer multiplier for the GPC resampling.
    pub gpc_poly_mult: usize,
    /// Emit the GPC trace even when the module is off.
    pub force_gpc_trace: bool,
    /// Let deeply diluted arms relax by bare Rouse motion at late times.
    pub late_rouse: bool,
    /// Threshold for the late-Rouse switch.
    pub lt_rs_factor: f64,
    /// Record snip-time retraction data for the flow pipeline.
    pub snipping: bool,
    /// Prepare the nonlinear pipeline (first pass of a flow run).
    pub nlin_prep: bool,
    /// Recompute priorities on the snipped graph (second pass).
    pub flow_priority: bool,
    /// Time at which the graph is snipped for flow priorities.
    pub snip_time: f64,
    /// Let retraction see the supertube envelope instead of the true
    /// unrelaxed fraction.
    pub slave_phi_to_phi_st: bool,
    /// Priority counting mode.
    pub prio_mode: PrioMode,
    /// Stop after generating molecules (no relaxation).
    pub gen_poly_only: bool,
    /// Run the nonlinear pipeline (second pass of a flow run).
    pub calc_nlin: bool,
    /// Depth cap of the recursive molecule generators.
    pub max_rlevel: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            p_square: 0.025,
            ret_lim: 0.0,
            t_start: 1.0e-4,
            dt_mult: 1.005,
            freq_min: 1.0e-3,
            freq_max: 1.0e8,
            freq_interval: 1.1,
            maxwell_interval: 2.0,
            defined_maxwell_modes: false,
            stretch_bin_width: 1.25,
            num_nlin_stretch: 20,
            nlin_av_dt: 1.1,
            out_mode: OutMode::PlainText,
            pref_mode: PrefMode::EffectiveLen,
            rept_scheme: ReptScheme::ThinTube,
            rept_amount: 0.0,
            calc_gpcls: false,
            gpc_num_bin: 50,
            gpc_poly_mult: 50,
            force_gpc_trace: false,
            late_rouse: false,
            lt_rs_factor: 42420.0,
            snipping: false,
            nlin_prep: false,
            flow_priority: false,
            snip_time: 0.0,
            slave_phi_to_phi_st: false,
            prio_mode: PrioMode::All,
            gen_poly_only: false,
            calc_nlin: false,
            max_rlevel: 5000,
        }
    }
}

/// Host callbacks: progress and error routing plus the on-demand frequency
/// window accessors used when the engine is embedded.
pub trait Reporter {
    /// Informational output.
    fn info(&self, msg: &str);
    /// Error output.
    fn error(&self, msg: &str);
    /// Lower end of the frequency window requested by the host.
    fn freq_min(&self) -> f64 {
        1.0e-3
    }
    /// Upper end of the frequency window requested by the host.
    fn freq_max(&self) -> f64 {
        1.0e8
    }
    /// Multiplicative frequency step requested by the host.
    fn freq_interval(&self) -> f64 {
        1.1
    }
}

/// Default reporter: routes everything through the `log` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn info(&self, msg: &str) {
        log::info!("{msg}");
    }

    fn error(&self, msg: &str) {
        log::error!("{msg}");
    }
}

/// Mutable bookkeeping of a relaxation run.
#[derive(Clone, Debug)]
pub struct RunState {
    /// Current simulation time in units of τ_e.
    pub cur_time: f64,
    /// Unrelaxed fraction seen by retraction.
    pub phi: f64,
    /// Instantaneous unrelaxed fraction.
    pub phi_true: f64,
    /// Supertube envelope.
    pub phi_st: f64,
    /// Change of `phi` over the last step.
    pub deltaphi: f64,
    /// Whether the supertube envelope currently governs `phi_st`.
    pub supertube_activated: bool,
    /// `phi` at the moment the supertube activated.
    pub phi_st_0: f64,
    /// Time at which the supertube activated.
    pub st_activ_time: f64,
    /// False once the late-Rouse switch fired.
    pub interp_retraction: bool,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            cur_time: 0.0,
            phi: 1.0,
            phi_true: 1.0,
            phi_st: 1.0,
            deltaphi: 0.0,
            supertube_activated: false,
            phi_st_0: 1.0,
            st_activ_time: 1.0,
            interp_retraction: true,
        }
    }
}

/// Everything a generator or the driver needs besides the arena: parameters,
/// run state, the process RNG, the stop flag and the host callbacks.
pub struct Context {
    /// Immutable run parameters.
    pub params: Params,
    /// Mutable driver state.
    pub state: RunState,
    /// The run's random number generator, shared by every chemistry.
    pub rng: Pcg64,
    /// Cooperative cancellation flag, polled between polymers and steps.
    pub stop: Arc<AtomicBool>,
    /// Host callbacks.
    pub reporter: Box<dyn Reporter + Send + Sync>,
}

impl Context {
    /// Creates a context with entropy-based seeding.
    #[must_use]
    pub fn new(params: Params) -> Self {
        Self::seeded(params, rand::random())
    }

    /// Creates a context with a fixed seed, for reproducible runs.
    #[must_use]
    pub fn seeded(params: Params, seed: u64) -> Self {
        Self {
            state: RunState {
                cur_time: params.t_start,
                ..RunState::default()
            },
            params,
            rng: Pcg64::seed_from_u64(seed),
            stop: Arc::new(AtomicBool::new(false)),
            reporter: Box::new(LogReporter),
        }
    }

    /// True once the host requested cancellation.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Handle the host can use to request cancellation.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn seeded_contexts_draw_identically() {
        use rand::Rng;
        let mut a = Context::seeded(Params::default(), 99);
        let mut b = Context::seeded(Params::default(), 99);
        for _ in 0..32 {
            let x: f64 = a.rng.gen();
            let y: f64 = b.rng.gen();
            assert!((x - y).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn stop_handle_is_shared() {
        let ctx = Context::seeded(Params::default(), 1);
        assert!(!ctx.stop_requested());
        ctx.stop_handle().store(true, Ordering::Relaxed);
        assert!(ctx.stop_requested());
    }
}
