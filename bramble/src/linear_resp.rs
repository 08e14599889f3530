//! Linear viscoelastic response derived from the supertube trace: the
//! relaxation-modulus increments, Maxwell-mode resolution and the zero-shear
//! viscosity summary.

use crate::context::Params;
use crate::driver::SupertubeRow;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// One resolved Maxwell mode.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct MaxwellMode {
    /// Relaxation time (physical units).
    pub tau: f64,
    /// Modulus weight (physical units).
    pub g: f64,
}

/// Modulus increment released between rows `j-1` and `j` of the trace, in
/// units of G₀: the supertube dilation part plus the thin-tube part.
fn g_increment(alpha: f64, prev: &SupertubeRow, cur: &SupertubeRow) -> f64 {
    let phnow = 0.5 * (prev.phi + cur.phi);
    let phstnow = 0.5 * (prev.phi_st + cur.phi_st);
    alpha * phnow * phstnow.powf(alpha) * (prev.phi_st - cur.phi_st) / phstnow
        + phstnow.powf(alpha) * (prev.phi - cur.phi)
}

/// Relaxation modulus `G(t)` (in units of G₀) from the trace.
#[must_use]
pub fn g_of_t(params: &Params, trace: &[SupertubeRow], t: f64) -> f64 {
    trace
        .windows(2)
        .map(|w| (-t / w[0].t.max(params.t_start)).exp() * g_increment(params.alpha, &w[0], &w[1]))
        .sum()
}

/// Storage and loss moduli `(G', G'')` at `omega` (in units of G₀, ω in
/// inverse simulation time).
#[must_use]
pub fn g_star(params: &Params, trace: &[SupertubeRow], omega: f64) -> (f64, f64) {
    let mut gp = 0.0;
    let mut gpp = 0.0;
    for w in trace.windows(2) {
        let tau = w[1].t;
        let g = g_increment(params.alpha, &w[0], &w[1]);
        let wt = omega * tau;
        gp += g * wt * wt / (1.0 + wt * wt);
        gpp += g * wt / (1.0 + wt * wt);
    }
    (gp, gpp)
}

/// Magnitude of the complex viscosity at `omega`.
#[must_use]
pub fn eta_star(params: &Params, trace: &[SupertubeRow], omega: f64) -> f64 {
    let (gp, gpp) = g_star(params, trace, omega);
    gp.hypot(gpp) / omega
}

/// Zero-shear viscosity in physical units: the dynamic viscosity is pushed
/// to ever lower frequency until it stops changing, then extrapolated
/// linearly to ω = 0.
#[must_use]
pub fn zero_shear_viscosity(
    params: &Params,
    trace: &[SupertubeRow],
    unit_time: f64,
    g0_unit: f64,
) -> f64 {
    let mut ff = [0.0; 5];
    ff[0] = 1.0e-10;
    for i in 1..5 {
        ff[i] = ff[i - 1] / 2.0;
    }
    let mut eta = [0.0; 5];
    let mut converged = false;
    let mut num_try = 0;
    while !converged && num_try < 30 {
        num_try += 1;
        for (i, &freq) in ff.iter().enumerate() {
            eta[i] = trace
                .windows(2)
                .map(|w| {
                    let tnow = w[1].t;
                    let weight = tnow / (1.0 + freq * freq * tnow * tnow);
                    weight * g_increment(params.alpha, &w[0], &w[1])
                })
                .sum::<f64>()
                * g0_unit
                * unit_time;
        }
        let wobble: f64 = (1..5).map(|i| (eta[i] - eta[i - 1]).powi(2)).sum();
        if wobble / eta[3].abs().max(f64::MIN_POSITIVE) < 1.0e-12 {
            converged = true;
        } else {
            for f in &mut ff {
                *f /= 2.0;
            }
        }
    }
    if num_try > 19 {
        log::warn!("viscosity estimate may not be reliable");
    }

    // least-squares line through the five lowest-frequency samples
    let sx: f64 = ff.iter().sum();
    let sy: f64 = eta.iter().sum();
    let sxx: f64 = ff.iter().map(|f| f * f).sum();
    let sxy: f64 = ff.iter().zip(&eta).map(|(f, e)| f * e).sum();
    (sxx * sy - sxy * sx) / (5.0 * sxx - sx * sx)
}

/// Resolves the trace into Maxwell modes spaced by `MaxwellInterval`,
/// starting at one hundred times the first step.
#[must_use]
pub fn resolve_maxwell_modes(
    params: &Params,
    trace: &[SupertubeRow],
    unit_time: f64,
    g0_unit: f64,
) -> Vec<MaxwellMode> {
    if trace.len() < 3 {
        return Vec::new();
    }
    let ndata = trace.len();
    let tspan = trace[ndata - 1].t / (100.0 * trace[1].t);
    let num_modes = (tspan.ln() / params.maxwell_interval.ln()).floor().max(0.0) as usize + 1;

    let mut modes = Vec::with_capacity(num_modes);
    let mut tau0 = trace[1].t * 100.0;
    let mut tau1 = params.maxwell_interval * tau0;
    let mut kk = 1;
    for _ in 0..num_modes {
        let mut g0 = 0.0;
        while kk < ndata && trace[kk].t < 0.5 * (tau0 + tau1) {
            g0 += g_increment(params.alpha, &trace[kk - 1], &trace[kk]);
            kk += 1;
        }
        modes.push(MaxwellMode {
            tau: tau0 * unit_time,
            g: g0 * g0_unit,
        });
        tau0 = tau1;
        tau1 = params.maxwell_interval * tau0;
    }
    modes
}

/// Writes a mode table in the interchange format: the count, then one
/// `(tau, g)` row per mode.
///
/// # Errors
///
/// Propagates I/O errors from `out`.
pub fn write_maxwell_modes(out: &mut impl Write, modes: &[MaxwellMode]) -> Result<()> {
    writeln!(out, "{}", modes.len())?;
    for mode in modes {
        writeln!(out, "{:e} {:e}", mode.tau, mode.g)?;
    }
    Ok(())
}

/// Reads a mode table written by [`write_maxwell_modes`].
///
/// # Errors
///
/// Returns [`Error::Parse`] on malformed content.
pub fn read_maxwell_modes(text: &str) -> Result<Vec<MaxwellMode>> {
    let parse_err = |reason: &str| Error::Parse {
        file: "maxwell".to_owned(),
        reason: reason.to_owned(),
    };
    let mut tokens = text.split_whitespace();
    let count: usize = tokens
        .next()
        .ok_or_else(|| parse_err("missing mode count"))?
        .parse()
        .map_err(|_| parse_err("mode count is not an integer"))?;
    let mut modes = Vec::with_capacity(count);
    for _ in 0..count {
        let tau: f64 = tokens
            .next()
            .ok_or_else(|| parse_err("truncated mode table"))?
            .parse()
            .map_err(|_| parse_err("bad relaxation time"))?;
        let g: f64 = tokens
            .next()
            .ok_or_else(|| parse_err("truncated mode table"))?
            .parse()
            .map_err(|_| parse_err("bad modulus"))?;
        modes.push(MaxwellMode { tau, g });
    }
    Ok(modes)
}

#[cfg(test)]
mod test {
    use super::*;
    use float_cmp::assert_approx_eq;

    /// A synthetic single-exponential trace: phi decays with time constant
    /// tau, no supertube.
    fn exp_trace(tau: f64) -> Vec<SupertubeRow> {
        let mut rows = vec![SupertubeRow {
            t: 0.0,
            phi: 1.0,
            phi_st: 1.0,
            phi_true: 1.0,
        }];
        let mut t = 1.0e-4;
        while t < 100.0 * tau {
            let phi = (-t / tau).exp();
            rows.push(SupertubeRow {
                t,
                phi,
                phi_st: phi,
                phi_true: phi,
            });
            t *= 1.01;
        }
        rows
    }

    #[test]
    fn modes_recover_total_modulus() {
        let params = Params {
            alpha: 1.0,
            ..Params::default()
        };
        let trace = exp_trace(10.0);
        let modes = resolve_maxwell_modes(&params, &trace, 1.0, 1.0);
        assert!(!modes.is_empty());
        let total: f64 = modes.iter().map(|m| m.g).sum();
        // with alpha = 1 the increments integrate (phi phi_st^alpha) from 1
        // to 0, up to the leading 1e-2 window cut by the mode start
        assert!(total > 0.8 && total <= 1.01, "total = {total}");
    }

    #[test]
    fn viscosity_of_single_mode() {
        let params = Params {
            alpha: 1.0,
            ..Params::default()
        };
        let tau = 10.0;
        let trace = exp_trace(tau);
        let eta = zero_shear_viscosity(&params, &trace, 1.0, 1.0);
        // eta0 = integral of G: phi^2 decays with tau/2, so eta ~ tau/2
        assert_approx_eq!(f64, eta, tau / 2.0, epsilon = 0.25);
    }

    #[test]
    fn mode_table_round_trips() {
        let modes = vec![
            MaxwellMode { tau: 0.01, g: 1.0e5 },
            MaxwellMode { tau: 0.1, g: 2.0e4 },
        ];
        let mut buf = Vec::new();
        write_maxwell_modes(&mut buf, &modes).unwrap();
        let back = read_maxwell_modes(&String::from_utf8(buf).unwrap()).unwrap();
        assert_eq!(back.len(), 2);
        assert_approx_eq!(f64, back[0].tau, 0.01);
        assert_approx_eq!(f64, back[1].g, 2.0e4);
    }

    #[test]
    fn eta_star_plateaus_at_low_frequency() {
        let params = Params::default();
        let trace = exp_trace(5.0);
        let lo = eta_star(&params, &trace, 1.0e-8);
        let lo2 = eta_star(&params, &trace, 5.0e-9);
        assert!((lo - lo2).abs() / lo < 1.0e-3);
    }
}
