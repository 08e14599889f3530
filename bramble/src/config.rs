//! Flat `key=value` option file parser.
//!
//! One option per line, `#` starts a comment, whitespace is insignificant.
//! Unrecognized or empty options produce a warning that names the key and
//! are otherwise ignored.

use crate::context::{OutMode, Params, PrefMode, PrioMode, ReptScheme};
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Scaling applied to the `LtRsFactor` option value.
const LT_RS_SCALE: f64 = 3.98e-4;

fn is_yes(value: &str) -> bool {
    value.starts_with(['y', 'Y'])
}

fn parse_f64(key: &str, value: &str) -> Result<f64> {
    value.parse().map_err(|_| Error::Parse {
        file: "options".to_owned(),
        reason: format!("option {key} expects a number, got `{value}`"),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value.parse().map_err(|_| Error::Parse {
        file: "options".to_owned(),
        reason: format!("option {key} expects an integer, got `{value}`"),
    })
}

/// Applies the option lines in `text` on top of `params`. Returns the list
/// of warnings produced by unknown or empty options.
///
/// # Errors
///
/// Returns [`Error::Parse`] when a recognized option carries a malformed
/// value. Unknown keys are warnings, not errors.
pub fn apply_options(params: &mut Params, text: &str) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    for raw in text.lines() {
        let line: String = raw
            .split('#')
            .next()
            .unwrap_or("")
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            warnings.push(format!("option line without `=` ignored: `{line}`"));
            continue;
        };
        if value.is_empty() {
            warnings.push(format!("option {key} has no value; keeping default"));
            continue;
        }

        match key {
            "Alpha" => params.alpha = parse_f64(key, value)?,
            // the hop prefactor enters every formula as p^2/2
            "PSquare" => params.p_square = 0.5 * parse_f64(key, value)?,
            "RetLim" => params.ret_lim = parse_f64(key, value)?,
            "TStart" => params.t_start = parse_f64(key, value)?,
            "DtMult" => params.dt_mult = parse_f64(key, value)?,
            "FreqMin" => params.freq_min = parse_f64(key, value)?,
            "FreqMax" => params.freq_max = parse_f64(key, value)?,
            "FreqInterval" => params.freq_interval = parse_f64(key, value)?,
            "MaxwellInterval" => params.maxwell_interval = parse_f64(key, value)?,
            "DefinedMaxwellModes" => params.defined_maxwell_modes = is_yes(value),
            "StretchBinWidth" => params.stretch_bin_width = parse_f64(key, value)?,
            "NumNlinStretch" => params.num_nlin_stretch = parse_usize(key, value)?,
            "NlinAvDt" => params.nlin_av_dt = parse_f64(key, value)?,
            "OutMode" => {
                params.out_mode = match parse_usize(key, value)? {
                    0 => OutMode::PlainText,
                    1 => OutMode::Grace,
                    2 => OutMode::Reptate,
                    other => {
                        return Err(Error::Parse {
                            file: "options".to_owned(),
                            reason: format!("OutMode {other} is not one of 0, 1, 2"),
                        })
                    }
                };
            }
            "PrefMode" => {
                params.pref_mode = match parse_usize(key, value)? {
                    0 => PrefMode::Outer,
                    1 => PrefMode::EffectiveLen,
                    2 => PrefMode::EffectiveFriction,
                    other => {
                        return Err(Error::Parse {
                            file: "options".to_owned(),
                            reason: format!("PrefMode {other} is not one of 0, 1, 2"),
                        })
                    }
                };
            }
            "ReptScheme" => {
                params.rept_scheme = match parse_usize(key, value)? {
                    1 => ReptScheme::ThinTube,
                    2 => ReptScheme::CurrentTube,
                    3 => ReptScheme::FixedAmount,
                    4 => ReptScheme::BackboneAmount,
                    other => {
                        return Err(Error::Parse {
                            file: "options".to_owned(),
                            reason: format!("ReptScheme {other} is not one of 1, 2, 3, 4"),
                        })
                    }
                };
            }
            "ReptAmount" => params.rept_amount = parse_f64(key, value)?,
            "CalcGPCLS" => params.calc_gpcls = is_yes(value),
            "GPCNumBin" => params.gpc_num_bin = parse_usize(key, value)?,
            "GPCPolyMult" => params.gpc_poly_mult = parse_usize(key, value)?,
            "ForceGPCTrace" => params.force_gpc_trace = is_yes(value),
            "LateRouse" => params.late_rouse = is_yes(value),
            "LtRsFactor" => params.lt_rs_factor = LT_RS_SCALE * parse_f64(key, value)?,
            "Snipping" => params.snipping = is_yes(value),
            "NlinPrep" => {
                params.nlin_prep = is_yes(value);
                // preparing the flow pipeline implies recording snip data
                params.snipping = params.snipping || params.nlin_prep;
            }
            "FlowPriority" => params.flow_priority = is_yes(value),
            "FlowTime" | "SnipTime" => params.snip_time = parse_f64(key, value)?,
            "SlavePhiToPhiST" => params.slave_phi_to_phi_st = is_yes(value),
            "PrioMode" => {
                params.prio_mode = if value.starts_with('e') {
                    PrioMode::EntangledOnly
                } else {
                    PrioMode::All
                };
            }
            "GenPolyOnly" => params.gen_poly_only = is_yes(value),
            "CalcNlin" => params.calc_nlin = is_yes(value),
            "MaxRLevel" => params.max_rlevel = parse_usize(key, value)?,
            _ => warnings.push(format!("unrecognized option `{key}` ignored")),
        }
    }

    for warning in &warnings {
        log::warn!("{warning}");
    }

    Ok(warnings)
}

/// Reads an option file and applies it on top of the defaults.
///
/// # Errors
///
/// Returns [`Error::Io`] when the file cannot be read and [`Error::Parse`]
/// when a recognized option carries a malformed value.
pub fn load_options(path: &Path) -> Result<(Params, Vec<String>)> {
    let mut params = Params::default();
    let warnings = apply_options(&mut params, &fs::read_to_string(path)?)?;
    Ok((params, warnings))
}
