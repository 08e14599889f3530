use super::{GlobalConfiguration, Subcommand};
use anyhow::{bail, Context as _, Result};
use bramble::architecture::{init_arch_bins, PrioSenioTable};
use bramble::arena::{ArenaLimits, PolyArena};
use bramble::context::VolFracWeighting;
use bramble::diene::{DieneCstr, DieneRecipe};
use bramble::ensemble::Ensemble;
use bramble::lengths::{draw_arm, ArmLenDistr};
use bramble::multimet::{CatalystSite, MultiMetCstr};
use bramble::polygen::{finish_molecule, generate_ensemble, set_vol_frac, ArchAnalysis};
use bramble::proto::{polygen_proto, read_proto};
use bramble::relax::poly_start;
use bramble::templates;
use bramble::tobita::{TobitaBatch, TobitaCstr};
use clap::{Parser, ValueHint};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;

/// Synthesize a molecule ensemble and write its saved configuration.
#[derive(Parser)]
pub struct Opts {
    /// Number of molecules to generate.
    #[arg(long, default_value = "10000")]
    num: usize,
    /// Monomer molar mass in g/mol.
    #[arg(long, default_value = "28.0")]
    mass_mono: f64,
    /// Entanglement molar mass in g/mol.
    #[arg(long, default_value = "1120.0")]
    m_e: f64,
    /// Segment pool size.
    #[arg(long, default_value = "1000000")]
    max_arm: usize,
    /// Per-bin quota of molecules saved for the configuration file.
    #[arg(long, default_value = "2")]
    bobbinmax: usize,
    /// Also run the seniority/priority analysis.
    #[arg(long)]
    arch: bool,
    /// Tobita batch kinetics `fin_conv,tau,beta,cs,cb`.
    #[arg(long, value_name = "PARAMS", allow_hyphen_values = true)]
    tobita_batch: Option<String>,
    /// Tobita CSTR kinetics `tau,beta,sigma,lambda`.
    #[arg(long, value_name = "PARAMS", allow_hyphen_values = true)]
    tobita_cstr: Option<String>,
    /// Multi-metallocene sites `tau,mconc;kp,kdb,ks,kplcb,yconc;...`.
    #[arg(long, value_name = "PARAMS", allow_hyphen_values = true)]
    multimet: Option<String>,
    /// Diene CSTR kinetics
    /// `tau,kpM,kDLCB,kpLCB,kpD,keq,ks,D0,C0,ldiene,t_collection`.
    #[arg(long, value_name = "PARAMS", allow_hyphen_values = true)]
    diene: Option<String>,
    /// Monodisperse linear molecules of the given mass `arm_type,mass,pdi`.
    #[arg(long, value_name = "PARAMS")]
    linear: Option<String>,
    /// Symmetric star `arm_type,mass,pdi,num_arm` (3, 4, 6 or 18 arms).
    #[arg(long, value_name = "PARAMS")]
    star: Option<String>,
    /// Prototype architecture file.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    proto: Option<PathBuf>,
    /// Output configuration file.
    #[arg(value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

fn parse_list(what: &str, input: &str, expect: usize) -> Result<Vec<f64>> {
    let values: Vec<f64> = input
        .split(',')
        .map(|v| v.trim().parse::<f64>().with_context(|| format!("bad {what} parameter `{v}`")))
        .collect::<Result<_>>()?;
    if values.len() != expect {
        bail!("{what} expects {expect} comma-separated values, got {}", values.len());
    }
    Ok(values)
}

impl Subcommand for Opts {
    fn run(&self, cfg: &GlobalConfiguration) -> Result<ExitCode> {
        let mut ctx = super::make_context(cfg)?;
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: self.max_arm,
            max_poly: self.num + 1,
        });
        let mut dist = Ensemble::new("reactpol", self.mass_mono, self.m_e);
        dist.bobbinmax = self.bobbinmax;
        dist.bobinit();
        init_arch_bins(&mut dist);
        let mut table = PrioSenioTable::default();
        let max_rlevel = ctx.params.max_rlevel;
        let prio_mode = ctx.params.prio_mode;
        let do_arch = self.arch;
        let mut weighting = VolFracWeighting::ByNumber;

        if let Some(spec) = &self.tobita_batch {
            let v = parse_list("tobita-batch", spec, 5)?;
            let mut gen = TobitaBatch::batch(v[0], v[1], v[2], v[3], v[4], max_rlevel);
            generate_ensemble(&mut arena, &mut ctx, &mut dist, self.num, |a, c, d, n| {
                let mut arch = ArchAnalysis {
                    table: &mut table,
                    mode: prio_mode,
                };
                gen.make(a, c, d, do_arch.then_some(&mut arch), n)
            })?;
        } else if let Some(spec) = &self.tobita_cstr {
            let v = parse_list("tobita-cstr", spec, 4)?;
            let mut gen = TobitaCstr::cstr(v[0], v[1], v[2], v[3], max_rlevel);
            generate_ensemble(&mut arena, &mut ctx, &mut dist, self.num, |a, c, d, n| {
                let mut arch = ArchAnalysis {
                    table: &mut table,
                    mode: prio_mode,
                };
                gen.make(a, c, d, do_arch.then_some(&mut arch), n)
            })?;
        } else if let Some(spec) = &self.multimet {
            let mut blocks = spec.split(';');
            let head = parse_list(
                "multimet reactor",
                blocks.next().context("empty multimet spec")?,
                2,
            )?;
            let cats: Vec<CatalystSite> = blocks
                .map(|b| {
                    let v = parse_list("multimet site", b, 5)?;
                    Ok(CatalystSite {
                        kp: v[0],
                        kdb: v[1],
                        ks: v[2],
                        kplcb: v[3],
                        yconc: v[4],
                    })
                })
                .collect::<Result<_>>()?;
            if cats.is_empty() {
                bail!("multimet needs at least one catalyst block");
            }
            let mut gen = MultiMetCstr::new(&cats, head[0], head[1], max_rlevel);
            generate_ensemble(&mut arena, &mut ctx, &mut dist, self.num, |a, c, d, n| {
                let mut arch = ArchAnalysis {
                    table: &mut table,
                    mode: prio_mode,
                };
                gen.make(a, c, d, do_arch.then_some(&mut arch), n)
            })?;
        } else if let Some(spec) = &self.diene {
            let v = parse_list("diene", spec, 11)?;
            let recipe = DieneRecipe {
                tau: v[0],
                kp_m: v[1],
                k_dlcb: v[2],
                kp_lcb: v[3],
                kp_d: v[4],
                keq: v[5],
                ks: v[6],
                d0: v[7],
                c0: v[8],
                ldiene: v[9],
                t_collection: v[10],
            };
            let mut gen = DieneCstr::new(&recipe, max_rlevel);
            generate_ensemble(&mut arena, &mut ctx, &mut dist, self.num, |a, c, d, n| {
                let mut arch = ArchAnalysis {
                    table: &mut table,
                    mode: prio_mode,
                };
                gen.make(a, c, d, do_arch.then_some(&mut arch), n)
            })?;
        } else if let Some(spec) = &self.linear {
            let v = parse_list("linear", spec, 3)?;
            let (distr, mn, pdi) = scaled_arm(v[0], v[1], v[2], self.mass_mono);
            let n_e = dist.n_e;
            generate_ensemble(&mut arena, &mut ctx, &mut dist, self.num, |a, c, d, n| {
                let seglen = draw_arm(&mut c.rng, distr, mn, pdi, n_e) * n_e;
                if !templates::polygen_lin(a, n, seglen) {
                    return false;
                }
                poly_start(a, n, 1.0);
                let mut arch = ArchAnalysis {
                    table: &mut table,
                    mode: prio_mode,
                };
                finish_molecule(a, d, do_arch.then_some(&mut arch), n, 0, true)
            })?;
        } else if let Some(spec) = &self.star {
            let v = parse_list("star", spec, 4)?;
            let (distr, mn, pdi) = scaled_arm(v[0], v[1], v[2], self.mass_mono);
            let num_arm = v[3] as usize;
            let n_e = dist.n_e;
            generate_ensemble(&mut arena, &mut ctx, &mut dist, self.num, |a, c, d, n| {
                let ok = match num_arm {
                    3 => {
                        let lens = [
                            draw_arm(&mut c.rng, distr, mn, pdi, n_e) * n_e,
                            draw_arm(&mut c.rng, distr, mn, pdi, n_e) * n_e,
                            draw_arm(&mut c.rng, distr, mn, pdi, n_e) * n_e,
                        ];
                        templates::polygen_star3(a, n, lens)
                    }
                    4 => {
                        let lens = [
                            draw_arm(&mut c.rng, distr, mn, pdi, n_e) * n_e,
                            draw_arm(&mut c.rng, distr, mn, pdi, n_e) * n_e,
                            0.0,
                            draw_arm(&mut c.rng, distr, mn, pdi, n_e) * n_e,
                            draw_arm(&mut c.rng, distr, mn, pdi, n_e) * n_e,
                        ];
                        templates::polygen_h(a, n, &lens)
                    }
                    6 => templates::polygen_cayley(
                        a,
                        n,
                        templates::CayleyCore::Three,
                        1,
                        &mut |level| {
                            if level == 0 {
                                0.0
                            } else {
                                draw_arm(&mut c.rng, distr, mn, pdi, n_e) * n_e
                            }
                        },
                    ),
                    18 => templates::polygen_star18(a, n, &mut || {
                        draw_arm(&mut c.rng, distr, mn, pdi, n_e) * n_e
                    }),
                    other => {
                        log::warn!("no {other}-arm star template; using 3 arms");
                        let lens = [
                            draw_arm(&mut c.rng, distr, mn, pdi, n_e) * n_e,
                            draw_arm(&mut c.rng, distr, mn, pdi, n_e) * n_e,
                            draw_arm(&mut c.rng, distr, mn, pdi, n_e) * n_e,
                        ];
                        templates::polygen_star3(a, n, lens)
                    }
                };
                if !ok {
                    return false;
                }
                poly_start(a, n, 1.0);
                let num_br = (a.segments_of(n).len() as i32 - 1) / 2;
                let mut arch = ArchAnalysis {
                    table: &mut table,
                    mode: prio_mode,
                };
                finish_molecule(a, d, do_arch.then_some(&mut arch), n, num_br, false)
            })?;
        } else if let Some(path) = &self.proto {
            weighting = VolFracWeighting::ByWeight;
            let proto = read_proto(&std::fs::read_to_string(path)?)?;
            dist.name = proto.polycode.clone();
            let mass_mono = self.mass_mono;
            let n_e = dist.n_e;
            generate_ensemble(&mut arena, &mut ctx, &mut dist, self.num, |a, c, d, n| {
                if !polygen_proto(a, &mut c.rng, n, &proto, mass_mono, n_e) {
                    return false;
                }
                poly_start(a, n, 1.0);
                let num_br = (a.segments_of(n).len() as i32 - 1) / 2;
                let mut arch = ArchAnalysis {
                    table: &mut table,
                    mode: prio_mode,
                };
                finish_molecule(a, d, do_arch.then_some(&mut arch), n, num_br, false)
            })?;
        } else {
            bail!("select a chemistry: --tobita-batch, --tobita-cstr, --multimet, --diene, --linear, --star or --proto");
        }

        set_vol_frac(&mut arena, &dist.polymers, 1.0, weighting);
        dist.molbin(&arena);
        println!("generated {} molecules", dist.polymers.len());
        println!("M_w = {:.6e}  M_n = {:.6e}  PDI = {:.4}", dist.m_w, dist.m_n, dist.m_w / dist.m_n);
        println!("branches per 500 monomers = {:.4}", dist.brav);
        if self.arch {
            let counts = dist.arch.counts;
            println!(
                "architecture: lin {} star {} H {} 7-arm {} comb {} other {}",
                counts.lin, counts.star, counts.h, counts.seven_arm, counts.comb, counts.other
            );
            println!(
                "max seniority {}  max priority {}",
                dist.arch.max_senio, dist.arch.max_prio
            );
        }

        let mut out = BufWriter::new(File::create(&self.output)?);
        bramble::polyconf::write_polyconf(&mut out, &arena, &dist)?;
        println!("saved {} molecules to {}", dist.nsaved, self.output.display());
        Ok(ExitCode::SUCCESS)
    }
}

/// Applies the historical mass scaling of the batch front end: masses come
/// in g/mol and random kernels are parameterized by the number average.
fn scaled_arm(arm_type: f64, mass: f64, pdi: f64, mass_mono: f64) -> (ArmLenDistr, f64, f64) {
    let distr = ArmLenDistr::from_code(arm_type as i32);
    let mut mn = mass / mass_mono;
    if distr != ArmLenDistr::Monodisperse {
        mn /= pdi;
    }
    (distr, mn, pdi)
}
