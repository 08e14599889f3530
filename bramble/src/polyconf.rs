//! Saved-configuration files: the flattened, renumbered molecule format
//! consumed by the downstream rheology solver.
//!
//! Header: code name, entanglement count `N_e`, number of saved molecules.
//! Per molecule: the segment count, then one row
//! `(L1 L2 R1 R2 arm_len/N_e vol_fraction)` per segment with neighbor
//! indices renumbered polymer-local and zero-based; `-1` is a free face.

use crate::arena::PolyArena;
use crate::ensemble::Ensemble;
use crate::error::{Error, Result};
use crate::relax::poly_start;
use crate::topology::{fold_rd, restore_signs};
use std::io::Write;

/// Writes every saved molecule of `dist`. Molecules beyond the per-bin
/// quota lost their arms at generation time; the surviving ones carry the
/// bin's overflow ratio as a weight enrichment.
///
/// # Errors
///
/// Propagates I/O errors from `out`.
pub fn write_polyconf(out: &mut impl Write, arena: &PolyArena, dist: &Ensemble) -> Result<()> {
    let n_e = dist.m_e / dist.monmass;
    writeln!(out, "{}", dist.name)?;
    writeln!(out, "{n_e:.6}")?;
    writeln!(out, "{}", dist.nsaved)?;

    let npoly = dist.polymers.len() as f64;
    for &i in &dist.polymers {
        let poly = arena.poly(i);
        if !poly.saved {
            continue;
        }
        // integer overflow ratio, 1 for underfull bins
        let enrich = (dist.numinbin[poly.bin] / dist.bobbinmax).max(1) as f64;

        let segs = arena.segments_of(i);
        if segs.len() == 1 {
            // a cleaned-up linear is one segment; split it for the solver
            writeln!(out, "2")?;
            let first = poly.first_end;
            let armwt = 0.5 * arena.arm(first).arm_len / poly.tot_len / npoly * enrich;
            let armz = 0.5 * arena.arm(first).arm_len / n_e;
            writeln!(
                out,
                "{:7} {:7} {:7} {:7} {:20.13e} {:20.13e}",
                -1, -1, 1, -1, armz, armwt
            )?;
            writeln!(
                out,
                "{:7} {:7} {:7} {:7} {:20.13e} {:20.13e}",
                0, -1, -1, -1, armz, armwt
            )?;
            continue;
        }

        writeln!(out, "{}", segs.len())?;
        let local = |e: i32| -> i32 {
            if e == 0 {
                -1
            } else {
                arena.arm(e).armnum
            }
        };
        for &m in &segs {
            let arm = arena.arm(m);
            let armwt = arm.arm_len / poly.tot_len / npoly * enrich;
            let armz = arm.arm_len / n_e;
            writeln!(
                out,
                "{:7} {:7} {:7} {:7} {:20.13e} {:20.13e}",
                local(arm.l1),
                local(arm.l2),
                local(arm.r1),
                local(arm.r2),
                armz,
                armwt
            )?;
        }
    }
    Ok(())
}

/// One row of a configuration file.
#[derive(Clone, Copy, Debug)]
pub struct ConfRow {
    /// Neighbor entries, file-local zero-based, `-1` free.
    pub links: [i32; 4],
    /// Segment length in entanglement units.
    pub arm_len: f64,
    /// Weight carried by the segment.
    pub vol_fraction: f64,
}

/// A parsed configuration file.
#[derive(Clone, Debug)]
pub struct PolyConf {
    /// Code name from the header.
    pub polycode: String,
    /// Entanglements per chain unit from the header.
    pub n_e: f64,
    /// Molecules, each a list of rows.
    pub polymers: Vec<Vec<ConfRow>>,
}

/// Parses a configuration file.
///
/// # Errors
///
/// Returns [`Error::Parse`] on malformed content.
pub fn read_polyconf(text: &str) -> Result<PolyConf> {
    let parse_err = |reason: String| Error::Parse {
        file: "polyconf".to_owned(),
        reason,
    };
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let polycode: String = lines
        .next()
        .ok_or_else(|| parse_err("missing code line".to_owned()))?
        .trim()
        .chars()
        .take(9)
        .collect();
    let mut tokens = lines.flat_map(str::split_whitespace);
    let mut next = |what: &str| -> Result<String> {
        tokens
            .next()
            .map(str::to_owned)
            .ok_or_else(|| parse_err(format!("truncated file at {what}")))
    };
    let n_e: f64 = next("N_e")?
        .parse()
        .map_err(|_| parse_err("N_e is not a number".to_owned()))?;
    let num_poly: usize = next("polymer count")?
        .parse()
        .map_err(|_| parse_err("polymer count is not an integer".to_owned()))?;

    let mut polymers = Vec::with_capacity(num_poly);
    for i in 0..num_poly {
        let numseg: usize = next("segment count")?
            .parse()
            .map_err(|_| parse_err(format!("polymer {i}: bad segment count")))?;
        let mut rows = Vec::with_capacity(numseg);
        for j in 0..numseg {
            let mut links = [0_i32; 4];
            for link in &mut links {
                *link = next("link")?
                    .parse()
                    .map_err(|_| parse_err(format!("polymer {i} segment {j}: bad link")))?;
            }
            let arm_len: f64 = next("length")?
                .parse()
                .map_err(|_| parse_err(format!("polymer {i} segment {j}: bad length")))?;
            let vol_fraction: f64 = next("weight")?
                .parse()
                .map_err(|_| parse_err(format!("polymer {i} segment {j}: bad weight")))?;
            rows.push(ConfRow {
                links,
                arm_len,
                vol_fraction,
            });
        }
        polymers.push(rows);
    }
    Ok(PolyConf {
        polycode,
        n_e,
        polymers,
    })
}

/// Materializes every molecule of `conf` into the arena, scaling segment
/// weights by `blend_frac`, and prepares them for relaxation. Returns the
/// polymer records in file order.
///
/// # Errors
///
/// Returns [`Error::ArenaExhausted`] or [`Error::PolymersExhausted`] when
/// the pools run dry; everything placed so far is released.
pub fn load_polyconf(
    arena: &mut PolyArena,
    conf: &PolyConf,
    blend_frac: f64,
) -> Result<Vec<i32>> {
    let mut placed = Vec::with_capacity(conf.polymers.len());
    for rows in &conf.polymers {
        let Some(p) = arena.request_poly() else {
            release(arena, &placed);
            return Err(Error::PolymersExhausted);
        };
        let mut ids = Vec::with_capacity(rows.len());
        for _ in rows {
            match arena.request_arm() {
                Some(m) => ids.push(m),
                None => {
                    for &m in &ids {
                        arena.return_arm(m);
                    }
                    arena.poly_mut(p).first_end = 0;
                    arena.return_poly(p);
                    release(arena, &placed);
                    return Err(Error::ArenaExhausted);
                }
            }
        }
        arena.poly_mut(p).first_end = ids[0];
        for (j, (row, &m)) in rows.iter().zip(&ids).enumerate() {
            {
                let arm = arena.arm_mut(m);
                arm.arm_len = row.arm_len;
                arm.vol_fraction = row.vol_fraction * blend_frac;
            }
            {
                let arm = arena.arm_mut(m);
                arm.l1 = fold_rd(row.links[0], &ids);
                arm.l2 = fold_rd(row.links[1], &ids);
                arm.r1 = fold_rd(row.links[2], &ids);
                arm.r2 = fold_rd(row.links[3], &ids);
            }
            if j > 0 {
                arena.armupdown(ids[j - 1], m);
            }
        }
        restore_signs(arena, &ids);
        poly_start(arena, p, 1.0);
        let (tot, _) = crate::massrg::mass_segs(arena, ids[0]);
        let mut wtfrac = 0.0;
        for &m in &ids {
            wtfrac += arena.arm(m).vol_fraction;
        }
        {
            let poly = arena.poly_mut(p);
            poly.tot_len = tot;
            poly.molmass = tot;
            poly.wtfrac = wtfrac;
            poly.num_br = (ids.len() as i32 - 1) / 2;
        }
        placed.push(p);
    }
    Ok(placed)
}

fn release(arena: &mut PolyArena, placed: &[i32]) {
    for &p in placed {
        arena.return_poly(p);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::{ArenaLimits, PolyArena};
    use crate::context::{Context, Params};
    use crate::massrg::{mass_rg2, mass_segs};
    use crate::polygen::generate_ensemble;
    use crate::tobita::TobitaBatch;
    use float_cmp::assert_approx_eq;

    #[test]
    fn round_trip_preserves_mass_g_and_branches() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 400_000,
            max_poly: 10_000,
        });
        let mut ctx = Context::seeded(Params::default(), 31415);
        let mut dist = Ensemble::new("reactpol", 28.0, 1120.0);
        dist.bobbinmax = 5;
        dist.bobinit();
        let mut gen = TobitaBatch::batch(0.55, 3.0e-4, 0.0, 0.0, 8.0e-4, 5000);
        generate_ensemble(&mut arena, &mut ctx, &mut dist, 200, |arena, ctx, dist, n| {
            gen.make(arena, ctx, dist, None, n)
        })
        .unwrap();

        // reference values for the saved molecules, in file order
        let mut reference = Vec::new();
        for &i in &dist.polymers {
            let poly = arena.poly(i);
            if !poly.saved {
                continue;
            }
            let first = poly.first_end;
            let (len, _) = mass_segs(&arena, first);
            let (_, _, g) = mass_rg2(&arena, first);
            reference.push((len / dist.n_e, g, poly.num_br));
        }
        assert!(!reference.is_empty());

        let mut buffer = Vec::new();
        write_polyconf(&mut buffer, &arena, &dist).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        let conf = read_polyconf(&text).unwrap();
        assert_eq!(conf.polymers.len(), reference.len());
        assert_approx_eq!(f64, conf.n_e, 40.0, epsilon = 1.0e-6);

        let mut arena2 = PolyArena::new(ArenaLimits {
            max_arm: 400_000,
            max_poly: 10_000,
        });
        let placed = load_polyconf(&mut arena2, &conf, 1.0).unwrap();
        for (&p, &(len_z, g_ref, num_br)) in placed.iter().zip(&reference) {
            let first = arena2.poly(p).first_end;
            let (len, nseg) = mass_segs(&arena2, first);
            assert_approx_eq!(f64, len, len_z, epsilon = 1.0e-9 * len_z.max(1.0));
            let (_, _, g) = mass_rg2(&arena2, first);
            assert_approx_eq!(f64, g, g_ref, epsilon = 1.0e-12);
            if num_br > 0 {
                assert_eq!(nseg as i32, 2 * num_br + 1);
            } else {
                assert_eq!(nseg, 2);
            }
        }
    }

    #[test]
    fn weights_carry_the_enrichment() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 100_000,
            max_poly: 5_000,
        });
        let mut ctx = Context::seeded(Params::default(), 7);
        let mut dist = Ensemble::new("reactpol", 28.0, 1120.0);
        dist.bobbinmax = 1;
        dist.bobinit();
        let mut gen = TobitaBatch::batch(0.50, 4.0e-4, 0.0, 0.0, 2.0e-4, 5000);
        generate_ensemble(&mut arena, &mut ctx, &mut dist, 300, |arena, ctx, dist, n| {
            gen.make(arena, ctx, dist, None, n)
        })
        .unwrap();

        let mut buffer = Vec::new();
        write_polyconf(&mut buffer, &arena, &dist).unwrap();
        let conf = read_polyconf(&String::from_utf8(buffer).unwrap()).unwrap();

        // enriched weights restore roughly the full ensemble weight
        let total: f64 = conf
            .polymers
            .iter()
            .flatten()
            .map(|row| row.vol_fraction)
            .sum();
        assert!(total > 0.3 && total < 1.7, "total weight = {total}");
    }

    #[test]
    fn malformed_header_is_rejected() {
        assert!(read_polyconf("").is_err());
        assert!(read_polyconf("code\nnot-a-number\n1\n").is_err());
    }
}
