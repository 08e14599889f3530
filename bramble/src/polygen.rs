//! Plumbing shared by every molecule generator: molecule finalization,
//! volume-fraction blending and the per-ensemble generation loop.

use crate::architecture::{bin_arm_length, senio_prio, PrioSenioTable};
use crate::arena::PolyArena;
use crate::context::{Context, PrioMode, VolFracWeighting};
use crate::ensemble::Ensemble;
use crate::error::{Error, Result};
use crate::massrg::{mass_rg2, mass_segs};
use crate::topology::polyclean;

/// Optional architecture analysis performed while molecules are produced.
pub struct ArchAnalysis<'a> {
    /// Accumulator for the seniority/priority averages.
    pub table: &'a mut PrioSenioTable,
    /// Priority counting mode.
    pub mode: PrioMode,
}

/// Finalizes a freshly grown molecule: optional topology cleanup, local
/// renumbering, mass and g-factor, architecture statistics, export quota.
/// Returns `false` (without registering the molecule) when the arena ran dry
/// while it was being grown.
pub fn finish_molecule(
    arena: &mut PolyArena,
    dist: &mut Ensemble,
    arch: Option<&mut ArchAnalysis<'_>>,
    n: i32,
    bcount: i32,
    clean: bool,
) -> bool {
    if !arena.arms_avail {
        return false;
    }
    if clean {
        polyclean(arena, n);
    }
    let segs = arena.segments_of(n);
    for (i, &m) in segs.iter().enumerate() {
        arena.arm_mut(m).armnum = i as i32;
    }

    let first = arena.poly(n).first_end;
    let (len, _) = mass_segs(arena, first);
    {
        let poly = arena.poly_mut(n);
        poly.num_br = bcount;
        poly.tot_len = len;
    }
    let (_, _, gfact) = mass_rg2(arena, first);
    arena.poly_mut(n).gfactor = gfact;

    if let Some(arch) = arch {
        senio_prio(arena, dist, arch.table, n, arch.mode);
    }
    bin_arm_length(arena, dist, n);
    dist.bobcount(arena, n);
    dist.polymers.push(n);
    true
}

/// Grows `count` molecules with `make` and registers them into `dist`.
/// `make` returns `false` when the arena ran dry or the recursion cap fired;
/// the partial molecule is released, the ensemble error flag latches sticky
/// and no further molecules of this chemistry are produced.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] when the context stop flag is raised, and
/// [`Error::PolymersExhausted`] when no polymer record is available.
pub fn generate_ensemble(
    arena: &mut PolyArena,
    ctx: &mut Context,
    dist: &mut Ensemble,
    count: usize,
    mut make: impl FnMut(&mut PolyArena, &mut Context, &mut Ensemble, i32) -> bool,
) -> Result<()> {
    for _ in 0..count {
        if dist.error {
            break;
        }
        if ctx.stop_requested() {
            return Err(Error::Cancelled);
        }
        let Some(n) = arena.request_poly() else {
            dist.error = true;
            return Err(Error::PolymersExhausted);
        };
        if !make(arena, ctx, dist, n) {
            arena.return_poly(n);
            dist.error = true;
            log::warn!(
                "chemistry {} stopped after {} molecules",
                dist.name,
                dist.polymers.len()
            );
        }
    }
    Ok(())
}

/// Assigns segment volume fractions so that the molecules in `polys` carry
/// `blend_frac` of the total weight. `ByNumber` spreads the weight over
/// total generated mass; `ByWeight` gives every molecule the same share
/// regardless of its mass.
pub fn set_vol_frac(
    arena: &mut PolyArena,
    polys: &[i32],
    blend_frac: f64,
    weighting: VolFracWeighting,
) {
    match weighting {
        VolFracWeighting::ByNumber => {
            let mut total_mass = 0.0;
            for &i in polys {
                let first = arena.poly(i).first_end;
                total_mass += mass_segs(arena, first).0;
            }
            for &i in polys {
                for m in arena.segments_of(i) {
                    let frac = arena.arm(m).arm_len * blend_frac / total_mass;
                    arena.arm_mut(m).vol_fraction = frac;
                }
            }
        }
        VolFracWeighting::ByWeight => {
            let npoly = polys.len() as f64;
            for &i in polys {
                let first = arena.poly(i).first_end;
                let mass = mass_segs(arena, first).0;
                for m in arena.segments_of(i) {
                    let frac = arena.arm(m).arm_len * blend_frac / (mass * npoly);
                    arena.arm_mut(m).vol_fraction = frac;
                }
            }
        }
    }
    for &i in polys {
        let first = arena.poly(i).first_end;
        let (mass, _) = mass_segs(arena, first);
        let mut wtfrac = 0.0;
        for m in arena.segments_of(i) {
            wtfrac += arena.arm(m).vol_fraction;
        }
        let poly = arena.poly_mut(i);
        poly.molmass = mass;
        poly.wtfrac = wtfrac;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::ArenaLimits;
    use crate::relax::poly_start;
    use crate::templates::polygen_lin;
    use float_cmp::assert_approx_eq;

    #[test]
    fn vol_frac_by_number_sums_to_blend() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 64,
            max_poly: 8,
        });
        let mut polys = Vec::new();
        for len in [10.0, 30.0] {
            let p = arena.request_poly().unwrap();
            assert!(polygen_lin(&mut arena, p, len));
            poly_start(&mut arena, p, 1.0);
            polys.push(p);
        }
        set_vol_frac(&mut arena, &polys, 1.0, VolFracWeighting::ByNumber);
        let total: f64 = polys
            .iter()
            .flat_map(|&p| arena.segments_of(p))
            .map(|m| arena.arm(m).vol_fraction)
            .sum();
        assert_approx_eq!(f64, total, 1.0, epsilon = 1.0e-12);
        // the heavier molecule carries three quarters of the weight
        assert_approx_eq!(f64, arena.poly(polys[1]).wtfrac, 0.75, epsilon = 1.0e-12);
    }

    #[test]
    fn vol_frac_by_weight_is_equal_per_molecule() {
        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 64,
            max_poly: 8,
        });
        let mut polys = Vec::new();
        for len in [10.0, 30.0] {
            let p = arena.request_poly().unwrap();
            assert!(polygen_lin(&mut arena, p, len));
            poly_start(&mut arena, p, 1.0);
            polys.push(p);
        }
        set_vol_frac(&mut arena, &polys, 1.0, VolFracWeighting::ByWeight);
        assert_approx_eq!(f64, arena.poly(polys[0]).wtfrac, 0.5, epsilon = 1.0e-12);
        assert_approx_eq!(f64, arena.poly(polys[1]).wtfrac, 0.5, epsilon = 1.0e-12);
    }
}
