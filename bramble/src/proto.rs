//! Prototype (user-defined architecture) molecules.
//!
//! A prototype file names the wiring of one molecule once; the generator
//! stamps out any number of copies, drawing each arm length from the
//! per-arm distribution given in the file.

use crate::arena::PolyArena;
use crate::error::{Error, Result};
use crate::lengths::{draw_arm, ArmLenDistr};
use crate::topology::{fold_rd, restore_signs};
use rand_pcg::Pcg64;

/// One arm of a prototype molecule: file-local neighbor indices (`-1` =
/// free), the length distribution code and its parameters.
#[derive(Clone, Copy, Debug)]
pub struct ProtoArm {
    /// Left neighbor pair, file-local and zero-based.
    pub l1: i32,
    /// Second left neighbor.
    pub l2: i32,
    /// Right neighbor pair.
    pub r1: i32,
    /// Second right neighbor.
    pub r2: i32,
    /// Length distribution code (0–4).
    pub arm_type: i32,
    /// Arm mass in g/mol.
    pub mass: f64,
    /// Polydispersity index of the arm distribution.
    pub pdi: f64,
}

/// A parsed prototype file: the architecture code name and its arms.
#[derive(Clone, Debug)]
pub struct Prototype {
    /// Architecture name (at most nine characters are kept).
    pub polycode: String,
    /// Per-arm wiring and length parameters.
    pub arms: Vec<ProtoArm>,
}

/// Parses a prototype file: a code line, the arm count, then per arm
/// `(L1 L2 R1 R2 arm_type mass pdi)`.
///
/// # Errors
///
/// Returns [`Error::Parse`] on malformed content.
pub fn read_proto(text: &str) -> Result<Prototype> {
    let parse_err = |reason: String| Error::Parse {
        file: "prototype".to_owned(),
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
    let narm: usize = tokens
        .next()
        .ok_or_else(|| parse_err("missing arm count".to_owned()))?
        .parse()
        .map_err(|_| parse_err("arm count is not an integer".to_owned()))?;

    let mut arms = Vec::with_capacity(narm);
    for j in 0..narm {
        let mut next_i32 = || -> Result<i32> {
            tokens
                .next()
                .ok_or_else(|| parse_err(format!("arm {j}: truncated row")))?
                .parse()
                .map_err(|_| parse_err(format!("arm {j}: bad integer")))
        };
        let (l1, l2, r1, r2, arm_type) =
            (next_i32()?, next_i32()?, next_i32()?, next_i32()?, next_i32()?);
        let mut next_f64 = || -> Result<f64> {
            tokens
                .next()
                .ok_or_else(|| parse_err(format!("arm {j}: truncated row")))?
                .parse()
                .map_err(|_| parse_err(format!("arm {j}: bad number")))
        };
        let (mass, pdi) = (next_f64()?, next_f64()?);
        arms.push(ProtoArm {
            l1,
            l2,
            r1,
            r2,
            arm_type,
            mass,
            pdi,
        });
    }
    Ok(Prototype { polycode, arms })
}

/// Builds one copy of the prototype into polymer record `p`, drawing every
/// arm length afresh.
pub fn polygen_proto(
    arena: &mut PolyArena,
    rng: &mut Pcg64,
    p: i32,
    proto: &Prototype,
    mass_mono: f64,
    n_e: f64,
) -> bool {
    let narm = proto.arms.len();
    let ids: Vec<i32> = (0..narm).filter_map(|_| arena.request_arm()).collect();
    if ids.len() != narm {
        return false;
    }
    arena.poly_mut(p).first_end = ids[0];

    for (j, (spec, &n)) in proto.arms.iter().zip(&ids).enumerate() {
        let distr = ArmLenDistr::from_code(spec.arm_type);
        let mut mn = spec.mass / mass_mono;
        if distr != ArmLenDistr::Monodisperse {
            mn /= spec.pdi;
        }
        {
            let arm = arena.arm_mut(n);
            arm.arm_len = draw_arm(rng, distr, mn, spec.pdi, n_e);
            arm.l1 = fold_rd(spec.l1, &ids);
            arm.l2 = fold_rd(spec.l2, &ids);
            arm.r1 = fold_rd(spec.r1, &ids);
            arm.r2 = fold_rd(spec.r2, &ids);
        }
        if j > 0 {
            arena.armupdown(ids[j - 1], n);
        }
    }
    restore_signs(arena, &ids);
    true
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::{ArenaLimits, PolyArena};
    use crate::architecture::{calc_priority, calc_seniority};
    use crate::context::PrioMode;
    use crate::relax::poly_start;
    use rand::SeedableRng;

    const H_PROTO: &str = "\
protoH
5
-1 -1  2  1 0 25000.0 1.0
-1 -1  2  0 0 25000.0 1.0
 0  1  3  4 0 50000.0 1.0
 2  4 -1 -1 0 25000.0 1.0
 2  3 -1 -1 0 25000.0 1.0
";

    #[test]
    fn proto_file_round_trips_an_h() {
        let proto = read_proto(H_PROTO).unwrap();
        assert_eq!(proto.polycode, "protoH");
        assert_eq!(proto.arms.len(), 5);

        let mut arena = PolyArena::new(ArenaLimits {
            max_arm: 32,
            max_poly: 2,
        });
        let mut rng = Pcg64::seed_from_u64(12);
        let p = arena.request_poly().unwrap();
        assert!(polygen_proto(&mut arena, &mut rng, p, &proto, 1000.0, 1.0));
        poly_start(&mut arena, p, 1.0);

        assert_eq!(arena.free_ends_of(p).len(), 4);
        calc_seniority(&mut arena, p);
        calc_priority(&mut arena, p, PrioMode::All);
        let segs = arena.segments_of(p);
        let prio: Vec<i32> = segs.iter().map(|&m| arena.arm(m).priority).collect();
        assert_eq!(prio, vec![1, 1, 2, 1, 1]);
    }

    #[test]
    fn truncated_proto_is_an_error() {
        assert!(read_proto("code\n3\n-1 -1 1 2 0 1000.0\n").is_err());
    }
}
