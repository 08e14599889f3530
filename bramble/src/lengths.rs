//! Random segment-length kernels.
//!
//! Every kernel draws a chain length in monomer counts from its molecular
//! parameters; [`draw_arm`] converts to entanglement units and enforces the
//! one-entanglement minimum.

use rand::Rng;
use rand_distr::{Distribution, LogNormal, Normal, Poisson};
use rand_pcg::Pcg64;

/// Segment length distribution selected by a molecule generator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArmLenDistr {
    /// Every arm gets exactly the number-average length.
    Monodisperse,
    /// Gaussian in chain length.
    Gaussian,
    /// Lognormal, parameterized by mean and polydispersity index.
    Lognormal,
    /// Semi-living: a Poisson number of geometrically distributed blocks.
    SemiLiving,
    /// Flory most-probable distribution.
    Flory,
}

impl ArmLenDistr {
    /// Maps the integer `arm_type` code of the input formats onto a kernel.
    /// Unknown codes fall back to monodisperse with a warning, matching the
    /// behavior of the batch front end.
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Gaussian,
            2 => Self::Lognormal,
            3 => Self::SemiLiving,
            4 => Self::Flory,
            0 => Self::Monodisperse,
            other => {
                log::warn!("unknown arm type {other}; assuming monodisperse");
                Self::Monodisperse
            }
        }
    }
}

/// Draws a Flory (geometric) chain length for a chain with number-average
/// length `n_n` monomers. `logprob` is `ln(1 - 1/n_n)`.
pub fn flory_distb(rng: &mut Pcg64, logprob: f64) -> f64 {
    let mut u: f64 = rng.gen();
    if u == 0.0 {
        u = 1.0;
    }
    (u.ln() / logprob).trunc() + 1.0
}

fn gaussian_len(rng: &mut Pcg64, mn: f64, pdi: f64) -> f64 {
    let sigma = mn * (pdi - 1.0).max(0.0).sqrt();
    let normal = Normal::new(mn, sigma).unwrap_or(Normal::new(mn, 0.0).unwrap());
    normal.sample(rng).max(1.0)
}

fn lognormal_len(rng: &mut Pcg64, mn: f64, pdi: f64) -> f64 {
    let sigma2 = pdi.max(1.0).ln();
    let mu = mn.ln() - 0.5 * sigma2;
    let lognormal = LogNormal::new(mu, sigma2.sqrt()).unwrap_or_else(|_| {
        LogNormal::new(mn.ln(), 0.0).unwrap()
    });
    lognormal.sample(rng)
}

fn semiliving_len(rng: &mut Pcg64, mn: f64, pdi: f64) -> f64 {
    // couplings per chain set the width; their mean follows from the PDI
    let nu = (1.0 / (pdi - 1.0).max(1.0e-6)).min(1.0e4);
    let blocks = Poisson::new(nu).map_or(0.0, |p| p.sample(rng)) as usize + 1;
    let block_mn = mn / (nu + 1.0);
    let logprob = (1.0 - 1.0 / block_mn.max(1.0 + 1.0e-12)).ln();
    (0..blocks).map(|_| flory_distb(rng, logprob)).sum()
}

/// Draws one arm length in entanglement units for a kernel parameterized by
/// the number-average mass `mn` (monomer counts) and `pdi`. Random draws
/// that come out non-positive are clamped to one entanglement length, the
/// minimum strand the tube model can represent. The monodisperse kernel is
/// exact and uncapped so that template scaffolds may use zero-length arms.
pub fn draw_arm(rng: &mut Pcg64, distr: ArmLenDistr, mn: f64, pdi: f64, n_e: f64) -> f64 {
    let monomers = match distr {
        ArmLenDistr::Monodisperse => return mn / n_e,
        ArmLenDistr::Gaussian => gaussian_len(rng, mn, pdi),
        ArmLenDistr::Lognormal => lognormal_len(rng, mn, pdi),
        ArmLenDistr::SemiLiving => semiliving_len(rng, mn, pdi),
        ArmLenDistr::Flory => {
            let logprob = (1.0 - 1.0 / mn).ln();
            flory_distb(rng, logprob)
        }
    };
    let z = monomers / n_e;
    if z <= 0.0 {
        1.0
    } else {
        z
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use float_cmp::assert_approx_eq;
    use rand::SeedableRng;

    fn rng() -> Pcg64 {
        Pcg64::seed_from_u64(12345)
    }

    #[test]
    fn monodisperse_is_exact() {
        let mut rng = rng();
        assert_approx_eq!(
            f64,
            draw_arm(&mut rng, ArmLenDistr::Monodisperse, 5000.0, 1.0, 100.0),
            50.0
        );
    }

    #[test]
    fn flory_mean_matches_parameter() {
        let mut rng = rng();
        let n = 200_000;
        let mn = 350.0;
        let sum: f64 = (0..n)
            .map(|_| draw_arm(&mut rng, ArmLenDistr::Flory, mn, 1.0, 1.0))
            .sum();
        let mean = sum / f64::from(n);
        assert!((mean - mn).abs() / mn < 0.02, "mean = {mean}");
    }

    #[test]
    fn lognormal_mean_and_width() {
        let mut rng = rng();
        let n = 200_000;
        let (mn, pdi) = (1000.0, 2.0);
        let draws: Vec<f64> = (0..n)
            .map(|_| draw_arm(&mut rng, ArmLenDistr::Lognormal, mn, pdi, 1.0))
            .collect();
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        let mw = draws.iter().map(|x| x * x).sum::<f64>() / draws.iter().sum::<f64>();
        assert!((mean - mn).abs() / mn < 0.03, "mean = {mean}");
        assert!((mw / mean - pdi).abs() / pdi < 0.06, "pdi = {}", mw / mean);
    }

    #[test]
    fn draws_never_drop_below_one_entanglement() {
        let mut rng = rng();
        for _ in 0..10_000 {
            let z = draw_arm(&mut rng, ArmLenDistr::Gaussian, 80.0, 3.0, 100.0);
            assert!(z >= 1.0 / 100.0 - 1.0e-12);
        }
        // monodisperse is exact, so scaffold arms may be zero length
        let z = draw_arm(&mut rng, ArmLenDistr::Monodisperse, 0.0, 1.0, 100.0);
        assert_approx_eq!(f64, z, 0.0);
    }
}
