#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::many_single_char_names,
    clippy::suboptimal_flops
)]

//! `bramble` synthesizes ensembles of branched polymer molecules under
//! several reactor chemistries, analyzes their molecular-weight
//! distributions and branching architecture, and integrates tube-model
//! relaxation dynamics on them to predict linear and nonlinear melt
//! rheology.

pub mod architecture;
pub mod arena;
pub mod config;
pub mod context;
pub mod diene;
pub mod driver;
pub mod ensemble;
pub mod error;
pub mod extension;
pub mod gel;
pub mod lengths;
pub mod linear_resp;
pub mod massrg;
pub mod mpe;
pub mod multimet;
pub mod nlin;
pub mod polyconf;
pub mod polygen;
pub mod proto;
pub mod relax;
pub mod reptation;
pub mod retraction;
pub mod templates;
pub mod tobita;
pub mod topology;

pub use error::{Error, Result};
