//! Domain models for the Metal Recovery Platform

mod account;
mod analysis;
mod lot;
mod metal;
mod quotation;
mod recovery;
mod settlement;

pub use account::*;
pub use analysis::*;
pub use lot::*;
pub use metal::*;
pub use quotation::*;
pub use recovery::*;
pub use settlement::*;
