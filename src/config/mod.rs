//! Bridge configuration

mod settings;

pub use settings::*;
