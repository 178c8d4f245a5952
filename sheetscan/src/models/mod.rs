mod classification;
mod record;
mod state;
mod target;

pub use classification::*;
pub use record::*;
pub use state::*;
pub use target::*;
