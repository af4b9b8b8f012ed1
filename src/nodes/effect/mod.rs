mod converter;
mod filter;
mod gain;
mod mixer;
mod pan;
mod tap;

pub use converter::*;
pub use filter::*;
pub use gain::*;
pub use mixer::*;
pub use pan::*;
pub use tap::*;
