mod buffer_player;
mod callback;
mod file_player;
mod oscillator;

pub use buffer_player::*;
pub use callback::*;
pub use file_player::*;
pub use oscillator::*;
