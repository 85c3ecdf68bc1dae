pub mod keyboard_input;

mod batch;
mod controller;
mod runtime;
mod types;


pub use controller::SessionController;
pub use keyboard_input::KeyboardInputHandler;
pub use types::{ControlCommand, RunMetadata, RunMode, RunReport, SessionState};
