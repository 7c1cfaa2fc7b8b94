pub mod frame;
pub mod renderer;
pub mod transport;
