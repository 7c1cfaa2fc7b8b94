pub mod aggregate;
pub mod collector;
pub mod cpu;
pub mod ticks;
