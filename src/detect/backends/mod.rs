pub mod cpu;
pub mod stub;

pub use cpu::ColorTargetDetector;
pub use stub::StubDetector;
