//! Architecture-specific definitions.

pub mod x86_64;

pub use x86_64::*;

/// Base vector for hardware IRQs (line 0 is delivered on this vector).
pub use x86_64::idt::IRQ_BASE_VECTOR;
