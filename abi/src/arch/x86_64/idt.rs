/// Base vector for hardware IRQs. Vectors 0-31 belong to CPU exceptions.
pub const IRQ_BASE_VECTOR: u8 = 0x20;

/// Last vector of the hardware IRQ window (64 lines).
pub const IRQ_LAST_VECTOR: u8 = 0x5F;

/// Number of CPU exception vectors below the IRQ window.
pub const EXCEPTION_VECTORS: u8 = 32;
