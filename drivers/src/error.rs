use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqError {
    /// Line index outside the active controller's handler table.
    InvalidLine { line: usize, capacity: usize },
    /// The line exists in the table but no hardware register masks it.
    NoMaskRegister { line: usize },
}

impl fmt::Display for IrqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLine { line, capacity } => {
                write!(f, "invalid IRQ line {} (capacity {})", line, capacity)
            }
            Self::NoMaskRegister { line } => {
                write!(f, "IRQ line {} has no mask register", line)
            }
        }
    }
}

pub type IrqResult<T = ()> = Result<T, IrqError>;
