//! Secondary system description tables.
//!
//! The AML stream is kept as an owned copy. Nothing here interprets it: the
//! walk only visits every byte and reports how far it got.

use alloc::vec::Vec;

use doomos_lib::klog_debug;

use crate::error::AcpiResult;
use crate::tables::{Signature, Table};

/// Owned copy of one SSDT body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SsdtCopy {
    pub phys: u64,
    pub oem_table_id: [u8; 8],
    aml: Vec<u8>,
}

impl SsdtCopy {
    pub fn parse(table: &Table<'_>) -> AcpiResult<Self> {
        let table = table.expect_signature(Signature::SSDT)?;
        let copy = Self {
            phys: table.phys,
            oem_table_id: table.header.oem_table_id,
            aml: table.copy_body()?,
        };
        let visited = copy.walk();
        klog_debug!(
            "ACPI: SSDT at {:#x} copied, {} AML bytes walked",
            copy.phys,
            visited
        );
        Ok(copy)
    }

    #[inline]
    pub fn aml(&self) -> &[u8] {
        &self.aml
    }

    /// Byte-at-a-time pass over the copy. Returns the number of bytes
    /// visited.
    pub fn walk(&self) -> usize {
        self.aml.iter().fold(0, |visited, _| visited + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AcpiError;
    use crate::test_fixtures::sdt;

    #[test]
    fn body_is_copied_verbatim() {
        let aml = [0x10, 0x1A, b'\\', b'_', b'S', b'B', b'_', 0x5B, 0x82];
        let bytes = sdt(b"SSDT", 2, &aml);
        let copy = SsdtCopy::parse(&Table::from_bytes(0x3000, &bytes).unwrap()).unwrap();
        assert_eq!(copy.phys, 0x3000);
        assert_eq!(copy.aml(), &aml);
        assert_eq!(copy.walk(), aml.len());
        assert_eq!(&copy.oem_table_id, b"FIXTURE ");
    }

    #[test]
    fn wrong_signature_is_refused() {
        let bytes = sdt(b"DSDT", 2, &[0; 4]);
        let table = Table::from_bytes(0, &bytes).unwrap();
        assert!(matches!(
            SsdtCopy::parse(&table),
            Err(AcpiError::BadSignature { .. })
        ));
    }
}
