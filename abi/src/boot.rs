/// Firmware boot device descriptor, forwarded untouched to disk drivers.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BootDevice {
    pub bios_device: u32,
    pub partition: u32,
    pub sub_partition: u32,
}
