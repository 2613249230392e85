//! Port-mapped I/O.
//!
//! [`Port`] is a typed port number over the `in`/`out` instructions. Code that
//! must run under host tests talks to ports through the [`PortIo`] trait
//! instead, with [`RawPorts`] as the hardware implementation and
//! [`crate::testing::FakePorts`] as the recording fake.

use core::marker::PhantomData;

use x86_64::instructions::port::{PortRead, PortWrite};

#[derive(Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct Port<T> {
    port: u16,
    _width: PhantomData<T>,
}

impl<T> Clone for Port<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Port<T> {}

impl<T> Port<T> {
    pub const fn new(port: u16) -> Self {
        Self {
            port,
            _width: PhantomData,
        }
    }

    #[inline]
    pub const fn number(self) -> u16 {
        self.port
    }

    /// Port at `base + offset`, used for register blocks such as a UART.
    #[inline]
    pub const fn offset(self, offset: u16) -> Self {
        Self::new(self.port.wrapping_add(offset))
    }
}

impl<T: PortRead> Port<T> {
    /// # Safety
    ///
    /// Port reads can have device side effects; the caller owns the device.
    #[inline]
    pub unsafe fn read(&self) -> T {
        unsafe { T::read_from_port(self.port) }
    }
}

impl<T: PortWrite> Port<T> {
    /// # Safety
    ///
    /// Port writes reprogram hardware; the caller owns the device.
    #[inline]
    pub unsafe fn write(&self, value: T) {
        unsafe { T::write_to_port(self.port, value) }
    }
}

/// Port I/O seam used by every driver that must be testable off-target.
pub trait PortIo {
    fn read_u8(&self, port: u16) -> u8;
    fn write_u8(&self, port: u16, value: u8);
    fn read_u16(&self, port: u16) -> u16;
    fn write_u16(&self, port: u16, value: u16);
    fn read_u32(&self, port: u16) -> u32;
    fn write_u32(&self, port: u16, value: u32);

    /// Short delay for slow legacy devices: a write to the POST port.
    fn io_wait(&self) {
        self.write_u8(crate::ports::IO_DELAY.number(), 0);
    }
}

impl<T: PortIo + ?Sized> PortIo for &T {
    fn read_u8(&self, port: u16) -> u8 {
        (**self).read_u8(port)
    }
    fn write_u8(&self, port: u16, value: u8) {
        (**self).write_u8(port, value)
    }
    fn read_u16(&self, port: u16) -> u16 {
        (**self).read_u16(port)
    }
    fn write_u16(&self, port: u16, value: u16) {
        (**self).write_u16(port, value)
    }
    fn read_u32(&self, port: u16) -> u32 {
        (**self).read_u32(port)
    }
    fn write_u32(&self, port: u16, value: u32) {
        (**self).write_u32(port, value)
    }
}

/// Direct `in`/`out` instructions.
#[derive(Clone, Copy, Debug)]
pub struct RawPorts {
    _private: (),
}

impl RawPorts {
    /// # Safety
    ///
    /// Only valid in ring 0 on x86; every access goes straight to hardware.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl PortIo for RawPorts {
    fn read_u8(&self, port: u16) -> u8 {
        unsafe { Port::<u8>::new(port).read() }
    }
    fn write_u8(&self, port: u16, value: u8) {
        unsafe { Port::<u8>::new(port).write(value) }
    }
    fn read_u16(&self, port: u16) -> u16 {
        unsafe { Port::<u16>::new(port).read() }
    }
    fn write_u16(&self, port: u16, value: u16) {
        unsafe { Port::<u16>::new(port).write(value) }
    }
    fn read_u32(&self, port: u16) -> u32 {
        unsafe { Port::<u32>::new(port).read() }
    }
    fn write_u32(&self, port: u16, value: u32) {
        unsafe { Port::<u32>::new(port).write(value) }
    }
}
