//! HPET (High Precision Event Timer) driver.
//!
//! Used as a free-running monotonic counter for busy-wait delays. Channel 0
//! is armed at a fixed rate with its interrupt left disabled. The register
//! block is reached through MMIO or, when firmware says so, through a port
//! window of the same layout.

use doomos_acpi::TimerBlock;
use doomos_lib::{Mmio, MmioMapper, PortIo, klog_debug, klog_error, klog_info, klog_warn};

/// Physical base used when firmware reports zero.
pub const HPET_DEFAULT_BASE: u64 = 0xFED0_0000;
pub const HPET_REGION_SIZE: usize = 0x400;

/// Nominal main-counter frequency used for delay conversion.
pub const HPET_NOMINAL_HZ: u64 = 14_318_180;
/// Rate channel 0 is programmed for.
pub const HPET_CHANNEL_RATE: u64 = 2_500_000;

/// General Capabilities and ID. [63:32] CLK_PERIOD in femtoseconds.
const REG_GENERAL_CAP: usize = 0x000;
const REG_GENERAL_CONFIG: usize = 0x010;
const REG_MAIN_COUNTER: usize = 0x0F0;

const CONFIG_ENABLE: u64 = 1 << 0;

const TIMER_STRIDE: usize = 0x20;
const TIMER_CONF_INT_ENABLE: u64 = 1 << 2;
/// Bit 0 of a channel's configuration, set whenever a channel is armed.
const TIMER_CONF_ARMED: u64 = 1 << 0;

const FEMTOS_PER_SECOND: u64 = 1_000_000_000_000_000;
const NANOS_PER_SECOND: u128 = 1_000_000_000;

#[inline]
const fn timer_config(id: usize) -> usize {
    0x100 + id * TIMER_STRIDE
}

#[inline]
const fn timer_comparator(id: usize) -> usize {
    0x108 + id * TIMER_STRIDE
}

/// Port-mapped register block: offset `n` is port `base + n`.
pub struct PortWindow<P: PortIo> {
    ports: P,
    base: u16,
}

impl<P: PortIo> PortWindow<P> {
    pub fn new(ports: P, base: u16) -> Self {
        Self { ports, base }
    }
}

impl<P: PortIo> Mmio for PortWindow<P> {
    fn read_u32(&self, offset: usize) -> u32 {
        self.ports.read_u32(self.base.wrapping_add(offset as u16))
    }

    fn write_u32(&self, offset: usize, value: u32) {
        self.ports
            .write_u32(self.base.wrapping_add(offset as u16), value)
    }
}

/// Either access method behind one register interface.
pub enum HpetRegs<R: Mmio, P: PortIo> {
    Memory(R),
    Port(PortWindow<P>),
}

impl<R: Mmio, P: PortIo> Mmio for HpetRegs<R, P> {
    fn read_u32(&self, offset: usize) -> u32 {
        match self {
            Self::Memory(regs) => regs.read_u32(offset),
            Self::Port(regs) => regs.read_u32(offset),
        }
    }

    fn write_u32(&self, offset: usize, value: u32) {
        match self {
            Self::Memory(regs) => regs.write_u32(offset, value),
            Self::Port(regs) => regs.write_u32(offset, value),
        }
    }
}

pub struct Hpet<R: Mmio> {
    regs: R,
    phys_base: u64,
}

impl<R: Mmio, P: PortIo> Hpet<HpetRegs<R, P>> {
    /// Locate the block, start the main counter and arm channel 0.
    /// `None` only when a memory-mapped block cannot be mapped.
    pub fn initialize<M>(block: Option<&TimerBlock>, mapper: &M, ports: P) -> Option<Self>
    where
        M: MmioMapper<Region = R>,
    {
        let address = block.map(|block| block.address).unwrap_or_default();
        let base = match address.address {
            0 => {
                klog_debug!("HPET: no firmware base, using {:#x}", HPET_DEFAULT_BASE);
                HPET_DEFAULT_BASE
            }
            base => base,
        };

        let regs = if address.is_io() {
            HpetRegs::Port(PortWindow::new(ports, base as u16))
        } else {
            let Some(region) = mapper.map(base, HPET_REGION_SIZE) else {
                klog_warn!("HPET: cannot map registers at {:#x}", base);
                return None;
            };
            HpetRegs::Memory(region)
        };

        let hpet = Hpet::new(regs, base);
        hpet.enable();
        hpet.configure_timer(0, HPET_CHANNEL_RATE);
        klog_info!(
            "HPET: {} at {:#x}, period {} fs",
            if address.is_io() { "ports" } else { "mmio" },
            base,
            hpet.period_fs()
        );
        Some(hpet)
    }
}

impl<R: Mmio> Hpet<R> {
    pub fn new(regs: R, phys_base: u64) -> Self {
        Self { regs, phys_base }
    }

    #[inline]
    pub fn phys_base(&self) -> u64 {
        self.phys_base
    }

    pub fn enable(&self) {
        let config = self.regs.read_u64(REG_GENERAL_CONFIG);
        self.regs
            .write_u64(REG_GENERAL_CONFIG, config | CONFIG_ENABLE);
    }

    /// Main-counter tick length from the capabilities register.
    pub fn period_fs(&self) -> u32 {
        (self.regs.read_u64(REG_GENERAL_CAP) >> 32) as u32
    }

    /// Halt the counter, program channel `id` for `rate` Hz with its
    /// interrupt disabled, then restart the counter.
    pub fn configure_timer(&self, id: usize, rate: u64) {
        self.regs.write_u64(REG_GENERAL_CONFIG, 0);

        let period = self.period_fs() as u64;
        if period == 0 || rate == 0 {
            klog_error!("HPET: invalid period {} fs for {} Hz", period, rate);
            self.enable();
            return;
        }
        let frequency = FEMTOS_PER_SECOND / period;
        let comparator = frequency / rate / 2;
        self.regs.write_u64(timer_comparator(id), comparator);

        let config = self.regs.read_u64(timer_config(id));
        self.regs.write_u64(
            timer_config(id),
            (config & !TIMER_CONF_INT_ENABLE) | TIMER_CONF_ARMED,
        );
        klog_debug!(
            "HPET: channel {} comparator {} ({} Hz counter)",
            id,
            comparator,
            frequency
        );

        self.enable();
    }

    /// Low half then high half; the two reads can tear when the low half
    /// wraps in between.
    #[inline]
    pub fn read_counter(&self) -> u64 {
        self.regs.read_u64(REG_MAIN_COUNTER)
    }

    #[inline]
    pub fn ticks_for_seconds(seconds: u64) -> u64 {
        seconds.saturating_mul(HPET_NOMINAL_HZ)
    }

    #[inline]
    pub fn ticks_for_ns(ns: u64) -> u64 {
        (ns as u128 * HPET_NOMINAL_HZ as u128 / NANOS_PER_SECOND) as u64
    }

    pub fn sleep(&self, seconds: u64) {
        self.spin_ticks(Self::ticks_for_seconds(seconds));
    }

    pub fn sleep_ns(&self, ns: u64) {
        self.spin_ticks(Self::ticks_for_ns(ns));
    }

    fn spin_ticks(&self, ticks: u64) {
        let start = self.read_counter();
        while self.read_counter().wrapping_sub(start) < ticks {
            core::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doomos_acpi::GenericAddress;
    use doomos_lib::testing::{FakeMapper, FakeMmio, FakePorts, MmioAccess};

    const PERIOD_FS: u32 = 69_841_279;

    fn block(space: u8, address: u64) -> TimerBlock {
        TimerBlock {
            block_id: 0x8086_A201,
            address: GenericAddress {
                address_space: space,
                address,
                ..GenericAddress::default()
            },
            hpet_number: 0,
            minimum_tick: 0x80,
            page_protection: 0,
        }
    }

    fn mapped(base: u64) -> (FakeMapper, FakeMmio) {
        let regs = FakeMmio::new().with_counter(REG_MAIN_COUNTER, 0, 1_000_000);
        regs.set(REG_GENERAL_CAP + 4, PERIOD_FS);
        let mapper = FakeMapper::new();
        mapper.insert(base, regs.clone());
        (mapper, regs)
    }

    #[test]
    fn zero_base_uses_the_default_block() {
        let (mapper, regs) = mapped(HPET_DEFAULT_BASE);
        let hpet = Hpet::initialize(None, &mapper, FakePorts::new()).unwrap();
        assert_eq!(hpet.phys_base(), HPET_DEFAULT_BASE);
        assert_eq!(mapper.requests(), vec![(HPET_DEFAULT_BASE, HPET_REGION_SIZE)]);
        assert_eq!(regs.get(REG_GENERAL_CONFIG) as u64 & CONFIG_ENABLE, 1);
    }

    #[test]
    fn channel_zero_is_armed_without_interrupts() {
        let (mapper, regs) = mapped(0xFED4_0000);
        regs.set(timer_config(0), TIMER_CONF_INT_ENABLE as u32 | 0x30);
        let block = block(GenericAddress::SPACE_MEMORY, 0xFED4_0000);
        Hpet::initialize(Some(&block), &mapper, FakePorts::new()).unwrap();

        // 1e15 / 69_841_279 = 14_318_180 Hz; / 2.5 MHz / 2 = 2.
        assert_eq!(regs.get(timer_comparator(0)), 2);
        assert_eq!(regs.get(timer_comparator(0) + 4), 0);
        assert_eq!(regs.get(timer_config(0)), 0x31);
        assert_eq!(regs.writes_to(REG_GENERAL_CONFIG), vec![1, 0, 1]);
        assert_eq!(regs.get(REG_GENERAL_CONFIG), 1);
    }

    #[test]
    fn port_space_goes_through_the_port_window() {
        let ports = FakePorts::new();
        ports.set(0x5004, PERIOD_FS);
        let block = block(GenericAddress::SPACE_IO, 0x5000);
        let mapper = FakeMapper::new();

        let hpet = Hpet::initialize(Some(&block), &mapper, ports.clone()).unwrap();
        assert!(mapper.requests().is_empty());
        assert_eq!(hpet.period_fs(), PERIOD_FS);
        assert_eq!(ports.writes_to(0x5108), vec![2]);
        assert_eq!(ports.writes_to(0x5010).last(), Some(&1));
    }

    #[test]
    fn unmappable_block_yields_none() {
        let block = block(GenericAddress::SPACE_MEMORY, 0xFED4_0000);
        let mapper: FakeMapper = FakeMapper::new();
        assert!(Hpet::initialize(Some(&block), &mapper, FakePorts::new()).is_none());
    }

    #[test]
    fn counter_reads_low_then_high() {
        let regs = FakeMmio::new().with_counter(REG_MAIN_COUNTER, 0x1_0000_0005, 0);
        let hpet = Hpet::new(regs.clone(), HPET_DEFAULT_BASE);
        assert_eq!(hpet.read_counter(), 0x1_0000_0005);
        assert_eq!(
            regs.log(),
            vec![
                MmioAccess::Read(REG_MAIN_COUNTER),
                MmioAccess::Read(REG_MAIN_COUNTER + 4)
            ]
        );
    }

    #[test]
    fn tick_conversion_uses_the_nominal_frequency() {
        assert_eq!(Hpet::<FakeMmio>::ticks_for_seconds(2), 28_636_360);
        assert_eq!(Hpet::<FakeMmio>::ticks_for_ns(1_000_000), 14_318);
        assert_eq!(Hpet::<FakeMmio>::ticks_for_ns(0), 0);
    }

    #[test]
    fn sleep_spins_until_enough_ticks_elapse() {
        let regs = FakeMmio::new().with_counter(REG_MAIN_COUNTER, 0, 1_000_000);
        let hpet = Hpet::new(regs.clone(), HPET_DEFAULT_BASE);
        hpet.sleep(1);
        let elapsed = regs.counter_value().unwrap();
        assert!(elapsed >= HPET_NOMINAL_HZ);
        assert!(elapsed <= HPET_NOMINAL_HZ + 2_000_000);

        regs.clear_log();
        hpet.sleep_ns(0);
        assert_eq!(regs.access_count(), 4);
    }
}
