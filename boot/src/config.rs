//! Kernel command-line options.

use doomos_acpi::EnableWait;
use doomos_drivers::BackendPreference;
use doomos_lib::{KlogLevel, klog_warn};

/// Runtime knobs read from the loader's command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootConfig {
    pub log_level: KlogLevel,
    pub irq: BackendPreference,
    pub acpi: bool,
    pub hpet: bool,
    pub acpi_enable_polls: u32,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            log_level: KlogLevel::Info,
            irq: BackendPreference::Auto,
            acpi: true,
            hpet: true,
            acpi_enable_polls: EnableWait::DEFAULT_POLLS,
        }
    }
}

impl BootConfig {
    /// Parse whitespace-separated `key=value` tokens. Unknown keys and bare
    /// words are ignored; a value that does not parse keeps the default.
    pub fn from_cmdline(cmdline: &str) -> Self {
        let mut config = Self::default();
        for token in cmdline.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            let applied = match key {
                "log" => KlogLevel::from_name(value).map(|level| config.log_level = level),
                "irq" => parse_backend(value).map(|irq| config.irq = irq),
                "acpi" => parse_switch(value).map(|on| config.acpi = on),
                "hpet" => parse_switch(value).map(|on| config.hpet = on),
                "acpi.enable_polls" => value
                    .parse::<u32>()
                    .ok()
                    .map(|polls| config.acpi_enable_polls = polls),
                _ => continue,
            };
            if applied.is_none() {
                klog_warn!("BOOT: ignoring bad value in '{}'", token);
            }
        }
        config
    }

    #[inline]
    pub fn enable_wait(&self) -> EnableWait {
        EnableWait::with_polls(self.acpi_enable_polls)
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value {
        "on" | "1" | "true" => Some(true),
        "off" | "0" | "false" => Some(false),
        _ => None,
    }
}

fn parse_backend(value: &str) -> Option<BackendPreference> {
    match value {
        "auto" => Some(BackendPreference::Auto),
        "pic" => Some(BackendPreference::Legacy),
        "apic" => Some(BackendPreference::Advanced),
        _ => None,
    }
}
