use std::sync::atomic::{AtomicBool, Ordering};

/// Reports whether refreshing now is expensive for the device
pub trait PowerMonitor: Send + Sync {
    fn is_low_power(&self) -> bool;
}

/// Power state toggled by the host (or by tests)
#[derive(Debug, Default)]
pub struct PowerState {
    low_power: AtomicBool,
}

impl PowerState {
    pub fn new(low_power: bool) -> Self {
        Self {
            low_power: AtomicBool::new(low_power),
        }
    }

    pub fn set_low_power(&self, low_power: bool) {
        let was = self.low_power.swap(low_power, Ordering::Relaxed);
        if was != low_power {
            tracing::info!("Low power mode {}", if low_power { "on" } else { "off" });
        }
    }
}

impl PowerMonitor for PowerState {
    fn is_low_power(&self) -> bool {
        self.low_power.load(Ordering::Relaxed)
    }
}
