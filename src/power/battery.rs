//! Battery monitoring (belt pack)

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::BatteryConfig;
use crate::error::Result;
use crate::hal::BatterySensor;
use crate::session::events::{EventSender, SessionEvent};
use crate::session::state::RunFlag;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryStatus {
    pub voltage: f32,
    pub percent: u8,
    pub low: bool,
    pub critical: bool,
}

/// Threshold crossings worth telling the operator about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryAlert {
    Low,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryUpdate {
    pub status: BatteryStatus,
    pub alert: Option<BatteryAlert>,
}

/// Linear estimate between the empty and full voltages
pub fn percent_for(voltage: f32, config: &BatteryConfig) -> u8 {
    if voltage >= config.full_voltage {
        return 100;
    }
    if voltage <= config.empty_voltage {
        return 0;
    }
    let range = config.full_voltage - config.empty_voltage;
    (((voltage - config.empty_voltage) / range) * 100.0).clamp(0.0, 100.0) as u8
}

/// Edge detection for the low/critical thresholds
#[derive(Debug)]
pub struct BatteryMonitor {
    config: BatteryConfig,
    status: Option<BatteryStatus>,
    last_critical_alert: Option<Duration>,
}

impl BatteryMonitor {
    pub fn new(config: BatteryConfig) -> Self {
        Self {
            config,
            status: None,
            last_critical_alert: None,
        }
    }

    pub fn status(&self) -> Option<BatteryStatus> {
        self.status
    }

    /// Apply a reading taken at `now` (time since monitor start).
    ///
    /// Crossing into low or critical raises an alert once; while critical,
    /// the alert repeats every `critical_repeat_secs`.
    pub fn update_at(&mut self, voltage: f32, now: Duration) -> BatteryUpdate {
        let was = self.status;
        let status = BatteryStatus {
            voltage,
            percent: percent_for(voltage, &self.config),
            low: voltage <= self.config.low_voltage,
            critical: voltage <= self.config.critical_voltage,
        };
        self.status = Some(status);

        let was_low = was.is_some_and(|s| s.low);
        let was_critical = was.is_some_and(|s| s.critical);

        let alert = if status.critical {
            let repeat = Duration::from_secs(self.config.critical_repeat_secs);
            let due = !was_critical
                || self
                    .last_critical_alert
                    .map_or(true, |last| now.saturating_sub(last) >= repeat);
            if !was_critical {
                tracing::error!("Battery CRITICAL: {:.2}V ({}%)", voltage, status.percent);
            }
            if due {
                self.last_critical_alert = Some(now);
                Some(BatteryAlert::Critical)
            } else {
                None
            }
        } else if status.low && !was_low {
            tracing::warn!("Battery LOW: {:.2}V ({}%)", voltage, status.percent);
            Some(BatteryAlert::Low)
        } else {
            None
        };

        if !status.critical {
            self.last_critical_alert = None;
        }

        BatteryUpdate { status, alert }
    }

    /// Sample the sensor on its own thread every `check_interval_secs`
    /// and report to the orchestrator.
    pub fn spawn(
        mut self,
        mut sensor: Box<dyn BatterySensor>,
        events: EventSender,
        run: RunFlag,
    ) -> Result<JoinHandle<()>> {
        let interval = Duration::from_secs(self.config.check_interval_secs.max(1));

        let handle = thread::Builder::new()
            .name("battery".into())
            .spawn(move || {
                tracing::info!(interval_secs = interval.as_secs(), "Battery monitor started");
                let start = Instant::now();

                loop {
                    match sensor.read_voltage() {
                        Ok(voltage) => {
                            let update = self.update_at(voltage, start.elapsed());
                            tracing::debug!(
                                voltage = update.status.voltage,
                                percent = update.status.percent,
                                "Battery reading"
                            );
                            if events.send(SessionEvent::Battery(update)).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Battery read failed: {}", e),
                    }

                    if !run.sleep(interval) {
                        break;
                    }
                }

                tracing::info!("Battery monitor stopped");
            })?;

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        let config = BatteryConfig::default();
        assert_eq!(percent_for(4.3, &config), 100);
        assert_eq!(percent_for(4.2, &config), 100);
        assert_eq!(percent_for(3.5, &config), 50);
        assert_eq!(percent_for(2.8, &config), 0);
        assert_eq!(percent_for(1.0, &config), 0);
    }

    #[test]
    fn test_low_alert_once() {
        let mut monitor = BatteryMonitor::new(BatteryConfig::default());
        assert_eq!(monitor.update_at(3.8, Duration::ZERO).alert, None);

        let update = monitor.update_at(3.3, Duration::from_secs(30));
        assert!(update.status.low);
        assert_eq!(update.alert, Some(BatteryAlert::Low));

        assert_eq!(monitor.update_at(3.25, Duration::from_secs(60)).alert, None);
    }

    #[test]
    fn test_critical_repeats() {
        let mut monitor = BatteryMonitor::new(BatteryConfig::default());
        monitor.update_at(3.2, Duration::ZERO);

        let update = monitor.update_at(2.95, Duration::from_secs(30));
        assert!(update.status.critical && update.status.low);
        assert_eq!(update.alert, Some(BatteryAlert::Critical));

        assert_eq!(monitor.update_at(2.95, Duration::from_secs(60)).alert, None);
        assert_eq!(
            monitor.update_at(2.95, Duration::from_secs(90)).alert,
            Some(BatteryAlert::Critical)
        );
    }

    #[test]
    fn test_recovery_rearms() {
        let mut monitor = BatteryMonitor::new(BatteryConfig::default());
        monitor.update_at(3.2, Duration::ZERO);
        monitor.update_at(4.0, Duration::from_secs(30));
        assert_eq!(
            monitor.update_at(3.2, Duration::from_secs(60)).alert,
            Some(BatteryAlert::Low)
        );
    }
}
