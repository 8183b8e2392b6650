use embassy_time::Duration;
use motelink_core::TICK_HZ;

use crate::{LinkError, PeripheralLink, Timebase};

#[derive(Default)]
pub struct FakeLink {
    pub connected: bool,
    pub sent: Vec<Vec<u8>>,
    pub attempts: usize,
    /// Report the link as down once this many packets went out.
    pub drop_after: Option<usize>,
    /// 1-based notify attempt that fails.
    pub fail_at: Option<usize>,
}

impl FakeLink {
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }
}

impl PeripheralLink for FakeLink {
    fn is_connected(&self) -> bool {
        self.connected && self.drop_after.is_none_or(|n| self.sent.len() < n)
    }

    async fn notify(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.attempts += 1;
        if self.fail_at == Some(self.attempts) {
            return Err(LinkError);
        }
        self.sent.push(bytes.to_vec());
        Ok(())
    }
}

/// Clock that advances instantly by whatever it is asked to sleep.
pub struct FakeClock {
    pub tick: u32,
    pub slept: Duration,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self {
            tick: 0,
            slept: Duration::from_ticks(0),
        }
    }
}

impl Timebase for FakeClock {
    fn now_tick(&self) -> u32 {
        self.tick
    }

    async fn delay(&mut self, duration: Duration) {
        self.slept += duration;
        self.tick += (duration.as_millis() * u64::from(TICK_HZ) / 1000) as u32;
    }
}
