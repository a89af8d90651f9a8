use std::time::{Duration, Instant};

/// 超时扫描定时器的自有状态。
///
/// 定时器本身不调度任何任务：驱动方读取 [`SweepTimer::deadline`] 决定何时回调
/// `on_timeout_tick`。`running` 只由写调度器（启动）与超时扫描、生命周期管理（停止/重启）修改。
#[derive(Clone, Copy, Debug)]
pub struct SweepTimer {
    interval: Duration,
    running: bool,
    due: Instant,
}

impl SweepTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: false,
            due: Instant::now(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// 定时器空闲时以 `now + interval` 启动；已在运行时保持原到期时间。
    pub fn arm_if_idle(&mut self, now: Instant) -> bool {
        if self.running {
            return false;
        }
        self.rearm(now);
        true
    }

    pub fn rearm(&mut self, now: Instant) {
        self.running = true;
        self.due = now + self.interval;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.running.then_some(self.due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_keeps_the_earlier_deadline() {
        let start = Instant::now();
        let mut timer = SweepTimer::new(Duration::from_secs(2));
        assert_eq!(timer.deadline(), None);

        assert!(timer.arm_if_idle(start));
        assert!(!timer.arm_if_idle(start + Duration::from_secs(1)));
        assert_eq!(timer.deadline(), Some(start + Duration::from_secs(2)));

        timer.rearm(start + Duration::from_secs(3));
        assert_eq!(timer.deadline(), Some(start + Duration::from_secs(5)));

        timer.stop();
        assert_eq!(timer.deadline(), None);
        assert!(!timer.is_running());
    }
}
