//! 下载进度
//!
//! 进度只在累计字节数越过预先计算的阈值时报告：
//! 步长约 512 KiB，但总步数不少于 6、不多于 100，
//! 小文件也有平滑的进度，大文件不会刷屏。

use std::time::Duration;

/// 目标步长
const STEP_BYTES: u64 = 512 * 1024;
const MIN_STEPS: u64 = 6;
const MAX_STEPS: u64 = 100;

/// 进度信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressInfo {
    pub current: u64,
    pub total: u64,
    pub elapsed: Duration,
    /// 本次传输的第一次报告
    pub is_first: bool,
}

impl ProgressInfo {
    /// 完成比例 (0.0 - 1.0)
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.current as f64 / self.total as f64
    }

    /// 平均速度（字节/秒）
    pub fn bytes_per_second(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        (secs > 0.0).then(|| self.current as f64 / secs)
    }
}

/// 进度回调
pub type ProgressCallback<'a> = &'a (dyn Fn(ProgressInfo) + Send + Sync);

/// 报告阈值序列
#[derive(Debug, Clone)]
pub struct ProgressSchedule {
    total: u64,
    steps: u64,
    next_step: u64,
    reported: bool,
}

impl ProgressSchedule {
    pub fn new(total: u64) -> Self {
        let steps = (total / STEP_BYTES).clamp(MIN_STEPS, MAX_STEPS);
        Self {
            total,
            steps,
            next_step: 1,
            reported: false,
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// 第 n 个阈值（最后一个阈值等于总大小）
    fn threshold(&self, step: u64) -> u64 {
        // u128 避免大文件乘法溢出
        (u128::from(self.total) * u128::from(step) / u128::from(self.steps)) as u64
    }

    /// 收到数据后调用，越过阈值时返回 `Some(is_first)`
    pub fn advance(&mut self, received: u64) -> Option<bool> {
        if self.total == 0 || self.next_step > self.steps {
            return None;
        }
        if received < self.threshold(self.next_step) {
            return None;
        }

        // 一块数据可能越过多个阈值，只报告一次
        while self.next_step <= self.steps && received >= self.threshold(self.next_step) {
            self.next_step += 1;
        }

        let is_first = !self.reported;
        self.reported = true;
        Some(is_first)
    }
}
