//! Cooperative multi-priority task dispatcher.
//!
//! Three bounded FIFO queues; timers and network callbacks only ever
//! enqueue, all logic runs in the drain loop. One task per drain step,
//! always from the highest non-empty queue, so a higher priority preempts
//! the head of a lower queue between handlers but never within one.
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────────────┐     ┌─────────────┐
//! │ UART ISR    │────▶│ prio 2: uart      (32)  │     │             │
//! │ net deliver │────▶│ prio 1: command   (32)  │────▶│  drain loop │
//! │ timer ticks │────▶│ prio 0: periodic  ( 2)  │     │             │
//! └─────────────┘     └─────────────────────────┘     └─────────────┘
//! ```
//!
//! Overflowing a queue drops the task and bumps the per-priority
//! `task_post_failed` counter; nothing blocks.

use heapless::Deque;

use crate::stats::Stats;

/// Slow ticks (100 ms each) before the Wi-Fi watchdog gives up on client
/// association and posts the fallback task.
const FALLBACK_WLAN_TICKS: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Periodic I/O housekeeping.
    Timer = 0,
    /// Command processing and background work.
    Command = 1,
    /// UART bridging.
    Uart = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSignal {
    // ── command / background (prio 1) ─────────────────────────
    Reset,
    UartBridge,
    InitI2cSensors,
    PeriodicI2cSensors,
    InitDisplays,
    ReceivedCommand,
    DisplayUpdate,
    FallbackWlan,
    UpdateTime,
    RunSequencer,
    AlertAssociation,
    AlertDisassociation,
    AlertStatus,

    // ── uart (prio 2) ─────────────────────────────────────────
    UartDrain,

    // ── periodic i/o (prio 0) ─────────────────────────────────
    IoPeriodicFast,
    IoPeriodicSlow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    pub signal: TaskSignal,
    pub param: u32,
}

impl Task {
    pub const fn new(signal: TaskSignal, param: u32) -> Self {
        Self { signal, param }
    }
}

pub struct Dispatcher {
    uart_queue: Deque<Task, 32>,
    command_queue: Deque<Task, 32>,
    timer_queue: Deque<Task, 2>,
    slow_ticks: u32,
}

impl Dispatcher {
    pub const fn new() -> Self {
        Self {
            uart_queue: Deque::new(),
            command_queue: Deque::new(),
            timer_queue: Deque::new(),
            slow_ticks: 0,
        }
    }

    pub fn post(&mut self, prio: Priority, signal: TaskSignal, param: u32, stats: &mut Stats) {
        let task = Task::new(signal, param);
        let accepted = match prio {
            Priority::Uart => self.uart_queue.push_back(task).is_ok(),
            Priority::Command => self.command_queue.push_back(task).is_ok(),
            Priority::Timer => self.timer_queue.push_back(task).is_ok(),
        };
        if accepted {
            stats.task_posted(prio as usize);
        } else {
            stats.task_post_failed(prio as usize);
        }
    }

    pub fn post_command(&mut self, signal: TaskSignal, stats: &mut Stats) {
        self.post(Priority::Command, signal, 0, stats);
    }

    /// Pop the next task: highest non-empty queue, FIFO within a queue.
    pub fn next(&mut self) -> Option<Task> {
        self.uart_queue
            .pop_front()
            .or_else(|| self.command_queue.pop_front())
            .or_else(|| self.timer_queue.pop_front())
    }

    pub fn is_idle(&self) -> bool {
        self.uart_queue.is_empty() && self.command_queue.is_empty() && self.timer_queue.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.uart_queue.len() + self.command_queue.len() + self.timer_queue.len()
    }

    /// 10 ms timer callback: fast I/O periodic work.
    pub fn fast_tick(&mut self, stats: &mut Stats) {
        stats.fast_timer_ticks = stats.fast_timer_ticks.saturating_add(1);
        self.post(Priority::Timer, TaskSignal::IoPeriodicFast, 0, stats);
    }

    /// 100 ms timer callback: second-granularity housekeeping.
    ///
    /// Posts the background services that need servicing this tick and, at
    /// 30 s after boot without an association, the one unattended entry
    /// into Wi-Fi recovery mode.
    pub fn slow_tick(
        &mut self,
        associated: bool,
        uart_bridge_active: bool,
        display_detected: bool,
        stats: &mut Stats,
    ) {
        stats.slow_timer_ticks = stats.slow_timer_ticks.saturating_add(1);
        self.slow_ticks = self.slow_ticks.saturating_add(1);

        self.post_command(TaskSignal::UpdateTime, stats);

        if uart_bridge_active {
            self.post_command(TaskSignal::UartBridge, stats);
        }

        if display_detected {
            self.post_command(TaskSignal::DisplayUpdate, stats);
        }

        self.post_command(TaskSignal::PeriodicI2cSensors, stats);

        if self.slow_ticks == FALLBACK_WLAN_TICKS && !associated {
            self.post_command(TaskSignal::FallbackWlan, stats);
        }

        self.post(Priority::Timer, TaskSignal::IoPeriodicSlow, 0, stats);
    }

    pub const fn slow_ticks(&self) -> u32 {
        self.slow_ticks
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order() {
        let mut dispatcher = Dispatcher::new();
        let mut stats = Stats::new();

        dispatcher.post(Priority::Timer, TaskSignal::IoPeriodicSlow, 0, &mut stats);
        dispatcher.post(Priority::Command, TaskSignal::ReceivedCommand, 0, &mut stats);
        dispatcher.post(Priority::Uart, TaskSignal::UartDrain, 0, &mut stats);

        assert_eq!(dispatcher.next().unwrap().signal, TaskSignal::UartDrain);
        assert_eq!(
            dispatcher.next().unwrap().signal,
            TaskSignal::ReceivedCommand
        );
        assert_eq!(dispatcher.next().unwrap().signal, TaskSignal::IoPeriodicSlow);
        assert!(dispatcher.next().is_none());
    }

    #[test]
    fn fifo_within_priority() {
        let mut dispatcher = Dispatcher::new();
        let mut stats = Stats::new();

        for param in 0..4 {
            dispatcher.post(
                Priority::Command,
                TaskSignal::ReceivedCommand,
                param,
                &mut stats,
            );
        }
        for param in 0..4 {
            assert_eq!(dispatcher.next().unwrap().param, param);
        }
    }

    #[test]
    fn overflow_drops_and_counts() {
        let mut dispatcher = Dispatcher::new();
        let mut stats = Stats::new();

        for _ in 0..2 {
            dispatcher.post(Priority::Timer, TaskSignal::IoPeriodicFast, 0, &mut stats);
        }
        dispatcher.post(Priority::Timer, TaskSignal::IoPeriodicFast, 0, &mut stats);

        assert_eq!(stats.task_posted[Priority::Timer as usize], 2);
        assert_eq!(stats.task_post_failed[Priority::Timer as usize], 1);
        assert_eq!(dispatcher.pending(), 2);
    }

    #[test]
    fn watchdog_posts_fallback_once_at_30s() {
        let mut dispatcher = Dispatcher::new();
        let mut stats = Stats::new();

        for _ in 0..FALLBACK_WLAN_TICKS + 10 {
            dispatcher.slow_tick(false, false, false, &mut stats);
            // Drain so the bounded queues never overflow.
            let mut fallbacks = 0;
            while let Some(task) = dispatcher.next() {
                if task.signal == TaskSignal::FallbackWlan {
                    fallbacks += 1;
                }
            }
            if dispatcher.slow_ticks() == FALLBACK_WLAN_TICKS {
                assert_eq!(fallbacks, 1);
            } else {
                assert_eq!(fallbacks, 0);
            }
        }
    }

    #[test]
    fn watchdog_quiet_when_associated() {
        let mut dispatcher = Dispatcher::new();
        let mut stats = Stats::new();

        for _ in 0..FALLBACK_WLAN_TICKS {
            dispatcher.slow_tick(true, false, false, &mut stats);
            while let Some(task) = dispatcher.next() {
                assert_ne!(task.signal, TaskSignal::FallbackWlan);
            }
        }
    }

    #[test]
    fn slow_tick_posts_bridge_only_when_active() {
        let mut dispatcher = Dispatcher::new();
        let mut stats = Stats::new();

        dispatcher.slow_tick(true, false, false, &mut stats);
        let mut signals = Vec::new();
        while let Some(task) = dispatcher.next() {
            signals.push(task.signal);
        }
        assert!(!signals.contains(&TaskSignal::UartBridge));

        dispatcher.slow_tick(true, true, false, &mut stats);
        let mut signals = Vec::new();
        while let Some(task) = dispatcher.next() {
            signals.push(task.signal);
        }
        assert!(signals.contains(&TaskSignal::UartBridge));
    }
}
