//! Frame timing.

use std::time::{Duration, Instant};

/// Measures per-frame delta time and a rolling frames-per-second figure.
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    last_tick: Instant,
    window_start: Instant,
    frames_in_window: u32,
    fps: f32,
}

impl FrameTimer {
    /// Length of the window over which FPS is averaged.
    pub const FPS_WINDOW: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    fn starting_at(now: Instant) -> Self {
        Self {
            start: now,
            last_tick: now,
            window_start: now,
            frames_in_window: 0,
            fps: 0.0,
        }
    }

    /// Total time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Mark the end of a frame. Returns the delta time since the previous tick
    /// and, once per [`Self::FPS_WINDOW`], the freshly computed FPS.
    pub fn tick(&mut self) -> (Duration, Option<f32>) {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> (Duration, Option<f32>) {
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.frames_in_window += 1;

        let window = now - self.window_start;
        if window >= Self::FPS_WINDOW {
            self.fps = self.frames_in_window as f32 / window.as_secs_f32();
            self.frames_in_window = 0;
            self.window_start = now;
            return (delta, Some(self.fps));
        }
        (delta, None)
    }

    /// Last computed FPS, 0 until the first window completes.
    pub fn fps(&self) -> f32 {
        self.fps
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}
