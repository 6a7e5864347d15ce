use crate::visual::VisualizationMode;

/// Fade-out rate of the mode-switch snapshot, per second.
pub const TRANSITION_RATE: f32 = 2.0;
/// Below this alpha the snapshot is no longer drawn.
pub const TRANSITION_VISIBLE: f32 = 0.01;
/// Frames per fps report.
pub const FPS_WINDOW: u32 = 60;

/// Fade state of the previous mode's snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModeTransition {
    alpha: f32,
}

impl ModeTransition {
    pub fn start(&mut self) {
        self.alpha = 1.0;
    }

    pub fn cancel(&mut self) {
        self.alpha = 0.0;
    }

    /// Alpha to draw the snapshot at this frame, decaying it afterwards.
    /// `None` once the fade is complete.
    pub fn take_frame(&mut self, dt: f32) -> Option<f32> {
        if self.alpha > TRANSITION_VISIBLE {
            let alpha = self.alpha;
            self.alpha -= dt * TRANSITION_RATE;
            Some(alpha)
        } else {
            None
        }
    }
}

/// Mean-frame-time fps estimate, reported every [`FPS_WINDOW`] frames.
#[derive(Debug, Default)]
pub struct FpsCounter {
    elapsed: f32,
    frames: u32,
}

impl FpsCounter {
    pub fn record(&mut self, dt: f32) -> Option<f32> {
        self.elapsed += dt;
        self.frames += 1;
        if self.frames < FPS_WINDOW {
            return None;
        }
        let fps = (self.elapsed > 0.0).then(|| self.frames as f32 / self.elapsed);
        self.elapsed = 0.0;
        self.frames = 0;
        fps
    }
}

/// What the GPU side has to do this frame, before any mode is drawn.
/// Nothing is recorded until [`FrameState::commit`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePlan {
    pub resize: Option<(u32, u32)>,
    /// Copy the last presented image into the transition buffer first.
    pub snapshot: bool,
    pub mode: VisualizationMode,
}

/// Host-side frame bookkeeping: active mode, cached surface size, fade.
#[derive(Debug)]
pub struct FrameState {
    active_mode: VisualizationMode,
    size: (u32, u32),
    transition: ModeTransition,
}

impl FrameState {
    pub fn new(mode: VisualizationMode, size: (u32, u32)) -> Self {
        Self {
            active_mode: mode,
            size,
            transition: ModeTransition::default(),
        }
    }

    pub fn active_mode(&self) -> VisualizationMode {
        self.active_mode
    }

    /// Compares the requested mode and size against what was last committed.
    /// A resize reallocates the presentation target, so a mode switch in the
    /// same frame has no previous image to fade from.
    pub fn plan(&self, mode: VisualizationMode, size: (u32, u32)) -> FramePlan {
        let resize = (size != self.size).then_some(size);
        FramePlan {
            resize,
            snapshot: mode != self.active_mode && resize.is_none(),
            mode,
        }
    }

    /// Records a plan whose GPU work succeeded. Returns the alpha for the
    /// snapshot overlay this frame.
    pub fn commit(&mut self, plan: &FramePlan, dt: f32) -> Option<f32> {
        if let Some(size) = plan.resize {
            self.size = size;
            self.transition.cancel();
        }
        if plan.snapshot {
            self.transition.start();
        }
        self.active_mode = plan.mode;
        self.transition.take_frame(dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 60.0;
    const SIZE: (u32, u32) = (1280, 720);

    fn step(
        state: &mut FrameState,
        mode: VisualizationMode,
        size: (u32, u32),
    ) -> (FramePlan, Option<f32>) {
        let plan = state.plan(mode, size);
        let alpha = state.commit(&plan, DT);
        (plan, alpha)
    }

    #[test]
    fn mode_switch_snapshots_exactly_once() {
        let mut state = FrameState::new(VisualizationMode::Waveform, SIZE);
        let frames: Vec<_> = (0..10)
            .map(|_| step(&mut state, VisualizationMode::Bars, SIZE))
            .collect();
        assert_eq!(frames.iter().filter(|(p, _)| p.snapshot).count(), 1);
        assert!(frames[0].0.snapshot);
        assert_eq!(frames[0].1, Some(1.0));
        assert_eq!(state.active_mode(), VisualizationMode::Bars);
    }

    #[test]
    fn no_switch_no_snapshot() {
        let mut state = FrameState::new(VisualizationMode::Nebula, SIZE);
        let (plan, alpha) = step(&mut state, VisualizationMode::Nebula, SIZE);
        assert!(!plan.snapshot);
        assert_eq!(alpha, None);
    }

    #[test]
    fn fade_strictly_decreases_then_stops() {
        let mut state = FrameState::new(VisualizationMode::Waveform, SIZE);
        let mut alphas = Vec::new();
        for _ in 0..60 {
            if let (_, Some(alpha)) = step(&mut state, VisualizationMode::Bars, SIZE) {
                alphas.push(alpha);
            }
        }
        assert!(alphas.windows(2).all(|w| w[1] < w[0]));
        for w in alphas.windows(2) {
            assert!((w[0] - w[1] - DT * TRANSITION_RATE).abs() < 1e-5);
        }
        // About half a second at 60 fps.
        assert!((29..=31).contains(&alphas.len()));
        assert!(state.transition.alpha <= TRANSITION_VISIBLE);
    }

    #[test]
    fn size_change_requests_resize_once() {
        let mut state = FrameState::new(VisualizationMode::Bars, SIZE);
        assert_eq!(step(&mut state, VisualizationMode::Bars, SIZE).0.resize, None);
        let (plan, _) = step(&mut state, VisualizationMode::Bars, (800, 600));
        assert_eq!(plan.resize, Some((800, 600)));
        assert_eq!(step(&mut state, VisualizationMode::Bars, (800, 600)).0.resize, None);
    }

    #[test]
    fn uncommitted_frame_is_planned_again() {
        let mut state = FrameState::new(VisualizationMode::Waveform, SIZE);
        let failed = state.plan(VisualizationMode::Bars, (1920, 1080));
        assert_eq!(failed.resize, Some((1920, 1080)));
        let retry = state.plan(VisualizationMode::Bars, (1920, 1080));
        assert_eq!(retry, failed);
        assert_eq!(state.active_mode(), VisualizationMode::Waveform);

        let switch = state.plan(VisualizationMode::Bars, SIZE);
        assert!(switch.snapshot);
        assert_eq!(state.commit(&switch, DT), Some(1.0));
        assert_eq!(state.active_mode(), VisualizationMode::Bars);
    }

    #[test]
    fn switch_during_resize_skips_the_fade() {
        let mut state = FrameState::new(VisualizationMode::Waveform, SIZE);
        let (plan, alpha) = step(&mut state, VisualizationMode::Nebula, (800, 600));
        assert!(!plan.snapshot);
        assert_eq!(alpha, None);
        assert_eq!(state.active_mode(), VisualizationMode::Nebula);
    }

    #[test]
    fn resize_cancels_a_running_fade() {
        let mut state = FrameState::new(VisualizationMode::Waveform, SIZE);
        assert!(step(&mut state, VisualizationMode::Bars, SIZE).1.is_some());
        assert_eq!(step(&mut state, VisualizationMode::Bars, (800, 600)).1, None);
        assert_eq!(state.transition.alpha, 0.0);
    }

    #[test]
    fn fps_reports_every_window() {
        let mut fps = FpsCounter::default();
        for _ in 0..FPS_WINDOW - 1 {
            assert_eq!(fps.record(0.02), None);
        }
        let report = fps.record(0.02).unwrap();
        assert!((report - 50.0).abs() < 0.01);
        assert_eq!(fps.record(0.02), None);
    }

    #[test]
    fn transition_restarts_on_second_switch() {
        let mut t = ModeTransition::default();
        t.start();
        t.take_frame(0.3);
        t.start();
        assert_eq!(t.alpha, 1.0);
    }
}
