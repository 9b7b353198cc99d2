// =============================================================================
// FRAME DRIVER - steady-state acquire / record / submit / present loop
// =============================================================================
//
// FRAME TIMELINE (one slot):
// ┌──────────────────────────────────────────────────────────────────────────┐
// │ wait fence ─> acquire ─> reset fence ─> record ─> submit ─> present      │
// │                  │                                             │         │
// │            out of date: rebuild,                  suboptimal / out of    │
// │            skip this frame                        date: rebuild before   │
// │                                                   the next acquire       │
// └──────────────────────────────────────────────────────────────────────────┘
//
// The driver only knows the protocol; the GPU work lives behind FrameBackend.

use std::time::{Duration, Instant};

use crate::error::{RendererError, RendererResult};

/// Per-frame operations the driver sequences
pub trait FrameBackend {
    /// Number of frame-in-flight slots (at least one)
    fn frames_in_flight(&self) -> usize;

    /// Block until the slot's last submission has completed
    fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()>;

    /// Acquire the next image, signalling the slot's image-available semaphore.
    /// Returns the image index and whether the chain is suboptimal.
    fn acquire_image(&mut self, slot: usize) -> RendererResult<(u32, bool)>;

    fn reset_slot(&mut self, slot: usize) -> RendererResult<()>;

    fn record(&mut self, slot: usize, image_index: u32) -> RendererResult<()>;

    fn submit(&mut self, slot: usize) -> RendererResult<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> RendererResult<()>;

    /// Destroy and recreate the swapchain from fresh surface state.
    /// Returns false when the surface cannot be rendered to yet (minimized).
    fn rebuild_swapchain(&mut self) -> RendererResult<bool>;

    fn wait_idle(&mut self) -> RendererResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

/// What one call to `draw_frame` achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Nothing was submitted (swapchain rebuilt or surface not renderable)
    Skipped,
}

pub struct FrameDriver<B: FrameBackend> {
    backend: B,
    state: FrameState,
    current_frame: usize,
    rebuild_pending: bool,
    frames_presented: u64,
    started: Instant,
}

/// Average presentation rate over `elapsed`; zero for an empty interval
pub fn average_fps(frames: u64, elapsed: Duration) -> f32 {
    let secs = elapsed.as_secs_f32();
    if secs > 0.0 {
        frames as f32 / secs
    } else {
        0.0
    }
}

impl<B: FrameBackend> FrameDriver<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: FrameState::Idle,
            current_frame: 0,
            rebuild_pending: false,
            frames_presented: 0,
            started: Instant::now(),
        }
    }

    #[cfg(test)]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[cfg(test)]
    pub fn state(&self) -> FrameState {
        self.state
    }

    #[cfg(test)]
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    #[cfg(test)]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    #[cfg(test)]
    pub fn rebuild_pending(&self) -> bool {
        self.rebuild_pending
    }

    /// Schedule a swapchain rebuild before the next acquire (e.g. resize)
    pub fn request_rebuild(&mut self) {
        self.rebuild_pending = true;
    }

    fn enter(&mut self, state: FrameState) {
        log::trace!("frame slot {}: {:?} -> {:?}", self.current_frame, self.state, state);
        self.state = state;
    }

    /// Run one iteration of the frame loop.
    pub fn draw_frame(&mut self) -> RendererResult<FrameOutcome> {
        if self.rebuild_pending {
            if !self.backend.rebuild_swapchain()? {
                return Ok(FrameOutcome::Skipped);
            }
            self.rebuild_pending = false;
        }

        let slot = self.current_frame;

        self.enter(FrameState::Acquiring);
        self.backend.wait_for_slot(slot)?;

        let image_index = match self.backend.acquire_image(slot) {
            Ok((index, suboptimal)) => {
                // Image is ours and its semaphore will signal; draw it anyway
                if suboptimal {
                    log::debug!("Acquired image from a suboptimal swapchain");
                    self.rebuild_pending = true;
                }
                index
            }
            Err(RendererError::SwapchainOutOfDate) => {
                log::debug!("Swapchain out of date on acquire, rebuilding");
                self.enter(FrameState::Idle);
                // The fence was not reset, so the slot is still usable
                if !self.backend.rebuild_swapchain()? {
                    self.rebuild_pending = true;
                }
                return Ok(FrameOutcome::Skipped);
            }
            Err(e) => {
                self.enter(FrameState::Idle);
                return Err(e);
            }
        };

        self.enter(FrameState::Recording);
        self.backend.reset_slot(slot)?;
        self.backend.record(slot, image_index)?;

        self.backend.submit(slot)?;
        self.enter(FrameState::Submitted);

        self.enter(FrameState::Presenting);
        match self.backend.present(slot, image_index) {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                log::debug!("Present reported {}, rebuild scheduled", e);
                self.rebuild_pending = true;
            }
            Err(e) => {
                self.enter(FrameState::Idle);
                return Err(e);
            }
        }

        self.frames_presented += 1;
        self.current_frame = (self.current_frame + 1) % self.backend.frames_in_flight();
        self.enter(FrameState::Idle);

        Ok(FrameOutcome::Presented)
    }

    /// Wait for the GPU to drain before teardown; hands the backend back.
    pub fn finish(mut self) -> RendererResult<B> {
        self.backend.wait_idle()?;
        let elapsed = self.started.elapsed();
        log::info!(
            "Frame loop finished: {} frames presented in {:.1}s ({:.1} FPS)",
            self.frames_presented,
            elapsed.as_secs_f32(),
            average_fps(self.frames_presented, elapsed)
        );
        Ok(self.backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Rebuild,
        WaitIdle,
    }

    /// Fake GPU: each slot has a fence that is signaled or pending, and
    /// submitted work completes only when the driver waits on it.
    struct MockBackend {
        slots: usize,
        fence_signaled: Vec<bool>,
        calls: Vec<Call>,
        acquire_results: VecDeque<RendererResult<(u32, bool)>>,
        present_results: VecDeque<RendererResult<()>>,
        rebuild_results: VecDeque<bool>,
        next_image: u32,
        image_count: u32,
        max_in_flight_seen: usize,
        swapchain_generation: u32,
    }

    impl MockBackend {
        fn new(slots: usize) -> Self {
            Self {
                slots,
                fence_signaled: vec![true; slots],
                calls: Vec::new(),
                acquire_results: VecDeque::new(),
                present_results: VecDeque::new(),
                rebuild_results: VecDeque::new(),
                next_image: 0,
                image_count: 3,
                max_in_flight_seen: 0,
                swapchain_generation: 0,
            }
        }

        fn in_flight(&self) -> usize {
            self.fence_signaled.iter().filter(|s| !**s).count()
        }
    }

    impl FrameBackend for MockBackend {
        fn frames_in_flight(&self) -> usize {
            self.slots
        }

        fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()> {
            self.calls.push(Call::Wait(slot));
            self.fence_signaled[slot] = true;
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> RendererResult<(u32, bool)> {
            self.calls.push(Call::Acquire(slot));
            if let Some(result) = self.acquire_results.pop_front() {
                return result;
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok((index, false))
        }

        fn reset_slot(&mut self, slot: usize) -> RendererResult<()> {
            assert!(self.fence_signaled[slot], "fence reset before it was waited on");
            self.calls.push(Call::Reset(slot));
            self.fence_signaled[slot] = false;
            Ok(())
        }

        fn record(&mut self, slot: usize, image_index: u32) -> RendererResult<()> {
            self.calls.push(Call::Record(slot, image_index));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> RendererResult<()> {
            assert!(!self.fence_signaled[slot], "submitted without resetting the fence");
            self.calls.push(Call::Submit(slot));
            self.max_in_flight_seen = self.max_in_flight_seen.max(self.in_flight());
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> RendererResult<()> {
            self.calls.push(Call::Present(slot, image_index));
            self.present_results.pop_front().unwrap_or(Ok(()))
        }

        fn rebuild_swapchain(&mut self) -> RendererResult<bool> {
            self.calls.push(Call::Rebuild);
            let rebuilt = self.rebuild_results.pop_front().unwrap_or(true);
            if rebuilt {
                self.swapchain_generation += 1;
                self.next_image = 0;
            }
            Ok(rebuilt)
        }

        fn wait_idle(&mut self) -> RendererResult<()> {
            self.calls.push(Call::WaitIdle);
            self.fence_signaled.iter_mut().for_each(|s| *s = true);
            Ok(())
        }
    }

    #[test]
    fn steady_state_follows_protocol_order() {
        let mut driver = FrameDriver::new(MockBackend::new(2));

        assert_eq!(driver.draw_frame().unwrap(), FrameOutcome::Presented);
        assert_eq!(
            driver.backend().calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(driver.state(), FrameState::Idle);
        assert_eq!(driver.current_frame(), 1);
    }

    #[test]
    fn slots_rotate_modulo_frames_in_flight() {
        let mut driver = FrameDriver::new(MockBackend::new(2));
        for _ in 0..5 {
            driver.draw_frame().unwrap();
        }
        let submitted: Vec<usize> = driver
            .backend()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Submit(slot) => Some(*slot),
                _ => None,
            })
            .collect();
        assert_eq!(submitted, vec![0, 1, 0, 1, 0]);
        assert_eq!(driver.frames_presented(), 5);
    }

    #[test]
    fn in_flight_work_never_exceeds_slot_count() {
        for slots in 1..=3 {
            let mut driver = FrameDriver::new(MockBackend::new(slots));
            for _ in 0..10 {
                driver.draw_frame().unwrap();
            }
            assert!(driver.backend().max_in_flight_seen <= slots);
            assert_eq!(driver.backend().max_in_flight_seen, slots);
        }
    }

    #[test]
    fn out_of_date_acquire_rebuilds_without_drawing() {
        let mut backend = MockBackend::new(2);
        backend
            .acquire_results
            .push_back(Err(RendererError::SwapchainOutOfDate));
        let mut driver = FrameDriver::new(backend);

        assert_eq!(driver.draw_frame().unwrap(), FrameOutcome::Skipped);
        assert_eq!(
            driver.backend().calls,
            vec![Call::Wait(0), Call::Acquire(0), Call::Rebuild]
        );
        assert_eq!(driver.backend().swapchain_generation, 1);
        // Same slot is reused; its fence is still signaled
        assert_eq!(driver.current_frame(), 0);
        assert!(!driver.rebuild_pending());

        assert_eq!(driver.draw_frame().unwrap(), FrameOutcome::Presented);
        assert!(driver.backend().calls.ends_with(&[
            Call::Wait(0),
            Call::Acquire(0),
            Call::Reset(0),
            Call::Record(0, 0),
            Call::Submit(0),
            Call::Present(0, 0),
        ]));
    }

    #[test]
    fn suboptimal_present_counts_as_displayed_and_rebuilds_next() {
        let mut backend = MockBackend::new(2);
        backend
            .present_results
            .push_back(Err(RendererError::SwapchainSuboptimal));
        let mut driver = FrameDriver::new(backend);

        assert_eq!(driver.draw_frame().unwrap(), FrameOutcome::Presented);
        assert!(driver.rebuild_pending());
        assert_eq!(driver.frames_presented(), 1);

        driver.draw_frame().unwrap();
        let calls = &driver.backend().calls;
        let rebuild = calls.iter().position(|c| *c == Call::Rebuild).unwrap();
        let second_acquire = calls
            .iter()
            .rposition(|c| matches!(c, Call::Acquire(_)))
            .unwrap();
        assert_eq!(calls[rebuild - 1], Call::Present(0, 0));
        assert!(rebuild < second_acquire);
        assert!(!driver.rebuild_pending());
    }

    #[test]
    fn out_of_date_present_schedules_rebuild() {
        let mut backend = MockBackend::new(1);
        backend
            .present_results
            .push_back(Err(RendererError::SwapchainOutOfDate));
        let mut driver = FrameDriver::new(backend);

        assert_eq!(driver.draw_frame().unwrap(), FrameOutcome::Presented);
        assert!(driver.rebuild_pending());
    }

    #[test]
    fn suboptimal_acquire_still_draws() {
        let mut backend = MockBackend::new(2);
        backend.acquire_results.push_back(Ok((2, true)));
        let mut driver = FrameDriver::new(backend);

        assert_eq!(driver.draw_frame().unwrap(), FrameOutcome::Presented);
        assert!(driver.backend().calls.contains(&Call::Present(0, 2)));
        assert!(driver.rebuild_pending());
    }

    #[test]
    fn minimized_surface_keeps_rebuild_pending() {
        let mut backend = MockBackend::new(2);
        backend.rebuild_results.extend([false, false, true]);
        let mut driver = FrameDriver::new(backend);
        driver.request_rebuild();

        assert_eq!(driver.draw_frame().unwrap(), FrameOutcome::Skipped);
        assert_eq!(driver.draw_frame().unwrap(), FrameOutcome::Skipped);
        assert!(driver.rebuild_pending());
        assert_eq!(driver.draw_frame().unwrap(), FrameOutcome::Presented);
        assert!(!driver.rebuild_pending());
        assert_eq!(
            driver.backend().calls.iter().filter(|c| **c == Call::Rebuild).count(),
            3
        );
    }

    #[test]
    fn fatal_acquire_error_propagates() {
        let mut backend = MockBackend::new(2);
        backend
            .acquire_results
            .push_back(Err(RendererError::Vulkan(vk::Result::ERROR_DEVICE_LOST)));
        let mut driver = FrameDriver::new(backend);

        let err = driver.draw_frame().unwrap_err();
        assert!(matches!(err, RendererError::Vulkan(vk::Result::ERROR_DEVICE_LOST)));
        assert_eq!(driver.state(), FrameState::Idle);
        assert!(!driver.backend().calls.iter().any(|c| matches!(c, Call::Submit(_))));
    }

    #[test]
    fn fatal_present_error_propagates() {
        let mut backend = MockBackend::new(2);
        backend
            .present_results
            .push_back(Err(RendererError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR)));
        let mut driver = FrameDriver::new(backend);

        assert!(driver.draw_frame().is_err());
        assert_eq!(driver.frames_presented(), 0);
    }

    #[test]
    fn finish_waits_for_idle() {
        let mut driver = FrameDriver::new(MockBackend::new(2));
        driver.draw_frame().unwrap();
        let backend = driver.finish().unwrap();
        assert_eq!(backend.calls.last(), Some(&Call::WaitIdle));
        assert_eq!(backend.in_flight(), 0);
    }

    #[test]
    fn average_fps_over_elapsed_time() {
        assert_eq!(average_fps(120, Duration::from_secs(2)), 60.0);
        assert_eq!(average_fps(30, Duration::from_millis(500)), 60.0);
        assert_eq!(average_fps(10, Duration::ZERO), 0.0);
    }
}
