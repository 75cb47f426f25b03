//! Frames-in-flight scheduling.
//!
//! Each call to [`FrameScheduler::draw_frame`] runs one frame through
//! wait, acquire, record, submit and present for the current slot, then
//! moves on to the next slot. A slot is only reused after its fence has
//! signaled, so the command buffer and per-frame uniforms it references
//! are free.
//!
//! The GPU side is reached through [`FrameFence`], [`FrameTarget`] and
//! [`FrameRecorder`], which keeps the state machine testable with mocks.
//! [`VulkanFrameTarget`] is the swapchain-backed target.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, trace};

use wrap_rhi::RhiResult;
use wrap_rhi::device::Device;
use wrap_rhi::swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
use wrap_rhi::sync::{Fence, Semaphore};

/// CPU/GPU fence guarding one frame slot.
pub trait FrameFence {
    /// Blocks until the last submission signaling this fence completed.
    fn wait(&self) -> RhiResult<()>;
    fn reset(&self) -> RhiResult<()>;
}

impl FrameFence for Fence {
    fn wait(&self) -> RhiResult<()> {
        Fence::wait(self, u64::MAX)
    }

    fn reset(&self) -> RhiResult<()> {
        Fence::reset(self)
    }
}

/// Everything recording needs to know about the frame being built.
#[derive(Clone, Copy, Debug)]
pub struct FrameContext {
    pub slot: usize,
    pub image_index: u32,
    pub extent: vk::Extent2D,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
}

/// The presentation side: swapchain images, queues and semaphores.
pub trait FrameTarget<F> {
    /// Nothing is drawn while the target has no area.
    fn is_minimized(&self) -> bool;

    /// Consumes a pending resize notification.
    fn take_resize_request(&mut self) -> bool;

    fn acquire(&mut self, slot: usize) -> RhiResult<AcquireOutcome>;

    fn extent(&self) -> vk::Extent2D;

    fn render_pass(&self) -> vk::RenderPass;

    fn framebuffer(&self, image_index: u32) -> vk::Framebuffer;

    /// Queues `commands`, signaling `fence` when they complete.
    fn submit(&mut self, frame: &FrameContext, commands: vk::CommandBuffer, fence: &F) -> RhiResult<()>;

    fn present(&mut self, frame: &FrameContext) -> RhiResult<PresentOutcome>;

    fn recreate(&mut self) -> RhiResult<()>;
}

/// Records the commands for one frame.
pub trait FrameRecorder {
    /// Called after the slot's fence has been waited on and reset. Returns
    /// the recorded command buffer.
    fn record(&mut self, frame: &FrameContext) -> RhiResult<vk::CommandBuffer>;
}

/// What happened during [`FrameScheduler::draw_frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame reached the presentation engine.
    Presented,
    /// The swapchain was rebuilt. If this happened before submission the
    /// slot did not advance and the next call retries it.
    Recreated,
    /// The target has no area; nothing was done.
    Skipped,
}

/// Ring of frame slots, one fence per slot.
pub struct FrameScheduler<F> {
    fences: Vec<F>,
    current: usize,
}

impl<F: FrameFence> FrameScheduler<F> {
    /// Fences must start signaled so the first wait on each slot returns.
    ///
    /// # Panics
    ///
    /// Panics if `fences` is empty.
    pub fn new(fences: Vec<F>) -> Self {
        assert!(!fences.is_empty(), "a frame scheduler needs at least one slot");
        Self { fences, current: 0 }
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.fences.len()
    }

    pub fn draw_frame<T, R>(&mut self, target: &mut T, recorder: &mut R) -> RhiResult<FrameOutcome>
    where
        T: FrameTarget<F>,
        R: FrameRecorder,
    {
        if target.is_minimized() {
            return Ok(FrameOutcome::Skipped);
        }

        let slot = self.current;
        let fence = &self.fences[slot];
        fence.wait()?;

        // The fence stays signaled on every early return below.
        if target.take_resize_request() {
            debug!("Resize requested, recreating swapchain");
            target.recreate()?;
            return Ok(FrameOutcome::Recreated);
        }

        let image_index = match target.acquire(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    trace!("Acquired suboptimal image {}", image_index);
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                debug!("Swapchain out of date on acquire, recreating");
                target.recreate()?;
                return Ok(FrameOutcome::Recreated);
            }
        };

        fence.reset()?;

        let frame = FrameContext {
            slot,
            image_index,
            extent: target.extent(),
            render_pass: target.render_pass(),
            framebuffer: target.framebuffer(image_index),
        };

        let commands = recorder.record(&frame)?;
        target.submit(&frame, commands, fence)?;
        let presented = target.present(&frame)?;

        self.current = (slot + 1) % self.fences.len();

        if presented.needs_recreate() {
            debug!("Present reported {:?}, recreating swapchain", presented);
            target.recreate()?;
            return Ok(FrameOutcome::Recreated);
        }

        Ok(FrameOutcome::Presented)
    }

    /// Waits for every slot's last submission.
    pub fn wait_all(&self) -> RhiResult<()> {
        for fence in &self.fences {
            fence.wait()?;
        }
        Ok(())
    }
}

// =============================================================================
// Vulkan
// =============================================================================

/// Swapchain-backed [`FrameTarget`].
///
/// Image-available semaphores are per slot. Render-finished semaphores are
/// per swapchain image, since the presentation engine may still hold one
/// when its slot comes around again.
pub struct VulkanFrameTarget {
    device: Arc<Device>,
    image_available: Vec<Semaphore>,
    render_finished: Vec<Semaphore>,
    swapchain: Swapchain,
    framebuffer_size: (u32, u32),
    resize_requested: bool,
    render_pass_changed: bool,
}

impl VulkanFrameTarget {
    pub fn new(
        device: Arc<Device>,
        swapchain: Swapchain,
        frames_in_flight: usize,
        framebuffer_size: (u32, u32),
    ) -> RhiResult<Self> {
        let image_available = Semaphore::many(&device, frames_in_flight)?;
        let render_finished = Semaphore::many(&device, swapchain.image_count() as usize)?;

        Ok(Self {
            device,
            image_available,
            render_finished,
            swapchain,
            framebuffer_size,
            resize_requested: false,
            render_pass_changed: false,
        })
    }

    /// Records a new framebuffer size; the swapchain is rebuilt on the
    /// next frame.
    pub fn request_resize(&mut self, framebuffer_size: (u32, u32)) {
        self.framebuffer_size = framebuffer_size;
        self.resize_requested = true;
    }

    /// Whether a recreation since the last call replaced the render pass.
    pub fn take_render_pass_change(&mut self) -> bool {
        std::mem::take(&mut self.render_pass_changed)
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }
}

impl FrameTarget<Fence> for VulkanFrameTarget {
    fn is_minimized(&self) -> bool {
        self.framebuffer_size.0 == 0 || self.framebuffer_size.1 == 0
    }

    fn take_resize_request(&mut self) -> bool {
        std::mem::take(&mut self.resize_requested)
    }

    fn acquire(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
        self.swapchain
            .acquire_next_image(self.image_available[slot].handle())
    }

    fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    fn render_pass(&self) -> vk::RenderPass {
        self.swapchain.render_pass()
    }

    fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.swapchain.framebuffer(image_index)
    }

    fn submit(&mut self, frame: &FrameContext, commands: vk::CommandBuffer, fence: &Fence) -> RhiResult<()> {
        let wait_semaphores = [self.image_available[frame.slot].handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [commands];
        let signal_semaphores = [self.render_finished[frame.image_index as usize].handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the recorder ended the buffer and the scheduler reset the
        // fence just before recording.
        unsafe { self.device.submit_graphics(&[submit_info], fence.handle()) }
    }

    fn present(&mut self, frame: &FrameContext) -> RhiResult<PresentOutcome> {
        self.swapchain.present(
            self.device.present_queue(),
            frame.image_index,
            self.render_finished[frame.image_index as usize].handle(),
        )
    }

    fn recreate(&mut self) -> RhiResult<()> {
        self.resize_requested = false;
        if self.swapchain.recreate(self.framebuffer_size)? {
            self.render_pass_changed = true;
        }

        let image_count = self.swapchain.image_count() as usize;
        if image_count != self.render_finished.len() {
            self.render_finished = Semaphore::many(&self.device, image_count)?;
        }

        debug!(
            "Frame target now {}x{} with {} images",
            self.swapchain.extent().width,
            self.swapchain.extent().height,
            image_count
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const SLOTS: usize = 2;

    #[derive(Default)]
    struct FenceState {
        signaled: bool,
        pending: bool,
    }

    #[derive(Default)]
    struct MockGpu {
        fences: Vec<FenceState>,
        events: Vec<String>,
    }

    type Gpu = Rc<RefCell<MockGpu>>;

    fn gpu() -> Gpu {
        let mut state = MockGpu::default();
        for _ in 0..SLOTS {
            state.fences.push(FenceState {
                signaled: true,
                pending: false,
            });
        }
        Rc::new(RefCell::new(state))
    }

    struct MockFence {
        slot: usize,
        gpu: Gpu,
    }

    impl FrameFence for MockFence {
        fn wait(&self) -> RhiResult<()> {
            let mut gpu = self.gpu.borrow_mut();
            let fence = &mut gpu.fences[self.slot];
            // Waiting lets the simulated GPU finish the submission.
            if fence.pending {
                fence.pending = false;
                fence.signaled = true;
            }
            assert!(fence.signaled, "fence {} would never signal", self.slot);
            gpu.events.push(format!("wait {}", self.slot));
            Ok(())
        }

        fn reset(&self) -> RhiResult<()> {
            let mut gpu = self.gpu.borrow_mut();
            let fence = &mut gpu.fences[self.slot];
            assert!(!fence.pending, "reset fence {} while in flight", self.slot);
            fence.signaled = false;
            gpu.events.push(format!("reset {}", self.slot));
            Ok(())
        }
    }

    fn scheduler(gpu: &Gpu) -> FrameScheduler<MockFence> {
        FrameScheduler::new(
            (0..SLOTS)
                .map(|slot| MockFence {
                    slot,
                    gpu: gpu.clone(),
                })
                .collect(),
        )
    }

    struct MockTarget {
        gpu: Gpu,
        extent: vk::Extent2D,
        next_extent: vk::Extent2D,
        image_count: u32,
        next_image: u32,
        frames: u32,
        minimized: bool,
        resize_requested: bool,
        acquire_out_of_date: bool,
        acquire_suboptimal: bool,
        present_out_of_date_on: Option<u32>,
        acquires: usize,
        recreations: usize,
    }

    impl MockTarget {
        fn new(gpu: &Gpu) -> Self {
            Self {
                gpu: gpu.clone(),
                extent: vk::Extent2D {
                    width: 800,
                    height: 600,
                },
                next_extent: vk::Extent2D {
                    width: 1024,
                    height: 768,
                },
                image_count: 3,
                next_image: 0,
                frames: 0,
                minimized: false,
                resize_requested: false,
                acquire_out_of_date: false,
                acquire_suboptimal: false,
                present_out_of_date_on: None,
                acquires: 0,
                recreations: 0,
            }
        }
    }

    impl FrameTarget<MockFence> for MockTarget {
        fn is_minimized(&self) -> bool {
            self.minimized
        }

        fn take_resize_request(&mut self) -> bool {
            std::mem::take(&mut self.resize_requested)
        }

        fn acquire(&mut self, _slot: usize) -> RhiResult<AcquireOutcome> {
            self.acquires += 1;
            if std::mem::take(&mut self.acquire_out_of_date) {
                return Ok(AcquireOutcome::OutOfDate);
            }
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal: self.acquire_suboptimal,
            })
        }

        fn extent(&self) -> vk::Extent2D {
            self.extent
        }

        fn render_pass(&self) -> vk::RenderPass {
            vk::RenderPass::null()
        }

        fn framebuffer(&self, _image_index: u32) -> vk::Framebuffer {
            vk::Framebuffer::null()
        }

        fn submit(&mut self, frame: &FrameContext, _commands: vk::CommandBuffer, fence: &MockFence) -> RhiResult<()> {
            assert_eq!(fence.slot, frame.slot);
            let mut gpu = self.gpu.borrow_mut();
            let state = &mut gpu.fences[fence.slot];
            assert!(!state.signaled && !state.pending, "submitted with a fence that was not reset");
            state.pending = true;
            gpu.events.push(format!("submit {}", frame.slot));
            Ok(())
        }

        fn present(&mut self, _frame: &FrameContext) -> RhiResult<PresentOutcome> {
            self.frames += 1;
            if self.present_out_of_date_on == Some(self.frames) {
                return Ok(PresentOutcome::OutOfDate);
            }
            Ok(PresentOutcome::Presented)
        }

        fn recreate(&mut self) -> RhiResult<()> {
            self.recreations += 1;
            self.extent = self.next_extent;
            self.next_image = 0;
            self.gpu.borrow_mut().events.push("recreate".to_string());
            Ok(())
        }
    }

    struct MockRecorder {
        gpu: Gpu,
        recorded: Vec<(usize, vk::Extent2D)>,
    }

    impl MockRecorder {
        fn new(gpu: &Gpu) -> Self {
            Self {
                gpu: gpu.clone(),
                recorded: Vec::new(),
            }
        }
    }

    impl FrameRecorder for MockRecorder {
        fn record(&mut self, frame: &FrameContext) -> RhiResult<vk::CommandBuffer> {
            let mut gpu = self.gpu.borrow_mut();
            assert!(
                !gpu.fences[frame.slot].pending,
                "slot {} re-recorded while its previous submission is in flight",
                frame.slot
            );
            gpu.events.push(format!("record {}", frame.slot));
            self.recorded.push((frame.slot, frame.extent));
            Ok(vk::CommandBuffer::null())
        }
    }

    #[test]
    fn test_fence_discipline_over_many_frames() {
        let gpu = gpu();
        let mut scheduler = scheduler(&gpu);
        let mut target = MockTarget::new(&gpu);
        let mut recorder = MockRecorder::new(&gpu);

        for _ in 0..10 {
            assert_eq!(
                scheduler.draw_frame(&mut target, &mut recorder).unwrap(),
                FrameOutcome::Presented
            );
        }

        let slots: Vec<usize> = recorder.recorded.iter().map(|(slot, _)| *slot).collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);

        let events = gpu.borrow().events.clone();
        assert_eq!(
            &events[..8],
            &["wait 0", "reset 0", "record 0", "submit 0", "wait 1", "reset 1", "record 1", "submit 1"]
        );
    }

    #[test]
    fn test_present_out_of_date_on_frame_seven() {
        let gpu = gpu();
        let mut scheduler = scheduler(&gpu);
        let mut target = MockTarget::new(&gpu);
        target.present_out_of_date_on = Some(7);
        let mut recorder = MockRecorder::new(&gpu);

        for frame in 1..=6 {
            assert_eq!(
                scheduler.draw_frame(&mut target, &mut recorder).unwrap(),
                FrameOutcome::Presented,
                "frame {frame}"
            );
        }

        assert_eq!(
            scheduler.draw_frame(&mut target, &mut recorder).unwrap(),
            FrameOutcome::Recreated
        );
        assert_eq!(target.recreations, 1);
        // Frame 7 was submitted, so its slot is spent.
        assert_eq!(scheduler.current_slot(), 1);

        assert_eq!(
            scheduler.draw_frame(&mut target, &mut recorder).unwrap(),
            FrameOutcome::Presented
        );
        assert_eq!(recorder.recorded.len(), 8);
        assert_eq!(recorder.recorded[6].1, vk::Extent2D { width: 800, height: 600 });
        assert_eq!(recorder.recorded[7].1, vk::Extent2D { width: 1024, height: 768 });
        assert_eq!(target.recreations, 1);
    }

    #[test]
    fn test_acquire_out_of_date_retries_same_slot() {
        let gpu = gpu();
        let mut scheduler = scheduler(&gpu);
        let mut target = MockTarget::new(&gpu);
        let mut recorder = MockRecorder::new(&gpu);

        scheduler.draw_frame(&mut target, &mut recorder).unwrap();
        assert_eq!(scheduler.current_slot(), 1);

        target.acquire_out_of_date = true;
        assert_eq!(
            scheduler.draw_frame(&mut target, &mut recorder).unwrap(),
            FrameOutcome::Recreated
        );
        assert_eq!(scheduler.current_slot(), 1);
        // The fence was not reset, so the retry does not block forever.
        assert!(gpu.borrow().fences[1].signaled);

        assert_eq!(
            scheduler.draw_frame(&mut target, &mut recorder).unwrap(),
            FrameOutcome::Presented
        );
        assert_eq!(recorder.recorded.last().unwrap().0, 1);
        assert_eq!(scheduler.current_slot(), 0);
    }

    #[test]
    fn test_resize_request_recreates_before_acquire() {
        let gpu = gpu();
        let mut scheduler = scheduler(&gpu);
        let mut target = MockTarget::new(&gpu);
        let mut recorder = MockRecorder::new(&gpu);

        target.resize_requested = true;
        assert_eq!(
            scheduler.draw_frame(&mut target, &mut recorder).unwrap(),
            FrameOutcome::Recreated
        );
        assert_eq!(target.acquires, 0);
        assert_eq!(target.recreations, 1);
        assert_eq!(scheduler.current_slot(), 0);
        assert!(recorder.recorded.is_empty());

        scheduler.draw_frame(&mut target, &mut recorder).unwrap();
        assert_eq!(recorder.recorded[0].1.width, 1024);
    }

    #[test]
    fn test_minimized_target_is_skipped() {
        let gpu = gpu();
        let mut scheduler = scheduler(&gpu);
        let mut target = MockTarget::new(&gpu);
        let mut recorder = MockRecorder::new(&gpu);

        target.minimized = true;
        target.resize_requested = true;
        assert_eq!(
            scheduler.draw_frame(&mut target, &mut recorder).unwrap(),
            FrameOutcome::Skipped
        );
        assert!(gpu.borrow().events.is_empty());
        // The resize is still pending for when the window is restored.
        assert!(target.resize_requested);
    }

    #[test]
    fn test_suboptimal_acquire_is_tolerated() {
        let gpu = gpu();
        let mut scheduler = scheduler(&gpu);
        let mut target = MockTarget::new(&gpu);
        target.acquire_suboptimal = true;
        let mut recorder = MockRecorder::new(&gpu);

        assert_eq!(
            scheduler.draw_frame(&mut target, &mut recorder).unwrap(),
            FrameOutcome::Presented
        );
        assert_eq!(target.recreations, 0);
    }

    #[test]
    fn test_wait_all_drains_every_slot() {
        let gpu = gpu();
        let mut scheduler = scheduler(&gpu);
        let mut target = MockTarget::new(&gpu);
        let mut recorder = MockRecorder::new(&gpu);

        scheduler.draw_frame(&mut target, &mut recorder).unwrap();
        scheduler.draw_frame(&mut target, &mut recorder).unwrap();
        scheduler.wait_all().unwrap();

        let gpu = gpu.borrow();
        assert!(gpu.fences.iter().all(|f| f.signaled && !f.pending));
    }

    #[test]
    #[should_panic(expected = "at least one slot")]
    fn test_empty_scheduler_panics() {
        let _ = FrameScheduler::<MockFence>::new(Vec::new());
    }
}
