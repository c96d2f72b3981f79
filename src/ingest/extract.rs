//! Decoded buffer → owned frame → subscribers.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::frame::{Frame, FrameError, MappedSample};
use crate::perf::{PerfReadout, PerformanceCounters};
use crate::slot::{latest_slot, Publish, SlotReceiver, SlotSender};

use super::params::VideoParameters;

/// Latest-wins fan-out of decoded frames.
#[derive(Clone, Default)]
pub struct FrameSubscribers {
    slots: Arc<Mutex<Vec<SlotSender<Arc<Frame>>>>>,
}

impl FrameSubscribers {
    pub fn subscribe(&self) -> SlotReceiver<Arc<Frame>> {
        let (tx, rx) = latest_slot();
        self.slots.lock().push(tx);
        rx
    }

    /// Offer a frame to every live subscriber. Returns how many took it.
    pub fn publish(&self, frame: &Arc<Frame>) -> usize {
        let mut slots = self.slots.lock();
        let mut delivered = 0;
        slots.retain(|slot| match slot.publish(Arc::clone(frame)) {
            Publish::Closed => false,
            Publish::Delivered | Publish::Replaced => {
                delivered += 1;
                true
            }
        });
        delivered
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-run extraction state, owned by whichever thread the sink calls back on.
pub struct FrameExtractor {
    subscribers: FrameSubscribers,
    counters: PerformanceCounters,
    params: Arc<VideoParameters>,
    sequence: u64,
}

impl FrameExtractor {
    pub fn new(
        subscribers: FrameSubscribers,
        readout: PerfReadout,
        params: Arc<VideoParameters>,
    ) -> Self {
        Self {
            subscribers,
            counters: PerformanceCounters::with_readout(readout),
            params,
            sequence: 0,
        }
    }

    /// Copy one mapped sample out and publish it.
    ///
    /// `fps` is the rate from the sample caps, used only when pad caps did not
    /// already latch the video parameters. Errors drop this frame only.
    pub fn extract(
        &mut self,
        sample: &MappedSample<'_>,
        fps: Option<u32>,
    ) -> Result<Arc<Frame>, FrameError> {
        let frame = Frame::from_mapped(sample)?;
        if !self.params.is_detected()
            && self
                .params
                .observe_values(sample.width, sample.height, fps)
        {
            log::debug!("video parameters latched from first sample");
        }

        self.sequence += 1;
        let frame = Arc::new(frame.with_sequence(self.sequence));
        if let Some(fps) = self.counters.tick(Instant::now()) {
            log::debug!("ingest fps {fps:.1}");
        }
        self.subscribers.publish(&frame);
        Ok(frame)
    }

    pub fn frames_extracted(&self) -> u64 {
        self.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelLayout;

    fn sample(data: &[u8], width: Option<i32>) -> MappedSample<'_> {
        MappedSample {
            data,
            width,
            height: Some(2),
            stride: None,
            layout: PixelLayout::Bgr8,
        }
    }

    #[test]
    fn frames_reach_every_subscriber() {
        let subscribers = FrameSubscribers::default();
        let first = subscribers.subscribe();
        let second = subscribers.subscribe();
        let params = Arc::new(VideoParameters::new());
        let mut extractor =
            FrameExtractor::new(subscribers, PerfReadout::default(), Arc::clone(&params));

        let data = [7u8; 12];
        extractor.extract(&sample(&data, Some(2)), Some(30)).unwrap();

        assert_eq!(first.try_recv().unwrap().sequence(), 1);
        assert_eq!(second.try_recv().unwrap().pixels(), &data);
        assert_eq!(params.snapshot().map(|p| p.fps), Some(30));
    }

    #[test]
    fn bad_sample_is_dropped_without_publishing() {
        let subscribers = FrameSubscribers::default();
        let rx = subscribers.subscribe();
        let mut extractor = FrameExtractor::new(
            subscribers,
            PerfReadout::default(),
            Arc::new(VideoParameters::new()),
        );
        let data = [0u8; 12];
        assert!(extractor.extract(&sample(&data, None), None).is_err());
        assert!(rx.try_recv().is_none());
        assert_eq!(extractor.frames_extracted(), 0);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let subscribers = FrameSubscribers::default();
        let rx = subscribers.subscribe();
        drop(rx);
        let frame = Arc::new(Frame::new(vec![0; 3], 1, 1, PixelLayout::Bgr8).unwrap());
        assert_eq!(subscribers.publish(&frame), 0);
        assert!(subscribers.is_empty());
    }
}
