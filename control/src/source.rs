//! Detection source boundary and a channel-backed implementation

use crate::error::{ControlError, Result};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use locktrack::Detection;
use std::time::{Duration, Instant};

/// One frame of detections
#[derive(Debug, Clone)]
pub struct Frame {
    pub detections: Vec<Detection>,
    /// Side of the square region the detections were taken from (pixels)
    pub fov: f32,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(detections: Vec<Detection>, fov: f32) -> Self {
        Self {
            detections,
            fov,
            captured_at: Instant::now(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.fov.is_finite() || self.fov <= 0.0 {
            return Err(ControlError::invalid_frame(format!(
                "fov must be positive, got {}",
                self.fov
            )));
        }
        Ok(())
    }
}

/// Supplies frames to the control loop
pub trait DetectionSource: Send {
    /// Newest available frame, waiting at most `timeout`.
    /// `None` when no frame arrived in time.
    fn next_frame(&mut self, timeout: Duration) -> Option<Frame>;
}

/// Producer half of [`frame_channel`]
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: Sender<Frame>,
}

impl FrameSender {
    /// Queue a frame without blocking. Returns false when the frame was
    /// dropped because the queue is full or the consumer is gone.
    pub fn send(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("Frame queue full, dropping frame");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("Frame consumer disconnected");
                false
            }
        }
    }
}

/// Consumer half of [`frame_channel`]; always yields the newest queued frame
#[derive(Debug)]
pub struct ChannelSource {
    rx: Receiver<Frame>,
    dropped: u64,
}

impl ChannelSource {
    /// Frames skipped because a newer one was already queued
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl DetectionSource for ChannelSource {
    fn next_frame(&mut self, timeout: Duration) -> Option<Frame> {
        let mut frame = match self.rx.recv_timeout(timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return None,
        };
        while let Ok(newer) = self.rx.try_recv() {
            self.dropped += 1;
            frame = newer;
        }
        Some(frame)
    }
}

/// Bounded frame queue between a detector and the control loop
pub fn frame_channel(capacity: usize) -> (FrameSender, ChannelSource) {
    let (tx, rx) = bounded(capacity.max(1));
    (FrameSender { tx }, ChannelSource { rx, dropped: 0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use locktrack::Bbox;

    fn frame(x: f32) -> Frame {
        Frame::new(
            vec![Detection::new(Bbox::new(x, 10.0, x + 20.0, 50.0), 0.9, "target")],
            320.0,
        )
    }

    #[test]
    fn test_latest_frame_wins() {
        let (tx, mut source) = frame_channel(4);
        assert!(tx.send(frame(10.0)));
        assert!(tx.send(frame(20.0)));
        assert!(tx.send(frame(30.0)));

        let latest = source.next_frame(Duration::from_millis(10)).unwrap();
        assert_eq!(latest.detections[0].bbox.xmin, 30.0);
        assert_eq!(source.dropped(), 2);
        assert!(source.next_frame(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn test_full_queue_drops() {
        let (tx, _source) = frame_channel(1);
        assert!(tx.send(frame(10.0)));
        assert!(!tx.send(frame(20.0)));
    }

    #[test]
    fn test_frame_validation() {
        assert!(frame(0.0).validate().is_ok());
        let bad = Frame::new(Vec::new(), 0.0);
        assert!(matches!(bad.validate(), Err(ControlError::InvalidFrame(_))));
    }
}
