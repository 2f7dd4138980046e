//! Shared in-memory transport fakes for unit tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

use strand_core::errors::TransportError;
use strand_core::frame::Frame;

use crate::transport::FrameWrite;

/// Write half that records every frame on an unbounded channel.
pub(crate) struct RecordingWrite {
    tx: mpsc::UnboundedSender<Frame>,
}

impl RecordingWrite {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl FrameWrite for RecordingWrite {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .map_err(|_| TransportError::Io("sink gone".into()))
    }

    async fn close(&mut self) {}
}

/// Write half that fails every write.
#[derive(Default)]
pub(crate) struct FailingWrite;

#[async_trait]
impl FrameWrite for FailingWrite {
    async fn write_frame(&mut self, _frame: Frame) -> Result<(), TransportError> {
        Err(TransportError::Io("broken pipe".into()))
    }

    async fn close(&mut self) {}
}

/// Drain whatever frames have been recorded so far.
pub(crate) fn collect_frames(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}
