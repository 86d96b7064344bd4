//! Silence keepalive
//!
//! Browsers tear down a peer connection that receives no media for too long.
//! Until real audio from the call arrives, the bridge feeds its browser track
//! with synthetic silent frames at a fixed period.

use super::relay::ThrottledLog;
use super::sink::RtpSink;
use crate::infrastructure::protocols::webrtc::codecs::{OPUS_CLOCK_RATE, OPUS_PAYLOAD_TYPE};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;

/// Opus TOC byte plus padding that decodes to a silent 20ms frame
pub const OPUS_SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

pub const DEFAULT_FRAME_PERIOD: Duration = Duration::from_millis(20);

/// Endless sequence of silent RTP frames.
///
/// Sequence numbers and timestamps increase monotonically (wrapping); only
/// the first frame carries the marker bit.
#[derive(Debug, Clone)]
pub struct SilenceFrames {
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
    samples_per_frame: u32,
    first: bool,
}

impl SilenceFrames {
    pub fn new(period: Duration) -> Self {
        let samples_per_frame = (OPUS_CLOCK_RATE as u128 * period.as_millis() / 1000) as u32;
        Self {
            ssrc: rand::random(),
            sequence: rand::random(),
            timestamp: rand::random(),
            samples_per_frame,
            first: true,
        }
    }
}

impl Iterator for SilenceFrames {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        let packet = Packet {
            header: Header {
                version: 2,
                marker: self.first,
                payload_type: OPUS_PAYLOAD_TYPE,
                sequence_number: self.sequence,
                timestamp: self.timestamp,
                ssrc: self.ssrc,
                ..Default::default()
            },
            payload: Bytes::from_static(&OPUS_SILENCE_FRAME),
        };

        self.first = false;
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(self.samples_per_frame);
        Some(packet)
    }
}

/// Background silence writer; stops permanently on the first [`stop`](Self::stop)
pub struct SilenceGenerator {
    token: CancellationToken,
    stopped: AtomicBool,
    frames_sent: Arc<AtomicU64>,
}

impl SilenceGenerator {
    /// Spawn the generator. It also stops when `parent` is cancelled.
    pub fn start(sink: Arc<dyn RtpSink>, period: Duration, parent: &CancellationToken) -> Arc<Self> {
        let token = parent.child_token();
        let frames_sent = Arc::new(AtomicU64::new(0));

        let generator = Arc::new(Self {
            token: token.clone(),
            stopped: AtomicBool::new(false),
            frames_sent: frames_sent.clone(),
        });

        tokio::spawn(async move {
            let mut frames = SilenceFrames::new(period);
            let mut failures = ThrottledLog::default();
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let Some(frame) = frames.next() else { break };
                match sink.write_packet(&frame).await {
                    Ok(()) => {
                        frames_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        if let Some(n) = failures.record() {
                            debug!("Silence frame write failed ({} so far): {}", n, e);
                        }
                    }
                }
            }

            debug!(
                "Silence generator exited after {} frames",
                frames_sent.load(Ordering::Relaxed)
            );
        });

        generator
    }

    /// Stop the generator. Returns `true` only for the call that stopped it.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        info!(
            "Silence generator stopped after {} frames",
            self.frames_sent.load(Ordering::Relaxed)
        );
        true
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && !self.token.is_cancelled()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::result::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        packets: Mutex<Vec<Packet>>,
    }

    #[async_trait]
    impl RtpSink for RecordingSink {
        async fn write_packet(&self, packet: &Packet) -> Result<()> {
            self.packets.lock().push(packet.clone());
            Ok(())
        }
    }

    #[test]
    fn test_frames_mark_only_first_and_advance() {
        let frames: Vec<Packet> = SilenceFrames::new(Duration::from_millis(20)).take(3).collect();
        assert!(frames[0].header.marker);
        assert!(!frames[1].header.marker);
        assert!(!frames[2].header.marker);

        assert_eq!(
            frames[1].header.sequence_number,
            frames[0].header.sequence_number.wrapping_add(1)
        );
        assert_eq!(
            frames[2].header.timestamp,
            frames[1].header.timestamp.wrapping_add(960)
        );
        assert!(frames.iter().all(|f| f.header.ssrc == frames[0].header.ssrc));
        assert_eq!(&frames[0].payload[..], &OPUS_SILENCE_FRAME);
    }

    #[tokio::test]
    async fn test_generator_writes_until_stopped_once() {
        let sink = Arc::new(RecordingSink::default());
        let parent = CancellationToken::new();
        let generator = SilenceGenerator::start(sink.clone(), Duration::from_millis(5), &parent);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(generator.is_running());
        assert!(generator.stop());
        assert!(!generator.stop());
        assert!(!generator.is_running());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let written = sink.packets.lock().len();
        assert!(written > 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(sink.packets.lock().len(), written);
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_generator() {
        let sink = Arc::new(RecordingSink::default());
        let parent = CancellationToken::new();
        let generator = SilenceGenerator::start(sink.clone(), Duration::from_millis(5), &parent);

        parent.cancel();
        assert!(!generator.is_running());
        tokio::time::sleep(Duration::from_millis(20)).await;
        let written = sink.packets.lock().len();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(sink.packets.lock().len(), written);
    }
}
