//! RTP packet sinks and sources

use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use async_trait::async_trait;
use webrtc::rtp::packet::Packet;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_remote::TrackRemote;

/// Anything an RTP packet can be written to
#[async_trait]
pub trait RtpSink: Send + Sync {
    async fn write_packet(&self, packet: &Packet) -> Result<()>;
}

#[async_trait]
impl RtpSink for TrackLocalStaticRTP {
    async fn write_packet(&self, packet: &Packet) -> Result<()> {
        self.write_rtp(packet)
            .await
            .map(|_| ())
            .map_err(DomainError::media)
    }
}

/// Anything RTP packets can be read from. An error means the source ended.
#[async_trait]
pub trait RtpSource: Send + Sync {
    async fn read_packet(&self) -> Result<Packet>;
}

#[async_trait]
impl RtpSource for TrackRemote {
    async fn read_packet(&self) -> Result<Packet> {
        self.read_rtp()
            .await
            .map(|(packet, _)| packet)
            .map_err(DomainError::media)
    }
}
