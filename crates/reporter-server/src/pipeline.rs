//! Per-frame detection: decode, dedup, enrich, publish.

use crate::broadcast::Broadcaster;
use crate::enrich::DeviceClient;
use crate::ledger::{Ledger, Recorded};
use reporter_capture::{decode, CaptureFilter};
use reporter_types::DetectionEvent;
use std::sync::Arc;

/// Turns raw frames into published detection events.
///
/// Frames are expected one at a time from a single capture task, which keeps
/// ids in first-seen order. Enrichment runs inline, so a slow device delays
/// the next frame by up to the enrichment timeout.
#[derive(Debug)]
pub struct Detector {
    filter: CaptureFilter,
    ledger: Arc<Ledger>,
    device_client: Option<DeviceClient>,
    broadcaster: Broadcaster,
}

impl Detector {
    pub fn new(
        filter: CaptureFilter,
        ledger: Arc<Ledger>,
        device_client: Option<DeviceClient>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            filter,
            ledger,
            device_client,
            broadcaster,
        }
    }

    pub fn filter(&self) -> &CaptureFilter {
        &self.filter
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Processes one raw frame.
    ///
    /// Returns the published event if the frame came from a newly-seen
    /// sender. Undecodable frames, other ports, and repeat senders yield
    /// `None` without touching the sequence counter.
    pub async fn handle_frame(&self, frame: &[u8]) -> Option<DetectionEvent> {
        let headers = match decode(frame) {
            Ok(headers) => headers,
            Err(e) => {
                tracing::trace!(error = %e, len = frame.len(), "discarding frame");
                return None;
            }
        };

        if !self.filter.matches(headers.destination_port) {
            tracing::trace!(port = headers.destination_port, "ignoring frame on unwatched port");
            return None;
        }

        let Recorded { event, epoch } = self.ledger.record_if_new(
            headers.source_ip,
            headers.source_mac,
            headers.destination_port,
        )?;

        let event = self.enrich(event).await;

        if !self.ledger.is_current(epoch) {
            tracing::debug!(
                id = event.id,
                ip = %event.source_ip,
                "ledger cleared while processing; dropping stale event"
            );
            return None;
        }

        tracing::info!(
            id = event.id,
            ip = %event.source_ip,
            mac = %event.source_mac,
            port = event.destination_port,
            device_type = event.device_type.as_deref().unwrap_or("-"),
            "new device detected"
        );

        let delivered = self.broadcaster.publish(&event).await;
        tracing::debug!(id = event.id, delivered, "published detection event");
        Some(event)
    }

    async fn enrich(&self, event: DetectionEvent) -> DetectionEvent {
        let Some(client) = self
            .device_client
            .as_ref()
            .filter(|client| client.applies_to(event.destination_port))
        else {
            return event;
        };

        match client.enrich(event.source_ip).await {
            Ok(info) => event.with_device(info),
            Err(e) => {
                tracing::warn!(
                    ip = %event.source_ip,
                    error = %e,
                    "device enrichment failed; emitting event without device details"
                );
                event
            }
        }
    }
}
