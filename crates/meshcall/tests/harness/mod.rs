//! Call Room Test Harness
//!
//! Runs several [`CallRoom`]s in one process without network access:
//! - `MemoryHub` relays signaling the way the room server does
//! - `FakeNetwork` stands in for WebRTC and connects links once negotiated
//! - `RecordingSink` records what each room asked the UI to render
//!
//! Basic usage pattern:
//!
//! 1. Create a hub and a network, then one `TestClient` per participant
//! 2. Call `join` on each room
//! 3. Call `settle` to pump every room until nothing is left to handle
//! 4. Inspect rooms, the hub log, the network and the sinks

#![allow(dead_code)]

pub mod network;
pub mod relay;
pub mod sink;

use meshcall::{CallConfig, CallRoom, LocalParticipant, RoomNotice, StaticSampleDevices};
use std::sync::Arc;
use tokio::sync::broadcast;

pub use network::{FakeConnectionFactory, FakeNetwork};
pub use relay::{HubEndpoint, MemoryHub};
pub use sink::{RecordingSink, SinkCall};

/// Rounds `settle` runs before giving up
const MAX_SETTLE_ROUNDS: usize = 200;

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,meshcall=debug,harness=debug")
        .with_test_writer()
        .try_init();
}

/// One participant wired to the shared hub and network
pub struct TestClient {
    pub id: String,
    pub room: CallRoom,
    pub endpoint: Arc<HubEndpoint>,
    pub devices: Arc<StaticSampleDevices>,
    pub sink: Arc<RecordingSink>,
    pub notices: broadcast::Receiver<RoomNotice>,
}

impl TestClient {
    pub fn new(hub: &Arc<MemoryHub>, network: &Arc<FakeNetwork>, id: &str, config: CallConfig) -> Self {
        let endpoint = hub.endpoint();
        let devices = Arc::new(StaticSampleDevices::new());
        let sink = Arc::new(RecordingSink::default());

        let room = CallRoom::new(
            config,
            endpoint.clone(),
            network.factory(id),
            devices.clone(),
            sink.clone(),
        )
        .expect("valid config");
        let notices = room.subscribe_notices();

        Self {
            id: id.to_string(),
            room,
            endpoint,
            devices,
            sink,
            notices,
        }
    }

    pub async fn join(&mut self, room_id: &str) -> meshcall::Result<()> {
        let display_name = format!("{} (test)", self.id);
        self.room
            .join(room_id, LocalParticipant::new(&self.id, &display_name))
            .await
    }

    /// Notices received so far
    pub fn drain_notices(&mut self) -> Vec<RoomNotice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            out.push(notice);
        }
        out
    }
}

/// Pump every room until a full pass handles nothing
///
/// Returns the number of items handled, or the first room-fatal error.
pub async fn settle(clients: &mut [&mut TestClient]) -> meshcall::Result<usize> {
    let mut total = 0;

    for _ in 0..MAX_SETTLE_ROUNDS {
        let mut handled = 0;
        for client in clients.iter_mut() {
            handled += client.room.process_pending().await?;
        }

        if handled == 0 {
            // Give spawned observers a chance to post their events
            tokio::task::yield_now().await;
            for client in clients.iter_mut() {
                handled += client.room.process_pending().await?;
            }
            if handled == 0 {
                return Ok(total);
            }
        }
        total += handled;
    }

    panic!("rooms did not settle after {} rounds", MAX_SETTLE_ROUNDS);
}
