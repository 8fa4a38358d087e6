//! Drives a session against an in-process heart rate monitor.
//!
//! Run with `RUST_LOG=debug cargo run --example simulated_peripheral` to follow the session's
//! decisions.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use gattlink::api::{
    AdapterState, CharPropFlags, DiscoveredCharacteristic, GattStatus, ScanFilter, SessionEvent,
    Transport, TransportEvent, TransportEventSender,
};
use gattlink::{EventBroadcaster, Session, SessionConfig};
use tokio::time;
use uuid::Uuid;

const HEART_RATE_SERVICE: &str = "180D";
const HEART_RATE_MEASUREMENT: &str = "2A37";
const BODY_SENSOR_LOCATION: &str = "2A38";
const CONTROL_POINT: &str = "2A39";

/// Answers every request a few milliseconds later, like a radio would.
#[derive(Clone, Default)]
struct SimulatedTransport {
    events: Arc<OnceLock<TransportEventSender<String, u16>>>,
}

impl SimulatedTransport {
    fn attach(&self, events: TransportEventSender<String, u16>) {
        let _ = self.events.set(events);
    }

    fn report_after(&self, delay_ms: u64, event: TransportEvent<String, u16>) {
        if let Some(events) = self.events.get().cloned() {
            tokio::spawn(async move {
                time::sleep(Duration::from_millis(delay_ms)).await;
                events.send(event);
            });
        }
    }

    fn characteristic_uuid(handle: u16) -> &'static str {
        match handle {
            1 => HEART_RATE_MEASUREMENT,
            2 => BODY_SENSOR_LOCATION,
            _ => CONTROL_POINT,
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    type Device = String;
    type Characteristic = u16;

    async fn adapter_state(&self) -> gattlink::Result<AdapterState> {
        Ok(AdapterState::PoweredOn)
    }

    async fn start_scan(&self, _filter: &ScanFilter) -> gattlink::Result<()> {
        for (delay, device, name) in [
            (20, "C4:7C:8D:6A:00:01", None),
            (40, "C4:7C:8D:6A:00:02", Some("Simulated HRM")),
        ] {
            self.report_after(
                delay,
                TransportEvent::ScanResult {
                    device: device.into(),
                    name: name.map(str::to_string),
                    rssi: -58,
                    handle: device.to_string(),
                },
            );
        }
        Ok(())
    }

    async fn stop_scan(&self) -> gattlink::Result<()> {
        Ok(())
    }

    async fn connect(&self, _device: &String) -> gattlink::Result<()> {
        self.report_after(50, TransportEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> gattlink::Result<()> {
        self.report_after(
            20,
            TransportEvent::Disconnected {
                status: GattStatus::SUCCESS,
            },
        );
        Ok(())
    }

    async fn close(&self) {}

    async fn discover_services(&self) -> gattlink::Result<()> {
        let characteristics = [
            (HEART_RATE_MEASUREMENT, CharPropFlags::NOTIFY, 1),
            (BODY_SENSOR_LOCATION, CharPropFlags::READ, 2),
            (CONTROL_POINT, CharPropFlags::WRITE, 3),
        ]
        .into_iter()
        .map(|(uuid, properties, handle)| DiscoveredCharacteristic {
            service: HEART_RATE_SERVICE.to_string(),
            uuid: uuid.into(),
            properties,
            handle,
        })
        .collect();
        self.report_after(
            30,
            TransportEvent::ServicesDiscovered {
                status: GattStatus::SUCCESS,
                characteristics,
            },
        );
        Ok(())
    }

    async fn read_characteristic(&self, characteristic: &u16) -> gattlink::Result<()> {
        self.report_after(
            10,
            TransportEvent::CharacteristicRead {
                characteristic: Self::characteristic_uuid(*characteristic).into(),
                // Chest
                value: vec![0x01],
                status: GattStatus::SUCCESS,
            },
        );
        Ok(())
    }

    async fn write_characteristic(
        &self,
        characteristic: &u16,
        _data: &[u8],
    ) -> gattlink::Result<()> {
        self.report_after(
            10,
            TransportEvent::CharacteristicWrite {
                characteristic: Self::characteristic_uuid(*characteristic).into(),
                status: GattStatus::SUCCESS,
            },
        );
        Ok(())
    }

    async fn set_notification(
        &self,
        _characteristic: &u16,
        _enabled: bool,
    ) -> gattlink::Result<()> {
        Ok(())
    }

    async fn write_descriptor(
        &self,
        characteristic: &u16,
        descriptor: Uuid,
        _value: &[u8],
    ) -> gattlink::Result<()> {
        let uuid = Self::characteristic_uuid(*characteristic);
        self.report_after(
            10,
            TransportEvent::DescriptorWrite {
                characteristic: uuid.into(),
                descriptor,
                status: GattStatus::SUCCESS,
            },
        );
        for (beat, bpm) in [72u8, 75, 74].into_iter().enumerate() {
            self.report_after(
                100 * (beat as u64 + 1),
                TransportEvent::CharacteristicChanged {
                    characteristic: uuid.into(),
                    value: vec![0x00, bpm],
                },
            );
        }
        Ok(())
    }
}

async fn wait_for(
    events: &mut (impl Stream<Item = SessionEvent> + Unpin),
    mut wanted: impl FnMut(&SessionEvent) -> bool,
) -> anyhow::Result<SessionEvent> {
    while let Some(event) = events.next().await {
        println!("{:?}", event);
        if wanted(&event) {
            return Ok(event);
        }
    }
    anyhow::bail!("session event stream ended")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let transport = SimulatedTransport::default();
    let broadcaster = EventBroadcaster::default();
    let mut events = broadcaster.event_stream();
    let session = Session::new(transport.clone(), broadcaster, SessionConfig::default())?;
    transport.attach(session.event_sender());

    session.initialize().await?;
    session.start_scan(ScanFilter::parse(HEART_RATE_SERVICE)?).await?;
    let SessionEvent::ScanResult { device, .. } =
        wait_for(&mut events, |e| matches!(e, SessionEvent::ScanResult { .. })).await?
    else {
        anyhow::bail!("expected a scan result");
    };
    session.stop_scan().await?;

    session.connect(device).await?;
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::CharacteristicDiscovered { characteristic, .. }
            if characteristic.as_str() == CONTROL_POINT)
    })
    .await?;

    // All three go out one after another.
    session.read(BODY_SENSOR_LOCATION).await?;
    session.write(CONTROL_POINT, [0x01u8]).await?;
    session.subscribe(HEART_RATE_MEASUREMENT).await?;

    let mut beats = 0;
    wait_for(&mut events, |e| {
        if matches!(e, SessionEvent::CharacteristicUpdate { characteristic, .. }
            if characteristic.as_str() == HEART_RATE_MEASUREMENT)
        {
            beats += 1;
        }
        beats == 3
    })
    .await?;
    println!("{:?}", session.status().await?);

    session.disconnect().await?;
    wait_for(&mut events, |e| matches!(e, SessionEvent::Disconnected(_))).await?;
    session.shutdown().await?;
    Ok(())
}
