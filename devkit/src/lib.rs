/*!
# Watchtower DevKit - Stubs and helpers for bridge development

Lets the bridge run without a broker or a real host:
- Recording MQTT transport stub with simulated broker events
- Scripted process/service probes and host metrics
- A harness wiring a complete bridge over those stubs
*/

pub mod mqtt_stub;
pub mod probe_stubs;
pub mod test_utils;

pub use mqtt_stub::{MockMessage, MockTransportFactory};
pub use probe_stubs::{ScriptedMetrics, ScriptedProbe};
pub use test_utils::TestHarness;
