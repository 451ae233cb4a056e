/*!
# Acquisition Core

Callback-driven buffer handoff and composition for imaging hardware: a
camera (optionally used as a spectrometer) and a scan generator hand filled
buffers to this crate through driver callbacks; the crate snapshots them and
composes result bundles for previews and completed cycles.

## Components

- [`registry`] - per-channel buffers lent to the driver
- [`machine`] - acquisition mode state machine
- [`engine`] - per-cycle readiness and bundle composition
- [`geometry`] - buffer shapes from configuration and device readout
- [`health`] - periodic temperature polling
- [`controller`] - the control surface tying them together

## Data flow

```text
driver thread ── lock ──► BufferRegistry ──► Lease (raw address)
driver thread ── unlock ─► BufferRegistry::commit ─► Snapshot
                                                   └► CompositionEngine ─► ResultSink
control thread ─ arm / start / stop / poll ─► AcquisitionController
```
*/

pub mod callbacks;
pub mod config;
pub mod controller;
pub mod driver;
pub mod engine;
pub mod geometry;
pub mod health;
pub mod machine;
pub mod registry;
pub mod simulator;
pub mod sink;

pub use callbacks::{CallbackTable, Commit, Lease};
pub use config::{AcquisitionSettings, AppConfig, RunMode};
pub use controller::AcquisitionController;
pub use driver::{Driver, StartRequest};
pub use geometry::{Geometry, SensorReadout};
pub use health::{HealthPoller, HealthReport, HealthSource};
pub use machine::AcqState;
pub use simulator::{SimulatedDriver, SimulatedSensor};
pub use sink::SinkReceiver;
