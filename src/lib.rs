//! Bias-sweep characterization of graphene FET arrays: DC settling detection,
//! Welch noise spectra and the state machine that walks the Vg/Vd/digital grid.
pub mod channels;
pub mod config;
pub mod controller;
pub mod drivers;
pub mod engine;
pub mod record;
pub mod recorder;
pub mod simulation;
pub mod types;
pub use config::SweepConfig;
pub use controller::SweepController;
pub use engine::{run_blocking, BiasActuator, SweepEngine, SweepHandle};
pub use record::{ResultRecord, ResultStore};
pub use recorder::{JsonRecordStore, RecordSink};
pub use types::{BiasChange, BiasPoint, BiasSetpoint, SweepEvent, SweepState};
