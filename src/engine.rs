// src/engine.rs
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use log::{error, info};
use crate::controller::SweepController;
use crate::drivers::{SampleBlock, SampleSource, SweepError};
use crate::recorder::RecordSink;
use crate::types::*;

/// Commands drained per loop iteration before the controller is polled.
const MAX_COMMANDS_PER_TICK: usize = 10;

/// Whatever sets gate/drain voltages and selects the digital column.
pub trait BiasActuator {
    fn apply(&mut self, change: BiasChange, setpoint: &BiasSetpoint) -> Result<(), SweepError>;
}

/// Actuator that only logs the requested bias; for dry runs.
#[derive(Default)]
pub struct LogActuator {
    pub applied: Vec<(BiasChange, BiasSetpoint)>,
}

impl BiasActuator for LogActuator {
    fn apply(&mut self, change: BiasChange, setpoint: &BiasSetpoint) -> Result<(), SweepError> {
        info!("bias {:?} -> Vgs={} Vds={}", change, setpoint.vgs, setpoint.vds);
        self.applied.push((change, setpoint.clone()));
        Ok(())
    }
}

/// Forwards bias requests to the actuator and finished records to the sink.
/// Returns `true` once the last configured cycle has been saved.
fn dispatch<A: BiasActuator, S: RecordSink>(
    controller: &mut SweepController,
    actuator: &mut A,
    sink: &mut S,
    events: Vec<SweepEvent>,
    out: &mut dyn FnMut(EngineMessage),
) -> Result<bool, SweepError> {
    for event in events {
        if let Some((change, setpoint)) = event.bias_request() {
            actuator.apply(change, setpoint)?;
        }
        let saved = match &event {
            SweepEvent::Completed { cycle, record } => Some((*cycle, sink.save(record, *cycle)?)),
            _ => None,
        };
        out(EngineMessage::Event(event));
        if let Some((cycle, path)) = saved {
            out(EngineMessage::Saved { cycle, path });
            if cycle + 1 >= controller.planned_cycles() {
                return Ok(true);
            }
            let setpoint = controller.restart();
            actuator.apply(BiasChange::Initial, &setpoint)?;
        }
    }
    Ok(false)
}

/// Drives a sweep synchronously from `source` until every cycle is saved or the
/// source runs dry. Returns the saved record paths.
pub fn run_blocking<Src, A, S>(
    controller: &mut SweepController,
    source: &mut Src,
    actuator: &mut A,
    sink: &mut S,
) -> Result<Vec<PathBuf>, SweepError>
where
    Src: SampleSource,
    A: BiasActuator,
    S: RecordSink,
{
    let mut paths = Vec::new();
    let mut collect = |msg: EngineMessage| {
        if let EngineMessage::Saved { path, .. } = msg {
            paths.push(path);
        }
    };
    actuator.apply(BiasChange::Initial, &controller.setpoint())?;
    loop {
        let block = source.next_block()?;
        let exhausted = block.is_none();
        if let Some(block) = block {
            controller.add_data(block)?;
        }
        let events = controller.poll();
        if dispatch(controller, actuator, sink, events, &mut collect)? {
            break;
        }
        if exhausted {
            info!("source exhausted in {:?} at {:?}", controller.state(), controller.bias_point());
            break;
        }
    }
    Ok(paths)
}

/// Handle to a sweep running on its own thread.
pub struct SweepHandle {
    tx: Sender<EngineCommand>,
    rx: Receiver<EngineMessage>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SweepHandle {
    pub fn add_data(&self, block: SampleBlock) -> Result<(), SweepError> {
        self.tx
            .send(EngineCommand::AddData(block))
            .map_err(|_| SweepError::SweepFinished)
    }

    /// Takes effect before any block still waiting in the command queue.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.tx.send(EngineCommand::Stop).ok();
    }

    pub fn events(&self) -> &Receiver<EngineMessage> {
        &self.rx
    }

    pub fn join(mut self) -> thread::Result<()> {
        match self.thread.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

pub struct SweepEngine;

fn shut_down(controller: &mut SweepController, out: &mut dyn FnMut(EngineMessage)) {
    controller.stop();
    out(EngineMessage::Log("sweep stopped".to_owned()));
    out(EngineMessage::Finished);
}

impl SweepEngine {
    /// Moves the controller onto a consumer thread. Blocks reach it through
    /// `SweepHandle::add_data`; everything it does is reported on `events()`.
    pub fn spawn<A, S>(
        mut controller: SweepController,
        mut actuator: A,
        mut sink: S,
        poll_interval: Duration,
    ) -> SweepHandle
    where
        A: BiasActuator + Send + 'static,
        S: RecordSink + Send + 'static,
    {
        let (tx_cmd, rx_cmd) = mpsc::channel::<EngineCommand>();
        let (tx, rx) = mpsc::channel::<EngineMessage>();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_requested = Arc::clone(&stop);
        let thread = thread::spawn(move || {
            tx.send(EngineMessage::Log("sweep engine ready".to_owned())).ok();
            let mut out = |msg: EngineMessage| {
                tx.send(msg).ok();
            };
            if let Err(e) = actuator.apply(BiasChange::Initial, &controller.setpoint()) {
                error!("initial bias failed: {e}");
                out(EngineMessage::Error(e.to_string()));
                out(EngineMessage::Finished);
                return;
            }
            let stopping = || stop_requested.load(Ordering::SeqCst);
            loop {
                let mut received = 0;
                let mut halted = false;
                for _ in 0..MAX_COMMANDS_PER_TICK {
                    if stopping() {
                        halted = true;
                        break;
                    }
                    match rx_cmd.try_recv() {
                        Ok(EngineCommand::AddData(block)) => {
                            received += 1;
                            if let Err(e) = controller.add_data(block) {
                                out(EngineMessage::Error(e.to_string()));
                            }
                        }
                        Ok(EngineCommand::Stop) | Err(TryRecvError::Disconnected) => {
                            halted = true;
                            break;
                        }
                        Err(TryRecvError::Empty) => break,
                    }
                }
                if halted || stopping() {
                    shut_down(&mut controller, &mut out);
                    return;
                }
                let events = controller.poll();
                // whatever this poll decided is dropped once a stop has been requested
                if stopping() {
                    shut_down(&mut controller, &mut out);
                    return;
                }
                let progressed = !events.is_empty();
                match dispatch(&mut controller, &mut actuator, &mut sink, events, &mut out) {
                    Ok(true) => {
                        out(EngineMessage::Finished);
                        return;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        error!("sweep aborted: {e}");
                        controller.stop();
                        out(EngineMessage::Error(e.to_string()));
                        out(EngineMessage::Finished);
                        return;
                    }
                }
                if received == 0 && !progressed {
                    thread::sleep(poll_interval);
                }
            }
        });
        SweepHandle {
            tx: tx_cmd,
            rx,
            stop,
            thread: Some(thread),
        }
    }
}
