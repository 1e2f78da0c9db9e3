//! Shared test blocks and devices.

mod end_to_end;
mod link;
mod scheduling;
mod shutdown;

use parking_lot::Mutex;
use rig_common::device::{Device, DeviceError, DeviceSettings};
use rig_common::record::Record;
use rig_engine::{Block, BlockError, BlockIo, CycleContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Call log shared between a test and the device it handed to a block.
pub type Calls = Arc<Mutex<Vec<String>>>;

/// Actuator stub journaling every call.
pub struct Journal {
    pub calls: Calls,
}

impl Journal {
    pub fn new() -> (Box<dyn Device>, Calls) {
        let calls = Calls::default();
        let device = Box::new(Self {
            calls: Arc::clone(&calls),
        });
        (device, calls)
    }
}

impl Device for Journal {
    fn name(&self) -> &'static str {
        "journal"
    }

    fn open(&mut self, _settings: &DeviceSettings) -> Result<(), DeviceError> {
        self.calls.lock().push("open".into());
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.calls.lock().push("close".into());
        Ok(())
    }

    fn set_cmd(&mut self, cmd: &[f64]) -> Result<(), DeviceError> {
        self.calls.lock().push(format!("set_cmd {cmd:?}"));
        Ok(())
    }
}

/// Keeps every record of its inputs. Stops once all inputs are closed.
pub struct Collector {
    pub records: Arc<Mutex<Vec<Record>>>,
    pub finished: Arc<AtomicUsize>,
}

impl Collector {
    pub fn new() -> (Self, Arc<Mutex<Vec<Record>>>, Arc<AtomicUsize>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let finished = Arc::new(AtomicUsize::new(0));
        let collector = Self {
            records: Arc::clone(&records),
            finished: Arc::clone(&finished),
        };
        (collector, records, finished)
    }

    fn drain(&self, io: &BlockIo) -> usize {
        let mut records = self.records.lock();
        let before = records.len();
        for input in &io.inputs {
            while let Some(record) = input.try_recv() {
                records.push(record);
            }
        }
        records.len() - before
    }
}

impl Block for Collector {
    fn kind(&self) -> &'static str {
        "collector"
    }

    fn prepare(&mut self, _io: &mut BlockIo) -> Result<(), BlockError> {
        Ok(())
    }

    fn cycle(&mut self, io: &mut BlockIo, ctx: &CycleContext) -> Result<(), BlockError> {
        if self.drain(io) > 0 {
            return Ok(());
        }
        if io.inputs.iter().all(|i| i.is_closed() && !i.poll()) {
            return Err(BlockError::EndOfProcessing);
        }
        ctx.cancel().sleep(Duration::from_millis(2));
        Ok(())
    }

    fn finish(&mut self, io: &mut BlockIo, _ctx: &CycleContext) {
        self.drain(io);
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// How a [`Faulty`] block misbehaves.
#[derive(Clone, Copy)]
pub enum Fault {
    /// `prepare()` returns an error.
    Prepare,
    /// `cycle()` returns a runtime error on the given loop.
    ErrorAt(u64),
    /// `cycle()` panics on the given loop.
    PanicAt(u64),
}

/// Block failing on purpose, counting its `finish()` calls.
pub struct Faulty {
    pub fault: Fault,
    pub finished: Arc<AtomicUsize>,
}

impl Faulty {
    pub fn new(fault: Fault) -> (Self, Arc<AtomicUsize>) {
        let finished = Arc::new(AtomicUsize::new(0));
        let block = Self {
            fault,
            finished: Arc::clone(&finished),
        };
        (block, finished)
    }
}

impl Block for Faulty {
    fn kind(&self) -> &'static str {
        "faulty"
    }

    fn prepare(&mut self, _io: &mut BlockIo) -> Result<(), BlockError> {
        match self.fault {
            Fault::Prepare => Err(BlockError::Runtime("sensor not found".into())),
            _ => Ok(()),
        }
    }

    fn cycle(&mut self, _io: &mut BlockIo, ctx: &CycleContext) -> Result<(), BlockError> {
        match self.fault {
            Fault::ErrorAt(n) if ctx.loops() >= n => {
                Err(BlockError::Runtime("overload".into()))
            }
            Fault::PanicAt(n) if ctx.loops() >= n => panic!("driver crashed"),
            _ => Ok(()),
        }
    }

    fn finish(&mut self, _io: &mut BlockIo, _ctx: &CycleContext) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// Number of `finish()` calls recorded in `counter`.
pub fn finishes(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}
