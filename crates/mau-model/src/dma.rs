//! Bounded register-write channel between a control plane and a pipeline.
//!
//! Writes are posted; reads and barriers wait for the service to reach them.
//! The service applies requests strictly in send order and exits once every
//! sender is gone.

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::MutexGuard;

use log::{debug, error, trace};
use thiserror::Error;

use crate::{MauFault, Pipeline, PipelineHandle};

/// Failure of a channel request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DmaError {
    /// The other end of the channel is gone.
    #[error("dma channel closed")]
    Closed,
    /// A holder of the pipeline lock panicked.
    #[error("pipeline lock poisoned")]
    Poisoned,
    /// The pipeline rejected the request.
    #[error(transparent)]
    Fault(#[from] MauFault),
}

/// One queued request.
#[derive(Debug)]
pub enum DmaOp {
    /// Posted register write.
    WriteRegister {
        /// Stage position.
        stage: usize,
        /// Register address.
        addr: u32,
        /// Value.
        value: u32,
    },
    /// Register read answered on `reply`.
    ReadRegister {
        /// Stage position.
        stage: usize,
        /// Register address.
        addr: u32,
        /// Answer channel.
        reply: SyncSender<Result<u32, MauFault>>,
    },
    /// Acknowledged once every earlier request has been applied.
    Barrier {
        /// Answer channel.
        reply: SyncSender<()>,
    },
}

/// Counters of a finished service run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DmaStats {
    /// Writes applied.
    pub writes: u64,
    /// Writes the pipeline rejected.
    pub failed_writes: u64,
    /// Reads answered.
    pub reads: u64,
    /// Barriers acknowledged.
    pub barriers: u64,
}

/// Producer side; clone it to feed the service from several threads.
#[derive(Debug, Clone)]
pub struct DmaSender {
    tx: SyncSender<DmaOp>,
}

impl DmaSender {
    /// Posts a register write, blocking while the channel is full.
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::Closed`] when the service is gone.
    pub fn write(&self, stage: usize, addr: u32, value: u32) -> Result<(), DmaError> {
        self.send(DmaOp::WriteRegister { stage, addr, value })
    }

    /// Reads a register after every earlier request.
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::Closed`] when the service is gone and
    /// [`DmaError::Fault`] when the pipeline rejects the read.
    pub fn read(&self, stage: usize, addr: u32) -> Result<u32, DmaError> {
        let (reply, answer) = mpsc::sync_channel(1);
        self.send(DmaOp::ReadRegister { stage, addr, reply })?;
        answer
            .recv()
            .map_err(|_| DmaError::Closed)?
            .map_err(DmaError::from)
    }

    /// Waits until every earlier request has been applied.
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::Closed`] when the service is gone.
    pub fn barrier(&self) -> Result<(), DmaError> {
        let (reply, answer) = mpsc::sync_channel(1);
        self.send(DmaOp::Barrier { reply })?;
        answer.recv().map_err(|_| DmaError::Closed)
    }

    fn send(&self, op: DmaOp) -> Result<(), DmaError> {
        self.tx.send(op).map_err(|_| DmaError::Closed)
    }
}

/// Consumer side; run it on the thread that owns the control path.
#[derive(Debug)]
pub struct DmaService {
    rx: Receiver<DmaOp>,
}

/// Creates a channel holding at most `capacity` queued requests.
#[must_use]
pub fn channel(capacity: usize) -> (DmaSender, DmaService) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (DmaSender { tx }, DmaService { rx })
}

impl DmaService {
    /// Applies requests until every sender is dropped.
    ///
    /// Each request takes the pipeline lock for its own duration, so packets
    /// interleave between requests but never inside one. A rejected write is
    /// logged and counted; the service carries on.
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::Poisoned`] if the pipeline lock is poisoned.
    pub fn run(self, handle: &PipelineHandle) -> Result<DmaStats, DmaError> {
        let mut stats = DmaStats::default();
        while let Ok(op) = self.rx.recv() {
            match op {
                DmaOp::WriteRegister { stage, addr, value } => {
                    trace!("dma write stage {stage} {addr:#010x} = {value:#x}");
                    let applied = lock(handle)?.write_register(stage, addr, value);
                    match applied {
                        Ok(()) => stats.writes += 1,
                        Err(fault) => {
                            error!("dma write {addr:#010x} rejected: {fault}");
                            stats.failed_writes += 1;
                        }
                    }
                }
                DmaOp::ReadRegister { stage, addr, reply } => {
                    let value = lock(handle)?.read_register(stage, addr);
                    stats.reads += 1;
                    if reply.send(value).is_err() {
                        debug!("dma read {addr:#010x}: requester went away");
                    }
                }
                DmaOp::Barrier { reply } => {
                    stats.barriers += 1;
                    if reply.send(()).is_err() {
                        debug!("dma barrier: requester went away");
                    }
                }
            }
        }
        debug!("dma service stopped: {stats:?}");
        Ok(stats)
    }
}

fn lock(handle: &PipelineHandle) -> Result<MutexGuard<'_, Pipeline>, DmaError> {
    handle.lock().map_err(|_| DmaError::Poisoned)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::{channel, DmaError};
    use crate::{register_address, MauConfig, MauError, Pipeline, SimulationConfig, BLOCK_NEXT_TABLE};

    #[test]
    fn writes_apply_in_order_before_reads() {
        let handle = Pipeline::new(0, SimulationConfig::default(), vec![MauConfig::new(0)])
            .expect("pipeline")
            .shared();
        let (sender, service) = channel(4);
        let worker = {
            let handle = handle.clone();
            thread::spawn(move || service.run(&handle))
        };

        let addr = register_address(BLOCK_NEXT_TABLE, 3, 0);
        for value in 0..32u32 {
            sender.write(0, addr, value).expect("write");
        }
        assert_eq!(sender.read(0, addr), Ok(31));
        sender.write(0, 0x7F00_0000, 1).expect("posted");
        sender.barrier().expect("barrier");
        let rejected = sender.read(1, addr);
        assert!(matches!(
            rejected,
            Err(DmaError::Fault(fault)) if matches!(fault.error, MauError::OutOfRange { .. })
        ));
        drop(sender);

        let stats = worker.join().expect("join").expect("run");
        assert_eq!(stats.writes, 32);
        assert_eq!(stats.failed_writes, 1);
        assert_eq!(stats.reads, 2);
        assert_eq!(stats.barriers, 1);
    }

    #[test]
    fn closed_service_reports_closed() {
        let (sender, service) = channel(1);
        drop(service);
        assert_eq!(sender.write(0, 0, 0), Err(DmaError::Closed));
        assert_eq!(sender.barrier(), Err(DmaError::Closed));
    }
}
