//! A pipe of stages and the handle the control plane shares with it.

use std::sync::{Arc, Mutex};

use log::{debug, error};

use crate::{
    Mau, MauConfig, MauError, MauFault, PacketResult, Phv, RegisterBus, SimulationConfig,
    SweepOutput,
};

/// Shared pipeline; every packet and every register access holds the lock
/// for its whole duration.
pub type PipelineHandle = Arc<Mutex<Pipeline>>;

/// Header-time results of every stage a packet crossed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PipelinePacket {
    /// One entry per stage, in pipe order.
    pub stages: Vec<PacketResult>,
}

impl PipelinePacket {
    /// Result of one stage.
    #[must_use]
    pub fn stage(&self, stage: usize) -> Option<&PacketResult> {
        self.stages.get(stage)
    }
}

/// Ordered stages of one pipe.
#[derive(Debug)]
pub struct Pipeline {
    pipe: u8,
    stages: Vec<Mau>,
}

impl Pipeline {
    /// Builds one stage per configuration.
    ///
    /// # Errors
    ///
    /// Returns the first stage whose configuration fails validation.
    pub fn new(pipe: u8, sim: SimulationConfig, configs: Vec<MauConfig>) -> Result<Self, MauFault> {
        let stages = configs
            .into_iter()
            .map(|config| {
                let stage = config.stage;
                Mau::new(config, sim).map_err(|error| MauFault::new(pipe, stage, error))
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!("pipe {pipe}: {} stages", stages.len());
        Ok(Self { pipe, stages })
    }

    /// Pipe index.
    #[must_use]
    pub const fn pipe(&self) -> u8 {
        self.pipe
    }

    /// All stages in order.
    #[must_use]
    pub fn stages(&self) -> &[Mau] {
        &self.stages
    }

    /// Stage by position.
    #[must_use]
    pub fn stage(&self, stage: usize) -> Option<&Mau> {
        self.stages.get(stage)
    }

    /// Mutable stage by position.
    pub fn stage_mut(&mut self, stage: usize) -> Option<&mut Mau> {
        self.stages.get_mut(stage)
    }

    /// Wraps the pipeline for sharing with a control-plane thread.
    #[must_use]
    pub fn shared(self) -> PipelineHandle {
        Arc::new(Mutex::new(self))
    }

    /// Runs a packet through every stage in order.
    ///
    /// # Errors
    ///
    /// Returns the fault of the first failing stage; later stages do not run.
    pub fn process(&mut self, phv: &mut Phv) -> Result<PipelinePacket, MauFault> {
        let pipe = self.pipe;
        let mut packet = PipelinePacket::default();
        for mau in &mut self.stages {
            let result = mau
                .process_packet(phv)
                .map_err(|error| fault(pipe, mau.stage(), error))?;
            packet.stages.push(result);
        }
        Ok(packet)
    }

    /// Delivers the end of a packet to every stage, then its TEOP where the
    /// chip has one.
    ///
    /// # Errors
    ///
    /// Returns the fault of the first failing stage.
    pub fn end_of_packet(
        &mut self,
        packet: &PipelinePacket,
        byte_len: u32,
        error: bool,
    ) -> Result<(), MauFault> {
        let pipe = self.pipe;
        for (mau, result) in self.stages.iter_mut().zip(&packet.stages) {
            let eop = result.end_of_packet(byte_len, error);
            let stage = mau.stage();
            mau.handle_eop(&eop).map_err(|e| fault(pipe, stage, e))?;
            if mau.sim().chip.supports_teop() {
                mau.handle_teop(&eop).map_err(|e| fault(pipe, stage, e))?;
            }
        }
        Ok(())
    }

    /// Advances one idle cycle on every stage.
    ///
    /// # Errors
    ///
    /// Returns the fault of the first failing stage.
    pub fn idle_cycle(&mut self) -> Result<Vec<SweepOutput>, MauFault> {
        let pipe = self.pipe;
        self.stages
            .iter_mut()
            .map(|mau| {
                let stage = mau.stage();
                mau.idle_cycle().map_err(|e| fault(pipe, stage, e))
            })
            .collect()
    }

    /// Reads a register of one stage.
    ///
    /// # Errors
    ///
    /// Returns a fault for an unknown stage or register.
    pub fn read_register(&mut self, stage: usize, addr: u32) -> Result<u32, MauFault> {
        let pipe = self.pipe;
        let mau = self.stage_at(stage)?;
        let id = mau.stage();
        mau.read(addr).map_err(|e| fault(pipe, id, e))
    }

    /// Writes a register of one stage.
    ///
    /// # Errors
    ///
    /// Returns a fault for an unknown stage or register, or for a write the
    /// stage configuration rejects.
    pub fn write_register(&mut self, stage: usize, addr: u32, value: u32) -> Result<(), MauFault> {
        let pipe = self.pipe;
        let mau = self.stage_at(stage)?;
        let id = mau.stage();
        mau.write(addr, value).map_err(|e| fault(pipe, id, e))
    }

    fn stage_at(&mut self, stage: usize) -> Result<&mut Mau, MauFault> {
        let pipe = self.pipe;
        self.stages.get_mut(stage).ok_or_else(|| {
            MauFault::new(
                pipe,
                u8::try_from(stage).unwrap_or(u8::MAX),
                MauError::OutOfRange {
                    what: "stage",
                    index: stage,
                },
            )
        })
    }
}

fn fault(pipe: u8, stage: u8, error: MauError) -> MauFault {
    error!("pipe {pipe} stage {stage}: {error}");
    MauFault::new(pipe, stage, error)
}

#[cfg(test)]
mod tests {
    use super::Pipeline;
    use crate::{
        register_address, ChipVariant, Gress, MauConfig, MauError, Phv, SimulationConfig,
        BLOCK_NEXT_TABLE, TABLE_END,
    };

    fn pipeline(stages: u8) -> Pipeline {
        let configs = (0..stages).map(MauConfig::new).collect();
        Pipeline::new(0, SimulationConfig::for_chip(ChipVariant::Tofino2), configs)
            .expect("pipeline")
    }

    #[test]
    fn empty_stages_forward_the_next_table() {
        let mut pipe = pipeline(3);
        let mut phv = Phv::for_thread(Gress::Ingress, 0x40);
        let packet = pipe.process(&mut phv).expect("process");
        assert_eq!(packet.stages.len(), 3);
        assert_eq!(phv.pred(Gress::Ingress).next_table, 0x40);
        pipe.end_of_packet(&packet, 64, false).expect("eop");
        for mau in pipe.stages() {
            assert_eq!(mau.diag().stage.packets, 1);
            assert_eq!(mau.diag().stage.eops, 1);
            assert_eq!(mau.diag().stage.teops, 1);
        }
    }

    #[test]
    fn register_faults_name_the_stage() {
        let mut pipe = pipeline(2);
        let addr = register_address(BLOCK_NEXT_TABLE, 1, 8);
        pipe.write_register(1, addr, 0x2A).expect("write");
        assert_eq!(pipe.read_register(1, addr), Ok(0x2A));
        assert_eq!(pipe.read_register(0, addr), Ok(u32::from(TABLE_END)));

        let fault = pipe.read_register(1, 0x7F00_0000).expect_err("unknown");
        assert_eq!(fault.pipe, 0);
        assert_eq!(fault.stage, 1);
        assert_eq!(fault.error, MauError::UnknownRegister { addr: 0x7F00_0000 });

        let missing = pipe.read_register(5, addr).expect_err("no stage");
        assert_eq!(
            missing.error,
            MauError::OutOfRange {
                what: "stage",
                index: 5
            }
        );
    }
}
