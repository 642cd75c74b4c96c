// Beacon accumulator
//
// SAFETY INVARIANTS:
// 1. One sequential pass per beacon height, in a fixed phase order:
//    porting expiry, custodian run-away, rate liquidation, shard actions
//    (shard id ascending, then intra-shard order), pick-more redeem, rewards
// 2. Each instruction is built against the state left by the previous one and applied
//    all-or-nothing on a copy; the copy replaces the working state only on success
// 3. Any apply failure is ConsensusInternal and discards the whole height
// 4. Status writes stay in a StoreOverlay until the caller commits the outcome
// 5. verify() accepts proposed instructions only if they are byte-identical to a local rebuild

use log::{debug, info, warn};
use std::collections::BTreeMap;

use portal_metadata::{BeaconInstruction, ShardAction};
use portal_state::{Hash, MemoryStatusStore, PortalParams, PortalState, StatusBatch, StatusStore, StoreOverlay};

use crate::context::ProcessingContext;
use crate::errors::BeaconError;
use crate::processors::{liquidation, porting, processor_for, redeem, reward};

/// Result of one beacon height: the instructions, the next state and the
/// status writes to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightOutcome {
    pub beacon_height: u64,
    pub instructions: Vec<BeaconInstruction>,
    pub state: PortalState,
    pub state_root: Hash,
    pub batch: StatusBatch,
}

impl HeightOutcome {
    /// Persist the status writes and hand back the next state.
    pub fn commit(self, store: &mut MemoryStatusStore) -> (PortalState, Vec<BeaconInstruction>) {
        store.apply_batch(self.batch);
        (self.state, self.instructions)
    }
}

/// Working set for one height.
pub(crate) struct HeightRun<'a> {
    pub(crate) state: PortalState,
    pub(crate) overlay: StoreOverlay<'a>,
    pub(crate) ctx: ProcessingContext<'a>,
    instructions: Vec<BeaconInstruction>,
}

impl<'a> HeightRun<'a> {
    fn new(
        beacon_height: u64,
        params: &'a PortalParams,
        prior: &PortalState,
        store: &'a dyn StatusStore,
    ) -> Self {
        HeightRun {
            state: prior.clone(),
            overlay: StoreOverlay::new(store),
            ctx: ProcessingContext::new(beacon_height, params),
            instructions: Vec::new(),
        }
    }

    pub(crate) fn beacon_height(&self) -> u64 {
        self.ctx.beacon_height
    }

    pub(crate) fn params(&self) -> &'a PortalParams {
        self.ctx.params
    }

    /// Apply an instruction and append it to the height's output.
    pub(crate) fn emit(&mut self, inst: BeaconInstruction) -> Result<(), BeaconError> {
        self.apply(&inst)?;
        debug!(
            "height {}: instruction #{} {} {} on shard {}",
            self.ctx.beacon_height,
            self.instructions.len(),
            inst.meta_type,
            inst.status,
            inst.shard_id
        );
        self.instructions.push(inst);
        Ok(())
    }

    fn apply(&mut self, inst: &BeaconInstruction) -> Result<(), BeaconError> {
        let processor = processor_for(inst.meta_type).ok_or_else(|| {
            BeaconError::internal(format!("no processor for instruction type {}", inst.meta_type))
        })?;
        let mut next = self.state.clone();
        let writes = processor
            .process_insts(inst, &mut next, &mut self.ctx)
            .map_err(|e| fatal(inst, e))?;
        next.check_invariants().map_err(|e| fatal(inst, e.into()))?;
        self.state = next;

        for write in writes {
            if !write.replace && self.overlay.contains(&write.key) {
                debug!("keeping existing status record {}", write.key);
                continue;
            }
            self.overlay.put(write.key, write.record);
        }
        Ok(())
    }

    fn process_action(&mut self, shard_id: u8, action: &ShardAction) -> Result<(), BeaconError> {
        let envelope = match action.decode() {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("shard {}: skipping undecodable {} action: {}", shard_id, action.meta_type, e);
                return Ok(());
            }
        };
        if envelope.shard_id != shard_id {
            warn!(
                "shard {}: skipping action {} that claims shard {}",
                shard_id, envelope.tx_req_id, envelope.shard_id
            );
            return Ok(());
        }
        let processor = match processor_for(action.meta_type) {
            Some(p) if action.meta_type.is_request() => p,
            _ => {
                warn!("shard {}: {} is not a shard request, skipping", shard_id, action.meta_type);
                return Ok(());
            }
        };
        let insts = processor.build_new_insts(&envelope, &self.state, &self.overlay, &mut self.ctx)?;
        for inst in insts {
            self.emit(inst)?;
        }
        Ok(())
    }

    fn finish(self) -> Result<HeightOutcome, BeaconError> {
        let state_root = self.state.state_root()?;
        Ok(HeightOutcome {
            beacon_height: self.ctx.beacon_height,
            instructions: self.instructions,
            state: self.state,
            state_root,
            batch: self.overlay.into_batch(),
        })
    }
}

fn fatal(inst: &BeaconInstruction, err: BeaconError) -> BeaconError {
    match err {
        BeaconError::ConsensusInternal(_) => err,
        other => BeaconError::internal(format!(
            "applying {} ({}) from shard {}: {}",
            inst.meta_type, inst.status, inst.shard_id, other
        )),
    }
}

/// Turns the shard actions of one beacon height into instructions and the next Portal state.
pub struct BeaconAccumulator {
    params: PortalParams,
}

impl BeaconAccumulator {
    pub fn new(params: PortalParams) -> Self {
        BeaconAccumulator { params }
    }

    pub fn params(&self) -> &PortalParams {
        &self.params
    }

    /// Build and apply every instruction of `beacon_height`.
    pub fn produce(
        &self,
        beacon_height: u64,
        prior: &PortalState,
        store: &dyn StatusStore,
        shard_actions: &BTreeMap<u8, Vec<ShardAction>>,
    ) -> Result<HeightOutcome, BeaconError> {
        let mut run = HeightRun::new(beacon_height, &self.params, prior, store);
        let span = run.ctx.span().clone();
        let _entered = span.enter();

        porting::expire_waiting_portings(&mut run)?;
        redeem::liquidate_run_away_custodians(&mut run)?;
        liquidation::liquidate_by_exchange_rates(&mut run)?;
        for (shard_id, actions) in shard_actions {
            for action in actions {
                run.process_action(*shard_id, action)?;
            }
        }
        redeem::pick_more_custodians(&mut run)?;
        reward::distribute_rewards(&mut run)?;

        let outcome = run.finish()?;
        if !outcome.instructions.is_empty() {
            info!(
                "beacon height {}: {} portal instruction(s), {} status write(s), state root {}",
                beacon_height,
                outcome.instructions.len(),
                outcome.batch.len(),
                outcome.state_root
            );
        }
        Ok(outcome)
    }

    /// Apply already agreed instructions without rebuilding them.
    pub fn replay(
        &self,
        beacon_height: u64,
        prior: &PortalState,
        store: &dyn StatusStore,
        instructions: &[BeaconInstruction],
    ) -> Result<HeightOutcome, BeaconError> {
        let mut run = HeightRun::new(beacon_height, &self.params, prior, store);
        let span = run.ctx.span().clone();
        let _entered = span.enter();
        for inst in instructions {
            run.emit(inst.clone())?;
        }
        run.finish()
    }

    /// Rebuild the height locally and accept `proposed` only if it matches byte for byte.
    pub fn verify(
        &self,
        beacon_height: u64,
        prior: &PortalState,
        store: &dyn StatusStore,
        shard_actions: &BTreeMap<u8, Vec<ShardAction>>,
        proposed: &[BeaconInstruction],
    ) -> Result<HeightOutcome, BeaconError> {
        let produced = self.produce(beacon_height, prior, store, shard_actions)?;
        let len = produced.instructions.len().max(proposed.len());
        for index in 0..len {
            let expected = produced.instructions.get(index).map(BeaconInstruction::to_strings);
            let found = proposed.get(index).map(BeaconInstruction::to_strings);
            if expected != found {
                warn!("beacon height {}: proposed instruction {} does not match rebuild", beacon_height, index);
                return Err(BeaconError::ReplayMismatch { index, expected, found });
            }
        }
        Ok(produced)
    }
}
