use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use halyard_core::{Command, ConsensusMessage, PublicKey, Vertex, View};
use tracing::{debug, info, trace, warn};

use crate::commands::CommandSource;
use crate::config::BftConfig;
use crate::error::ConsensusError;
use crate::net::ConsensusNetwork;
use crate::proposer_election::ProposerElection;
use crate::safety_rules::{SafetyRules, TimeoutSignal};
use crate::timer::{ScheduledEvent, Scheduler, TimeSupplier};
use crate::validator_set::ValidatorSet;
use crate::vertex_store::VertexStore;

/// View timeout that grows with the number of views since the last commit
#[derive(Debug, Clone, Copy)]
pub struct TimeoutCalculator {
    base_ms: u64,
    rate: f64,
    max_exponent: u32,
}

impl TimeoutCalculator {
    pub fn new(config: &BftConfig) -> Self {
        TimeoutCalculator {
            base_ms: config.base_timeout_ms,
            rate: config.timeout_rate,
            max_exponent: config.max_timeout_exponent,
        }
    }

    pub fn timeout(&self, uncommitted_views: u64) -> Duration {
        let exponent = uncommitted_views.min(self.max_exponent as u64) as i32;
        let millis = (self.base_ms as f64 * self.rate.powi(exponent)).round() as u64;
        Duration::from_millis(millis)
    }
}

/// Drives view progression for one epoch. Views advance on a higher QC or TC;
/// a view with no progress times out and broadcasts a timeout signal, re-armed
/// until the view changes.
pub struct Pacemaker {
    self_key: PublicKey,
    epoch: u64,
    validators: Arc<ValidatorSet>,
    election: Arc<ProposerElection>,
    calculator: TimeoutCalculator,
    current_view: View,
    max_commands: usize,
    network: Arc<dyn ConsensusNetwork>,
    scheduler: Arc<dyn Scheduler>,
    commands: Arc<dyn CommandSource>,
    time: Arc<dyn TimeSupplier>,
}

impl Pacemaker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_key: PublicKey,
        epoch: u64,
        validators: Arc<ValidatorSet>,
        election: Arc<ProposerElection>,
        config: &BftConfig,
        network: Arc<dyn ConsensusNetwork>,
        scheduler: Arc<dyn Scheduler>,
        commands: Arc<dyn CommandSource>,
        time: Arc<dyn TimeSupplier>,
    ) -> Self {
        Pacemaker {
            self_key,
            epoch,
            validators,
            election,
            calculator: TimeoutCalculator::new(config),
            current_view: View::genesis(),
            max_commands: config.max_commands_per_vertex,
            network,
            scheduler,
            commands,
            time,
        }
    }

    pub fn current_view(&self) -> View {
        self.current_view
    }

    /// Enter the view after the highest certified one
    pub fn start(&mut self, store: &VertexStore, safety: &mut SafetyRules) -> Result<(), ConsensusError> {
        let view = store.high_qc().highest_view().next();
        self.update_view(view, store, safety)
    }

    /// Advance if the store now certifies a view at or past the current one.
    /// Returns whether the view changed.
    pub fn process_high_qc(
        &mut self,
        store: &VertexStore,
        safety: &mut SafetyRules,
    ) -> Result<bool, ConsensusError> {
        let next = store.high_qc().highest_view().next();
        if next <= self.current_view {
            return Ok(false);
        }
        self.update_view(next, store, safety)?;
        Ok(true)
    }

    pub fn process_local_timeout(
        &mut self,
        view: View,
        count: u32,
        store: &VertexStore,
        safety: &mut SafetyRules,
    ) -> Result<(), ConsensusError> {
        if view != self.current_view {
            trace!("Ignoring stale timeout for view {}", view);
            return Ok(());
        }

        warn!(
            "Local timeout in view {} (epoch {}, attempt {})",
            view,
            self.epoch,
            count + 1
        );

        let now = self.time.now_millis();
        match safety.timeout_for(self.epoch, view, store.high_qc(), now)? {
            Some(TimeoutSignal::ViewTimeout(timeout)) => {
                self.network
                    .broadcast(&self.validators.keys(), ConsensusMessage::ViewTimeout(timeout));
            }
            Some(TimeoutSignal::Vote(vote)) => {
                self.network
                    .broadcast(&self.validators.keys(), ConsensusMessage::Vote(vote));
            }
            None => debug!("Safety rules withheld a timeout for view {}", view),
        }

        self.schedule_timeout(view, count.saturating_add(1), store);
        Ok(())
    }

    fn update_view(
        &mut self,
        view: View,
        store: &VertexStore,
        safety: &mut SafetyRules,
    ) -> Result<(), ConsensusError> {
        self.current_view = view;
        let leader = self.election.leader(view);
        info!("Entering view {} (epoch {}), leader {}", view, self.epoch, leader);

        self.schedule_timeout(view, 0, store);
        if leader == self.self_key {
            self.propose(view, store, safety)?;
        }
        Ok(())
    }

    fn schedule_timeout(&self, view: View, count: u32, store: &VertexStore) {
        let uncommitted = view
            .number()
            .saturating_sub(store.highest_committed_view().number())
            .saturating_sub(1);
        let delay = self.calculator.timeout(uncommitted);
        self.scheduler.schedule(
            ScheduledEvent::LocalTimeout {
                epoch: self.epoch,
                view,
                count,
            },
            delay,
        );
    }

    fn propose(
        &mut self,
        view: View,
        store: &VertexStore,
        safety: &mut SafetyRules,
    ) -> Result<(), ConsensusError> {
        if store.root_ledger().is_end_of_epoch() {
            debug!("Epoch {} has ended, not proposing in view {}", self.epoch, view);
            return Ok(());
        }

        let high_qc = store.high_qc();
        let qc = high_qc.highest_qc().clone();
        let parent_id = qc.proposed().vertex_id;
        let parent_ledger = store
            .ledger_header_of(&parent_id)
            .unwrap_or(&qc.proposed().ledger);

        let commands: Vec<Command> = if parent_ledger.is_end_of_epoch() {
            Vec::new()
        } else {
            let exclude: HashSet<_> = store
                .get_path_from_root(&parent_id)
                .unwrap_or_default()
                .into_iter()
                .flat_map(|v| v.commands().iter().map(Command::hash))
                .collect();
            self.commands.next_commands(self.max_commands, &exclude)
        };

        let timeout_certificate = if qc.view().next() == view {
            None
        } else {
            high_qc
                .highest_tc()
                .filter(|tc| tc.view.next() == view)
                .cloned()
        };

        let vertex = Vertex {
            epoch: self.epoch,
            view,
            qc: Some(qc),
            commands,
            proposer: Some(self.self_key),
            timeout_certificate,
        };

        let highest_committed_qc = high_qc.highest_committed_qc().clone();
        let highest_tc = high_qc.highest_tc().cloned();
        match safety.sign_proposal(vertex, highest_committed_qc, highest_tc)? {
            Some(proposal) => {
                info!(
                    "Proposing in view {} with {} commands",
                    view,
                    proposal.vertex.commands.len()
                );
                self.network
                    .broadcast(&self.validators.keys(), ConsensusMessage::Proposal(proposal));
            }
            None => warn!("Safety rules refused to sign our proposal for view {}", view),
        }
        Ok(())
    }
}
