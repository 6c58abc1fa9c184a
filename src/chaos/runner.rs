//! Deterministic cluster simulator.
//!
//! Drives a set of mutex instances wired through one channel hub with a
//! seeded random schedule of pump/request/release actions and optional
//! process kills. The whole simulation runs on one thread, so every run is
//! exactly reproducible from its seed, and the state of all instances can
//! be checked between steps.

use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::mutex::callbacks::LockEvent;
use crate::mutex::instance::{DistributedMutex, LockState};
use crate::mutex::peer::PeerIdentity;
use crate::mutex::transport::{ChannelHub, ChannelTransport};

use super::checker::{Action, History, HistoryEntry, Violation};

/// Knobs for a simulated run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Number of instances in the cluster.
    pub peers: usize,
    /// Random driver steps before settling.
    pub steps: usize,
    /// Relative weights for pump / request / release actions.
    pub action_weights: [u32; 3],
    /// Probability per step of killing a random instance instead of
    /// driving one. The last live instance is never killed.
    pub kill_probability: f64,
    /// RNG seed; every run with the same config is identical.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            peers: 3,
            steps: 400,
            action_weights: [6, 3, 2],
            kill_probability: 0.0,
            seed: 0,
        }
    }
}

/// Tallies from a completed run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    pub steps: usize,
    pub kills: usize,
    pub granted: usize,
    pub denied: usize,
    pub released: usize,
    pub holder_lost: usize,
}

/// A cluster of instances under a seeded random schedule.
pub struct SimCluster {
    config: SimConfig,
    hub: ChannelHub,
    identities: Vec<PeerIdentity>,
    /// `None` marks a killed instance.
    instances: Vec<Option<DistributedMutex<ChannelTransport>>>,
    history: Rc<RefCell<History>>,
    rng: StdRng,
    kills: usize,
}

impl SimCluster {
    pub fn new(config: SimConfig) -> Self {
        let identities: Vec<PeerIdentity> = (0..config.peers)
            .map(|k| PeerIdentity::new(Ipv4Addr::new(10, 0, 0, k as u8 + 1), 4400 + k as u16))
            .collect();
        let mut hub = ChannelHub::new(&identities);
        let history = Rc::new(RefCell::new(History::new()));

        let mut instances = Vec::with_capacity(config.peers);
        for (idx, &id) in identities.iter().enumerate() {
            let transport = hub.endpoint(id).expect("endpoint taken once");
            let mut mutex =
                DistributedMutex::new("chaos-lock", id, transport).expect("valid mutex name");
            for &peer in &identities {
                if peer != id {
                    mutex.add_peer_identity(peer).expect("identities distinct");
                }
            }

            let h = history.clone();
            mutex.on_granted(move || h.borrow_mut().record_event(idx, LockEvent::Granted));
            let h = history.clone();
            mutex.on_denied(move || h.borrow_mut().record_event(idx, LockEvent::Denied));
            let h = history.clone();
            mutex.on_released(move || h.borrow_mut().record_event(idx, LockEvent::Released));
            let h = history.clone();
            mutex.on_holder_lost(move |peer| {
                h.borrow_mut().record_event(idx, LockEvent::HolderLost(peer))
            });

            instances.push(Some(mutex));
        }

        let rng = StdRng::seed_from_u64(config.seed);
        SimCluster {
            config,
            hub,
            identities,
            instances,
            history,
            rng,
            kills: 0,
        }
    }

    /// Run the full schedule, settle, and check every invariant.
    pub fn run(&mut self) -> Result<RunStats, Violation> {
        for step in 0..self.config.steps {
            self.step(step)?;
        }
        self.settle()?;
        self.history
            .borrow()
            .check_discipline(self.config.peers)?;
        Ok(self.stats())
    }

    /// One driver step: pick a live instance, act on it, check states.
    pub fn step(&mut self, step: usize) -> Result<(), Violation> {
        let live: Vec<usize> = (0..self.instances.len())
            .filter(|&i| self.instances[i].is_some())
            .collect();
        let Some(&idx) = live.choose(&mut self.rng) else {
            return Ok(());
        };

        if live.len() > 1
            && self.config.kill_probability > 0.0
            && self.rng.gen_bool(self.config.kill_probability)
        {
            self.kill(idx);
        } else {
            match pick_weighted(&mut self.rng, &self.config.action_weights) {
                0 => {
                    self.history.borrow_mut().record_action(idx, Action::Pump);
                    let _ = self.pump_instance(idx);
                }
                1 => {
                    self.history
                        .borrow_mut()
                        .record_action(idx, Action::Request);
                    if let Some(m) = self.instances[idx].as_mut() {
                        m.request();
                    }
                }
                _ => {
                    self.history
                        .borrow_mut()
                        .record_action(idx, Action::Release);
                    if let Some(m) = self.instances[idx].as_mut() {
                        m.release();
                    }
                }
            }
        }

        self.check_states(step)
    }

    /// Pump every live instance round-robin until a full round moves no
    /// traffic. The protocol has no retries, so traffic always drains.
    pub fn settle(&mut self) -> Result<(), Violation> {
        let rounds = self.config.peers * 4 + 8;
        for round in 0..rounds {
            let mut moved = 0;
            for idx in 0..self.instances.len() {
                if self.instances[idx].is_some() {
                    self.history.borrow_mut().record_action(idx, Action::Pump);
                    moved += self.pump_instance(idx);
                }
            }
            self.check_states(self.config.steps + round)?;
            if moved == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Sever all of the instance's connections, then drop it. The order
    /// matters: a killed process must not get its teardown release out.
    fn kill(&mut self, idx: usize) {
        self.history.borrow_mut().record_action(idx, Action::Kill);
        self.hub.kill(self.identities[idx]);
        self.instances[idx] = None;
        self.kills += 1;
    }

    fn pump_instance(&mut self, idx: usize) -> usize {
        match self.instances[idx].as_mut() {
            // Hub frames are produced by our own encoder; decode errors
            // cannot occur here.
            Some(m) => m.pump().unwrap_or(0),
            None => 0,
        }
    }

    /// Safety and trichotomy over all live instances.
    fn check_states(&self, step: usize) -> Result<(), Violation> {
        let mut holders = Vec::new();
        for (idx, slot) in self.instances.iter().enumerate() {
            let Some(m) = slot else { continue };
            let set = [m.is_available(), m.is_held_locally(), m.is_held_remotely()]
                .iter()
                .filter(|&&flag| flag)
                .count();
            let requesting = m.state() == LockState::Requesting;
            if (requesting && set != 0) || (!requesting && set != 1) {
                return Err(Violation::BrokenTrichotomy {
                    step,
                    instance: idx,
                });
            }
            if m.is_held_locally() {
                holders.push(idx);
            }
        }
        if holders.len() > 1 {
            return Err(Violation::MultipleHolders { step, holders });
        }
        Ok(())
    }

    /// Index of the current holder, if any instance holds the lock.
    pub fn holder_index(&self) -> Option<usize> {
        self.instances
            .iter()
            .position(|slot| slot.as_ref().map(|m| m.is_held_locally()).unwrap_or(false))
    }

    pub fn instance(&self, idx: usize) -> Option<&DistributedMutex<ChannelTransport>> {
        self.instances[idx].as_ref()
    }

    pub fn instance_mut(&mut self, idx: usize) -> Option<&mut DistributedMutex<ChannelTransport>> {
        self.instances[idx].as_mut()
    }

    fn stats(&self) -> RunStats {
        let mut stats = RunStats {
            steps: self.config.steps,
            kills: self.kills,
            ..RunStats::default()
        };
        for entry in self.history.borrow().entries() {
            if let HistoryEntry::Observed { event, .. } = entry {
                match event {
                    LockEvent::Granted => stats.granted += 1,
                    LockEvent::Denied => stats.denied += 1,
                    LockEvent::Released => stats.released += 1,
                    LockEvent::HolderLost(_) => stats.holder_lost += 1,
                }
            }
        }
        stats
    }
}

/// Pick an index with probability proportional to its weight.
fn pick_weighted(rng: &mut StdRng, weights: &[u32; 3]) -> usize {
    let total: u32 = weights.iter().sum();
    let mut roll = rng.gen_range(0..total);
    for (idx, &weight) in weights.iter().enumerate() {
        if roll < weight {
            return idx;
        }
        roll -= weight;
    }
    weights.len() - 1
}
