//! Campaign and scenario configuration.
//!
//! Every struct deserializes with defaults for missing fields, so a campaign
//! file only needs to name what it changes.

use std::collections::BTreeSet;

use faultline_core::{Fault, FaultBehavior, FaultPredicate, NodeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Scenario needs at least one replica.
    #[error("scenario needs at least one replica")]
    NoReplicas,

    /// Twins need at least two instances per replica.
    #[error("twins_per_replica must be at least 2, got {0}")]
    NotEnoughTwins(usize),

    /// Strategy needs more faulty replicas than the scenario has.
    #[error("strategy needs {needed} faulty replicas, scenario has {available}")]
    NotEnoughFaultyReplicas {
        /// Faulty replicas required
        needed: usize,
        /// Faulty replicas configured
        available: usize,
    },

    /// Faulty set names a node that is not a replica.
    #[error("faulty replica {0} is not part of the scenario")]
    UnknownFaultyReplica(NodeId),

    /// Every action weight is zero.
    #[error("all strategy weights are zero")]
    ZeroWeights,

    /// ByzzFuzz needs at least one round to place faults in.
    #[error("rounds_with_faults must be positive")]
    ZeroRounds,

    /// Termination would never be checked.
    #[error("sampling_frequency must be positive")]
    ZeroSamplingFrequency,

    /// Protocol name not recognised.
    #[error("unknown protocol {0}")]
    UnknownProtocol(String),
}

/// A batch of scenarios sharing one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    /// Number of scenarios to run
    pub scenarios: usize,
    /// Seed of the first scenario; scenario `i` uses `seed + i`
    pub seed: u64,
    /// Worker threads (0 = one per core)
    pub threads: usize,
    /// Stop scheduling new scenarios after the first violation
    pub stop_on_violation: bool,
    /// Protocol under test and cluster shape
    pub protocol: ProtocolConfig,
    /// Exploration strategy
    pub strategy: StrategyConfig,
    /// When a scenario stops
    pub termination: TerminationConfig,
    /// Extra automatic faults
    pub faults: Vec<FaultConfig>,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            scenarios: 100,
            seed: 0,
            threads: 0,
            stop_on_violation: false,
            protocol: ProtocolConfig::default(),
            strategy: StrategyConfig::default(),
            termination: TerminationConfig::default(),
            faults: Vec::new(),
        }
    }
}

impl CampaignConfig {
    /// Configuration of the scenario run with `seed`.
    pub fn scenario(&self, seed: u64) -> ScenarioConfig {
        ScenarioConfig {
            seed,
            replicas: self.protocol.replicas,
            clients: self.protocol.clients,
            faulty: self.protocol.faulty.clone(),
            strategy: self.strategy.clone(),
            termination: self.termination.clone(),
            faults: self.faults.clone(),
        }
    }

    /// Check everything that does not depend on the protocol.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scenario(self.seed).validate()
    }
}

/// Protocol selection and cluster shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Registered protocol name
    pub name: String,
    /// Number of replicas
    pub replicas: usize,
    /// Number of clients
    pub clients: usize,
    /// Faulty replica ids; defaults to the last `f` replicas
    pub faulty: Option<BTreeSet<NodeId>>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self { name: "consensus".to_owned(), replicas: 4, clients: 1, faulty: None }
    }
}

/// Everything needed to build one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Random seed
    pub seed: u64,
    /// Number of replicas
    pub replicas: usize,
    /// Number of clients
    pub clients: usize,
    /// Faulty replica ids; defaults to the last `f` replicas
    pub faulty: Option<BTreeSet<NodeId>>,
    /// Exploration strategy
    pub strategy: StrategyConfig,
    /// When the scenario stops
    pub termination: TerminationConfig,
    /// Extra automatic faults
    pub faults: Vec<FaultConfig>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        let protocol = ProtocolConfig::default();
        Self {
            seed: 0,
            replicas: protocol.replicas,
            clients: protocol.clients,
            faulty: None,
            strategy: StrategyConfig::default(),
            termination: TerminationConfig::default(),
            faults: Vec::new(),
        }
    }
}

impl ScenarioConfig {
    /// Defaults with the given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self { seed, ..Self::default() }
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replicas == 0 {
            return Err(ConfigError::NoReplicas);
        }
        self.strategy.validate()?;
        self.termination.validate()
    }
}

/// Strategy family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Deliver in creation order
    Fifo,
    /// Weighted random choice
    #[default]
    Random,
    /// Random plus round-scoped small-scope faults
    ByzzFuzz,
    /// Random plus twin replicas
    Twins,
}

/// Network timing model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Only the head of each recipient's mailbox is deliverable; timeouts
    /// only when no message is.
    Sync,
    /// Any queued message is deliverable.
    #[default]
    Async,
}

/// Relative weights of the Random strategy's actions.
///
/// Each weight is multiplied by the number of candidates for that action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    /// Deliver a queued message
    pub deliver_message: u32,
    /// Fire a timeout
    pub deliver_timeout: u32,
    /// Deliver a client request; defaults to `deliver_message`
    pub deliver_client_request: Option<u32>,
    /// Drop a message (before GST only)
    pub drop_message: u32,
    /// Mutate and deliver a message from a faulty sender
    pub mutate_message: u32,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            deliver_message: 90,
            deliver_timeout: 5,
            deliver_client_request: None,
            drop_message: 3,
            mutate_message: 2,
        }
    }
}

impl Weights {
    /// Client request weight after defaulting.
    pub fn client_request(&self) -> u32 {
        self.deliver_client_request.unwrap_or(self.deliver_message)
    }

    fn total(&self) -> u64 {
        [
            self.deliver_message,
            self.deliver_timeout,
            self.client_request(),
            self.drop_message,
            self.mutate_message,
        ]
        .iter()
        .map(|w| u64::from(*w))
        .sum()
    }
}

/// ByzzFuzz parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ByzzFuzzParams {
    /// Rounds with a process (mutation) fault, `c`
    pub process_fault_rounds: usize,
    /// Rounds with a network (partition) fault, `d`
    pub network_fault_rounds: usize,
    /// Rounds among which faults are placed, `r`
    pub rounds_with_faults: u64,
}

impl Default for ByzzFuzzParams {
    fn default() -> Self {
        Self { process_fault_rounds: 1, network_fault_rounds: 1, rounds_with_faults: 3 }
    }
}

/// Twins parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwinsParams {
    /// Faulty replicas to twin
    pub replicas: usize,
    /// Instances per twinned replica
    pub twins_per_replica: usize,
    /// Rounds with drawn partitions
    pub rounds: u64,
}

impl Default for TwinsParams {
    fn default() -> Self {
        Self { replicas: 1, twins_per_replica: 2, rounds: 1 }
    }
}

/// Exploration strategy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Strategy family
    pub kind: StrategyKind,
    /// Timing model
    pub mode: ExecutionMode,
    /// Random action weights
    pub weights: Weights,
    /// Drop budget per scenario
    pub max_drop_messages: usize,
    /// Mutation budget per scenario
    pub max_mutate_messages: usize,
    /// ByzzFuzz parameters
    pub byzzfuzz: ByzzFuzzParams,
    /// Twins parameters
    pub twins: TwinsParams,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: StrategyKind::default(),
            mode: ExecutionMode::default(),
            weights: Weights::default(),
            max_drop_messages: 10,
            max_mutate_messages: 10,
            byzzfuzz: ByzzFuzzParams::default(),
            twins: TwinsParams::default(),
        }
    }
}

impl StrategyConfig {
    /// FIFO in the given mode.
    pub fn fifo() -> Self {
        Self { kind: StrategyKind::Fifo, ..Self::default() }
    }

    /// Check parameters that do not depend on the scenario.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.kind {
            StrategyKind::Fifo => Ok(()),
            StrategyKind::Random | StrategyKind::ByzzFuzz | StrategyKind::Twins
                if self.weights.total() == 0 =>
            {
                Err(ConfigError::ZeroWeights)
            },
            StrategyKind::Random => Ok(()),
            StrategyKind::ByzzFuzz if self.byzzfuzz.rounds_with_faults == 0 => {
                Err(ConfigError::ZeroRounds)
            },
            StrategyKind::ByzzFuzz => Ok(()),
            StrategyKind::Twins if self.twins.twins_per_replica < 2 => {
                Err(ConfigError::NotEnoughTwins(self.twins.twins_per_replica))
            },
            StrategyKind::Twins => Ok(()),
        }
    }
}

/// Termination policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminationConfig {
    /// Schedule length after which a scenario with all predicates holding
    /// passes
    pub min_events: usize,
    /// Schedule entries allowed after GST without a commit
    pub gst_grace_period: usize,
    /// Check termination every this many schedule entries
    pub sampling_frequency: usize,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self { min_events: 500, gst_grace_period: 100, sampling_frequency: 1 }
    }
}

impl TerminationConfig {
    /// Check consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling_frequency == 0 {
            return Err(ConfigError::ZeroSamplingFrequency);
        }
        Ok(())
    }
}

/// Declarative fault.
///
/// ```toml
/// [[faults]]
/// when = [{ kind = "before-gst" }, { kind = "sender", id = "D" }]
/// action = { kind = "drop" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Fault id; derived from the parts when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Conditions, all of which must hold
    #[serde(default)]
    pub when: Vec<ConditionConfig>,
    /// What the fault does
    pub action: ActionConfig,
}

/// One fault condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ConditionConfig {
    /// GST not raised yet
    BeforeGst,
    /// Payload round
    Round {
        /// Round number
        round: u64,
    },
    /// Round assigned by the round oracle
    InferredRound {
        /// Round number
        round: u64,
    },
    /// Message sender
    Sender {
        /// Sender id
        id: NodeId,
    },
    /// Message recipient
    Recipients {
        /// Accepted recipient ids
        ids: Vec<NodeId>,
    },
    /// Payload variant
    Tag {
        /// Payload tag
        tag: String,
    },
    /// Node is outside the default partition
    Partitioned {
        /// Node id
        node: NodeId,
    },
    /// Message crosses the given layout
    AcrossPartitions {
        /// Partition groups
        groups: Vec<Vec<NodeId>>,
    },
}

impl From<&ConditionConfig> for FaultPredicate {
    fn from(condition: &ConditionConfig) -> Self {
        match condition {
            ConditionConfig::BeforeGst => Self::BeforeGst,
            ConditionConfig::Round { round } => Self::MessageRound(*round),
            ConditionConfig::InferredRound { round } => Self::InferredRound(*round),
            ConditionConfig::Sender { id } => Self::SenderHasId(id.clone()),
            ConditionConfig::Recipients { ids } => Self::recipients(ids.iter().cloned()),
            ConditionConfig::Tag { tag } => Self::PayloadTag(tag.clone()),
            ConditionConfig::Partitioned { node } => Self::NodeInPartition(node.clone()),
            ConditionConfig::AcrossPartitions { groups } => Self::AcrossPartitions(groups.clone()),
        }
    }
}

/// Fault side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ActionConfig {
    /// Drop the message
    Drop,
    /// Mutate the message
    Mutate {
        /// Mutator id; random when absent
        #[serde(default)]
        mutator: Option<String>,
    },
    /// Mutate, then deliver the message
    MutateAndDeliver {
        /// Mutator id; random when absent
        #[serde(default)]
        mutator: Option<String>,
    },
    /// Isolate a node
    Isolate {
        /// Node id
        node: NodeId,
    },
    /// Heal a node
    Heal {
        /// Node id
        node: NodeId,
    },
    /// Heal every partition
    HealNetwork,
    /// Create partitions
    Partition {
        /// Partition groups
        groups: Vec<Vec<NodeId>>,
    },
    /// Raise GST
    Gst,
}

impl From<&ActionConfig> for FaultBehavior {
    fn from(action: &ActionConfig) -> Self {
        match action {
            ActionConfig::Drop => Self::DropMessage,
            ActionConfig::Mutate { mutator } => Self::MutateMessage { mutator: mutator.clone() },
            ActionConfig::MutateAndDeliver { mutator } => {
                Self::MutateAndDeliver { mutator: mutator.clone() }
            },
            ActionConfig::Isolate { node } => Self::IsolateNode(node.clone()),
            ActionConfig::Heal { node } => Self::HealNode(node.clone()),
            ActionConfig::HealNetwork => Self::HealNetwork,
            ActionConfig::Partition { groups } => Self::CreateNetworkPartitions(groups.clone()),
            ActionConfig::Gst => Self::GlobalStabilization,
        }
    }
}

impl FaultConfig {
    /// Build the core fault.
    pub fn to_fault(&self) -> Fault {
        let predicate = self
            .when
            .iter()
            .map(FaultPredicate::from)
            .reduce(FaultPredicate::and)
            .unwrap_or(FaultPredicate::Always);
        let behavior = FaultBehavior::from(&self.action);

        match &self.id {
            Some(id) => {
                let name = format!("{behavior} when {predicate}");
                Fault::new(id.clone(), name, predicate, behavior)
            },
            None => Fault::compose(predicate, behavior),
        }
    }
}
