pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod iteration;
pub mod metadata;

pub use domain::counters::{IterationCategory, IterationCounters, IterationLimits};
pub use domain::packet::{
    ExtractedRequirements, HistoryEntry, HistoryRole, IntakePacket, InternalOption,
    InventorySnapshot, PacketError, ProductDetails,
};
pub use domain::result::{
    AgentLabel, CssClass, InventoryCheck, OrchestratorResult, ResultStatus, SpecialistResult,
};
pub use domain::specialist::{SpecialistKind, SpecialistRequest};
pub use domain::state::{ConversationState, InsuranceStatus, OverallStatus, ProductStatus, Routing};
pub use errors::{ApplicationError, InterfaceError, ProtocolError};
pub use flows::{StateEngine, TransitionError};
pub use iteration::{IterationGuard, LimitExceeded};
pub use metadata::{parse_state_block, parse_state_block_over, strip_state_block};
