//! PostgreSQL repositories. All writes go through these; entities are
//! plain records and relationships are resolved by explicit joins.

mod artifacts;
mod audit;
mod mappings;
mod queue;
mod sessions;
mod staff;

pub use artifacts::{ArtifactPage, ArtifactsRepository, ListFilter, TupleProbe};
pub use audit::AuditRepository;
pub use mappings::MappingsRepository;
pub use queue::QueueRepository;
pub use sessions::SessionsRepository;
pub use staff::StaffRepository;
