//! tgdigest Pipeline - Stages, Gates and Orchestration
//!
//! A run walks the stage machine (segmentation, emotion, roles, topics,
//! synthesis, evaluation), validating every model output against its stage
//! contract. The quality gate and delivery authorizer then decide the
//! delivery status, and every failure leaves a dead-letter record.

pub mod baseline;
pub mod contracts;
pub mod dead_letter;
pub mod delivery;
pub mod machine;
pub mod orchestrator;
pub mod pool;
pub mod quality;
pub mod stages;
pub mod variables;

pub use baseline::{BaselineDigest, BaselineStore, InMemoryBaselineStore};
pub use dead_letter::{
    DeadLetterEmitter, DeadLetterSink, InMemoryDeadLetterSink, LogDeadLetterSink, RunIdentity,
};
pub use delivery::{Authorization, DeliveryAuthorizer};
pub use machine::StageMachine;
pub use orchestrator::Orchestrator;
pub use pool::{DigestJob, DigestPool};
pub use quality::{QualityGate, QualityVerdict};
pub use stages::{StageError, StageFailure, StageLedger, StageRunner};
pub use variables::StageOutputs;
