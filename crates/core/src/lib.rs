pub mod audit;
pub mod config;
pub mod exclusive;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod reconcile;
pub mod scene;
pub mod testing;
pub mod ticket;

pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditEventEnvelope, AuditFilter, AuditHandle,
    AuditRecord, AuditStore, AuditWriter, SqliteAuditStore,
};
pub use config::{
    config_path, load_config, load_config_from_str, validate_config, Config, ConfigError,
    DatabaseConfig, PipelineConfig, SanitizedConfig, ServerConfig,
};
pub use exclusive::{
    Admission, ExclusiveError, ExclusiveKey, ExclusivityCoordinator, InMemoryLockTable, LockEntry,
    LockTable, SqliteLockTable,
};
pub use orchestrator::{
    CallbackOutcome, FlowChange, OrchestratorConfig, OrchestratorError, OrchestratorStatus,
    RetryReport, TicketFlowManager, TicketUpdateCallback,
};
pub use pipeline::{
    HttpPipelineRunner, NodeStatus, PipelineCallback, PipelineError, PipelineRunner, RunHandle,
};
pub use reconcile::{
    ChecksumReport, ReconcileError, Reconciler, ReconciliationScheduler, RepairReport,
    RepairSource, SchedulerConfig, SqliteChecksumReports,
};
pub use scene::{plan_flows, SceneController, SceneError, StepGraph, ValidationError};
pub use ticket::{
    CreateTicketRequest, Flow, FlowError, FlowErrorKind, FlowStatus, SqliteTicketStore, Ticket,
    TicketError, TicketFilter, TicketStatus, TicketStore, TicketType,
};
