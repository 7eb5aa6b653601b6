pub mod cascade;
pub mod context;
pub mod hooks;
pub mod pagination;
pub mod query_params;
pub mod use_case;
pub mod validate;

pub use context::{AppContext, RequestContext, Settings, TxOutcome};
pub use hooks::{AuditSink, HookDispatcher, HookEvent, LogAuditSink};
pub use pagination::{Links, PageContext};
pub use query_params::{ListQuery, QueryParams};
pub use use_case::{UseCase, WriteMode};
pub use validate::{validate_payload, Action, ValidPayload};
