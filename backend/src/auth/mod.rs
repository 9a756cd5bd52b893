//! Caller identity and per-table authorization.
//!
//! Authentication itself (login, token issuance) is handled by an upstream
//! service; requests reach this engine with a signed bearer token.

pub mod jwt;
pub mod middleware;
pub mod rbac;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use middleware::AuthUser;
pub use rbac::{PermissionChecker, TableOp, WorkflowTable};

/// Who is making a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub user_id: Uuid,
    pub role_ids: Vec<Uuid>,
}

impl CallerIdentity {
    pub fn new(user_id: Uuid, role_ids: Vec<Uuid>) -> Self {
        Self { user_id, role_ids }
    }
}
