//! Request-time services: list-query parsing, payload validation and the session-backed CRUD pipeline.

mod crud;
pub mod query;
mod validation;
pub use crud::{payload_preview, record_not_found, CrudService, Operation, Outcome};
pub use query::{parse_list_params, take_pagination, ListParams};
pub use validation::RequestValidator;
