pub mod context;
mod descriptor;
pub mod signals;

pub use context::{
    activate, activate_any, activate_public, deactivate, get_current_schema, get_default_schema,
    with_schema, SchemaGuard,
};
pub use descriptor::{check_schema_name, is_valid_schema_name, quote_ident, Schema, PUBLIC_SCHEMA};
pub use signals::{schema_activate, ActivationChannel, ActivationEvent, SubscriptionId};
