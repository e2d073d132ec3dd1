//! Schema Context
//!
//! Tracks the active schema per execution unit. Inside [`scope`] (or
//! [`sync_scope`]) the slot is local to the tokio task; anywhere else it is
//! local to the calling OS thread. Async code that activates schemas must
//! run inside a scope, since a multi-threaded runtime may resume a task on a
//! different thread after any `.await`.

use crate::error::{Result, TenancyError};
use crate::schema::signals::schema_activate;
use crate::schema::Schema;
use std::any::Any;
use std::cell::RefCell;
use std::future::Future;
use tracing::error;

tokio::task_local! {
    static ACTIVE: RefCell<Option<Schema>>;
}

thread_local! {
    static THREAD_ACTIVE: RefCell<Option<Schema>> = const { RefCell::new(None) };
}

fn read_slot() -> Option<Schema> {
    ACTIVE
        .try_with(|slot| slot.borrow().clone())
        .unwrap_or_else(|_| THREAD_ACTIVE.with(|slot| slot.borrow().clone()))
}

fn write_slot(value: Option<Schema>) {
    let mut pending = Some(value);
    let _ = ACTIVE.try_with(|slot| *slot.borrow_mut() = pending.take().flatten());
    if let Some(value) = pending {
        THREAD_ACTIVE.with(|slot| *slot.borrow_mut() = value);
    }
}

/// Run `fut` as its own execution unit, starting from `initial` (usually `None`).
pub fn scope<F>(initial: Option<Schema>, fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    ACTIVE.scope(RefCell::new(initial), fut)
}

/// Synchronous counterpart of [`scope`].
pub fn sync_scope<F, R>(initial: Option<Schema>, f: F) -> R
where
    F: FnOnce() -> R,
{
    ACTIVE.sync_scope(RefCell::new(initial), f)
}

/// The shared schema, used whenever nothing is active.
pub fn get_default_schema() -> Schema {
    Schema::public()
}

/// The schema active in this execution unit, or the default.
pub fn get_current_schema() -> Schema {
    read_slot().unwrap_or_else(get_default_schema)
}

/// The raw slot: `None` when nothing was activated (or after `deactivate`).
pub fn active_schema() -> Option<Schema> {
    read_slot()
}

/// Make `schema` current and notify subscribers.
///
/// The slot is updated before subscribers run and stays updated if one fails.
pub fn activate(schema: Schema) -> Result<()> {
    write_slot(Some(schema.clone()));
    schema_activate().send(&schema)
}

/// Activate a type-erased value, which must be a [`Schema`].
pub fn activate_any(value: &dyn Any) -> Result<()> {
    match value.downcast_ref::<Schema>() {
        Some(schema) => activate(schema.clone()),
        None => Err(TenancyError::TypeKind { expected: "Schema" }),
    }
}

/// Clear the slot and notify subscribers with the default schema.
pub fn deactivate() -> Result<()> {
    write_slot(None);
    schema_activate().send(&get_default_schema())
}

pub fn activate_public() -> Result<()> {
    deactivate()
}

/// Await `fut` with `schema` active, restoring the previous schema afterwards.
pub async fn with_schema<F>(schema: &Schema, fut: F) -> Result<F::Output>
where
    F: Future,
{
    let guard = schema.enter()?;
    let output = fut.await;
    guard.exit()?;
    Ok(output)
}

/// Scoped activation. Dropping the guard restores whatever was active when
/// it was created, on every exit path.
///
/// A guard must be dropped in the execution unit that created it.
#[must_use = "the previous schema is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SchemaGuard {
    previous: Option<Schema>,
    restored: bool,
}

impl SchemaGuard {
    /// Schema that will be restored, `None` meaning the default.
    pub fn previous(&self) -> Option<&Schema> {
        self.previous.as_ref()
    }

    /// Restore now, surfacing subscriber errors instead of logging them.
    pub fn exit(mut self) -> Result<()> {
        self.restore()
    }

    fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;

        match self.previous.take() {
            Some(previous) => activate(previous),
            None => deactivate(),
        }
    }
}

impl Drop for SchemaGuard {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            error!("Schema restored but a subscriber failed: {}", e);
        }
    }
}

impl Schema {
    /// Activate this schema until the returned guard is dropped.
    pub fn enter(&self) -> Result<SchemaGuard> {
        let guard = SchemaGuard {
            previous: read_slot(),
            restored: false,
        };
        // On a subscriber failure the guard drops here and restores.
        activate(self.clone())?;
        Ok(guard)
    }
}
