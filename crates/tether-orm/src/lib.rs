//! Relationship resolution over row-backed entities.
//!
//! Entity types are declared on a [`RegistryBuilder`]; relation descriptors
//! are resolved once into concrete foreign keys when the [`Registry`] is
//! built. Each [`Entity`] carries lazily-bound relation handles that issue a
//! single query on `resolve()` and cache the result until [`Entity::rebind`].
//!
//! Storage sits behind the [`Store`] trait, with an in-memory backend for
//! tests and a PostgreSQL backend in [`pg`].

pub mod db;
pub mod entity;
pub mod filter;
pub mod memory;
pub mod pg;
pub mod record;
pub mod registry;
pub mod relation;
pub mod store;

pub use db::Db;
pub use entity::Entity;
pub use filter::{Filter, Order, Select};
pub use memory::MemoryStore;
pub use record::{record_id, Record, PRIMARY_KEY};
pub use registry::{
    ColumnDef, ColumnDefault, ColumnKind, EntityDecl, EntityType, ForeignKeyRef, JoinSpec,
    Registry, RegistryBuilder, RelationDescriptor, RelationKind, ResolvedRelation,
};
pub use relation::{BoundRelation, Resolution, ToMany, ToOne};
pub use store::{Store, Transaction, TransactionScope};
pub use tether_common::{Result, TetherError};
