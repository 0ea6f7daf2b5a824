//! Async validate/transform pipeline between request payloads and entities.
//!
//! A [`Schema`] declares fields and ordered stage lists. `load` turns a raw
//! object into validated data and, through post-load processors, into
//! entities, pages or counts; `dump` resolves the relations its output
//! declares and serializes entities back to objects.
//!
//! # Example
//!
//! ```ignore
//! use tether_schema::{FieldSpec, Schema, processors::AncestorCycleCheck};
//!
//! let schema = Schema::builder("CateDetail", "Categories")
//!     .field(FieldSpec::integer("id").key_check("Categories"))
//!     .field(FieldSpec::integer("parent_id").load_only())
//!     .field(FieldSpec::string("name").required())
//!     .field(FieldSpec::nested_self("children").many().only(["id", "name"]).dump_only())
//!     .validate_schema(AncestorCycleCheck::default())
//!     .materialized()
//!     .build();
//!
//! let result = schema.load(&db, raw).await?;
//! ```

pub mod field;
pub mod marshal;
pub mod processors;
pub mod schema;
pub mod stage;
pub mod validators;

pub use field::{FieldKind, FieldSpec, Nested, NestedTarget, QueryOp};
pub use schema::{PipelineOptions, Schema, SchemaBuilder};
pub use stage::{
    field_error, FieldValidator, LoadResult, LoadState, Loaded, PendingLink, PostDump, PostLoad,
    PreDump, PreLoad, SchemaValidator, StageContext,
};
pub use tether_common::{ErrorMap, Result, TetherError};
