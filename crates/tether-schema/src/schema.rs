//! Schema declaration and the load/dump pipeline.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tether_common::{ErrorMap, Result, TetherError};
use tether_orm::{BoundRelation, Db, Entity, Record};
use tracing::{debug, instrument};

use crate::field::{FieldSpec, Nested, NestedTarget};
use crate::marshal::{self, MISSING, NULL};
use crate::processors::{
    CheckForeignKeys, ComposeQuery, CountMatching, FetchPage, MaterializeInstance,
    NormalizePagination, Pagination, ResolveDumpRelations,
};
use crate::stage::{
    field_error, LoadResult, LoadState, Loaded, PostDump, PostLoad, PreDump, PreLoad,
    SchemaValidator, StageContext,
};

/// Run-wide pipeline switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Return the aggregate as `Err(TetherError::Validation)` instead of
    /// alongside the best-effort output.
    pub strict: bool,
    /// Skip the required-field check.
    pub partial: bool,
}

impl PipelineOptions {
    pub fn strict() -> Self {
        Self {
            strict: true,
            partial: false,
        }
    }

    pub fn with_partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }
}

/// Declared fields plus the ordered stage lists of one pipeline.
#[derive(Clone)]
pub struct Schema {
    name: String,
    entity: String,
    fields: Vec<FieldSpec>,
    only: Option<BTreeSet<String>>,
    options: PipelineOptions,
    pre_load: Vec<Arc<dyn PreLoad>>,
    schema_validators: Vec<Arc<dyn SchemaValidator>>,
    post_load: Vec<Arc<dyn PostLoad>>,
    pre_dump: Vec<Arc<dyn PreDump>>,
    post_dump: Vec<Arc<dyn PostDump>>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("entity", &self.entity)
            .field("fields", &self.fields.iter().map(FieldSpec::name).collect::<Vec<_>>())
            .field("only", &self.only)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Schema {
    pub fn builder(name: impl Into<String>, entity: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name, entity)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the entity type this schema loads and dumps.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Copy of this schema running with other options.
    pub fn with_options(&self, options: PipelineOptions) -> Schema {
        Schema {
            options,
            ..self.clone()
        }
    }

    /// Copy of this schema restricted to the named fields in both
    /// directions.
    pub fn only<I, S>(&self, names: I) -> Schema
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Schema {
            only: Some(names.into_iter().map(Into::into).collect()),
            ..self.clone()
        }
    }

    fn visible(&self, field: &FieldSpec) -> bool {
        self.only
            .as_ref()
            .map_or(true, |only| only.contains(field.name()))
    }

    pub fn load_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields
            .iter()
            .filter(move |f| f.loads() && self.visible(f))
    }

    /// Output fields, further restricted by a nested `only` list.
    pub fn dump_fields<'s>(
        &'s self,
        only: Option<&'s [String]>,
    ) -> impl Iterator<Item = &'s FieldSpec> {
        self.fields.iter().filter(move |f| {
            f.dumps()
                && self.visible(f)
                && only.map_or(true, |names| names.iter().any(|n| n == f.name()))
        })
    }

    pub(crate) fn nested_schema<'s>(&'s self, nested: &'s Nested) -> &'s Schema {
        match &nested.target {
            NestedTarget::This => self,
            NestedTarget::Schema(schema) => schema,
        }
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Runs the load pipeline over one raw input object.
    ///
    /// Validation-class failures are aggregated into the returned
    /// [`LoadResult`] (or returned as `Err(Validation)` when strict); any
    /// other failure aborts the run and is returned as is.
    #[instrument(skip(self, db, raw), fields(schema = %self.name))]
    pub async fn load(&self, db: &Db, raw: Record) -> Result<LoadResult> {
        let ctx = StageContext::new(db, self);
        let mut errors = ErrorMap::new();
        let data = self.run_load(&ctx, raw, &mut errors).await?;
        debug!(errors = errors.len(), "load finished");

        if !errors.is_empty() && self.options.strict {
            return Err(TetherError::Validation(errors));
        }
        Ok(LoadResult { data, errors })
    }

    /// Like [`Schema::load`], for input that may not be an object.
    pub async fn load_value(&self, db: &Db, raw: Value) -> Result<LoadResult> {
        match raw {
            Value::Object(map) => self.load(db, map).await,
            _ => {
                let mut errors = ErrorMap::new();
                errors.add_schema("Invalid input type.");
                if self.options.strict {
                    return Err(TetherError::Validation(errors));
                }
                Ok(LoadResult { data: None, errors })
            }
        }
    }

    async fn run_load(
        &self,
        ctx: &StageContext<'_>,
        raw: Record,
        errors: &mut ErrorMap,
    ) -> Result<Option<Loaded>> {
        let mut input = raw;
        for stage in &self.pre_load {
            input = match stage.process(ctx, input).await {
                Ok(next) => next,
                Err(err) => {
                    collect(errors, err)?;
                    return Ok(None);
                }
            };
        }

        let data = self.unmarshal(&input, errors);
        self.validate_fields(ctx, &data, errors).await?;

        let had_field_errors = !errors.is_empty();
        for validator in &self.schema_validators {
            if had_field_errors && validator.skip_on_field_errors() {
                continue;
            }
            if let Err(err) = validator.validate(ctx, &data).await {
                collect(errors, err)?;
            }
        }
        if !errors.is_empty() {
            return Ok(Some(Loaded::Data(data)));
        }

        let mut state = LoadState::new(data);
        for stage in &self.post_load {
            if let Err(err) = stage.process(ctx, &mut state).await {
                collect(errors, err)?;
                return Ok(None);
            }
        }
        Ok(Some(state.into_loaded()))
    }

    fn unmarshal(&self, input: &Record, errors: &mut ErrorMap) -> Record {
        let mut data = Record::new();
        for field in self.load_fields() {
            let name = field.name();
            match input.get(name) {
                None => {
                    if field.is_required() && !self.options.partial {
                        errors.add(name, MISSING);
                    }
                }
                Some(Value::Null) => {
                    if field.is_nullable() {
                        data.insert(name.to_string(), Value::Null);
                    } else {
                        errors.add(name, NULL);
                    }
                }
                Some(raw) => match marshal::unmarshal(field.kind(), raw) {
                    Ok(value) => {
                        data.insert(name.to_string(), value);
                    }
                    Err(message) => errors.add(name, message),
                },
            }
        }
        data
    }

    /// Runs every field validator concurrently, then folds the outcomes
    /// into `errors` from this task only.
    async fn validate_fields(
        &self,
        ctx: &StageContext<'_>,
        data: &Record,
        errors: &mut ErrorMap,
    ) -> Result<()> {
        let checks = self
            .load_fields()
            .filter_map(|field| match data.get(field.name()) {
                Some(Value::Null) | None => None,
                Some(value) => Some((field, value)),
            })
            .flat_map(move |(field, value)| {
                field.validators().iter().map(move |validator| async move {
                    let outcome = validator.validate(ctx, field.name(), value).await;
                    (field.name(), outcome)
                })
            });

        for (field, outcome) in join_all(checks).await {
            if let Err(err) = outcome {
                collect(errors, attribute_to(field, err))?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Dump
    // ========================================================================

    /// Serializes one entity, resolving the relations the output needs.
    pub async fn dump(&self, db: &Db, entity: &mut Entity) -> Result<Record> {
        let mut out = self.dump_many(db, std::slice::from_mut(entity)).await?;
        out.pop()
            .ok_or_else(|| TetherError::Internal("dump produced no output".into()))
    }

    /// Serializes a batch; relation resolution for all items runs as one
    /// concurrent batch and output order matches input order.
    #[instrument(skip(self, db, items), fields(schema = %self.name, items = items.len()))]
    pub async fn dump_many(&self, db: &Db, items: &mut [Entity]) -> Result<Vec<Record>> {
        let ctx = StageContext::new(db, self);
        for stage in &self.pre_dump {
            stage.process(&ctx, items).await?;
        }

        let mut out = items
            .iter()
            .map(|entity| self.marshal_entity(None, entity))
            .collect::<Result<Vec<_>>>()?;

        for record in out.iter_mut() {
            for stage in &self.post_dump {
                stage.process(&ctx, record).await?;
            }
        }
        Ok(out)
    }

    /// Serializes whatever a load run produced.
    pub async fn dump_loaded(&self, db: &Db, loaded: Loaded) -> Result<Value> {
        match loaded {
            Loaded::Data(data) => Ok(Value::Object(data)),
            Loaded::Count(n) => Ok(Value::from(n)),
            Loaded::Entity(mut entity) => Ok(Value::Object(self.dump(db, &mut entity).await?)),
            Loaded::Entities(mut entities) => {
                let out = self.dump_many(db, &mut entities).await?;
                Ok(Value::Array(out.into_iter().map(Value::Object).collect()))
            }
        }
    }

    pub(crate) fn marshal_entity(&self, only: Option<&[String]>, entity: &Entity) -> Result<Record> {
        let mut out = Record::new();
        for field in self.dump_fields(only) {
            let name = field.name();
            let value = match field.as_nested() {
                Some(nested) if entity.has_relation(name) => {
                    let target = self.nested_schema(nested);
                    let sub = nested.only.as_deref();
                    match entity.loaded(name)? {
                        BoundRelation::One(rel) => match rel.get()? {
                            Some(related) => Value::Object(target.marshal_entity(sub, related)?),
                            None => Value::Null,
                        },
                        BoundRelation::Many(rel) => Value::Array(
                            rel.get()?
                                .iter()
                                .map(|related| target.marshal_entity(sub, related).map(Value::Object))
                                .collect::<Result<_>>()?,
                        ),
                    }
                }
                _ => entity
                    .attribute(name)
                    .map(|value| marshal::marshal(field.kind(), value))
                    .unwrap_or(Value::Null),
            };
            out.insert(name.to_string(), value);
        }
        Ok(out)
    }
}

fn collect(errors: &mut ErrorMap, err: TetherError) -> Result<()> {
    match errors.absorb(err) {
        None => Ok(()),
        Some(other) => Err(other),
    }
}

/// Pins loosely-keyed validator errors to the field under validation.
fn attribute_to(field: &str, err: TetherError) -> TetherError {
    match err {
        TetherError::Schema(message) => field_error(field, message),
        TetherError::ForeignKeyNotFound { missing, .. } => TetherError::ForeignKeyNotFound {
            field: field.to_string(),
            missing,
        },
        other => other,
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`Schema`]. Stages run in registration order.
pub struct SchemaBuilder {
    name: String,
    entity: String,
    fields: Vec<FieldSpec>,
    options: PipelineOptions,
    resolve_relations: bool,
    pre_load: Vec<Arc<dyn PreLoad>>,
    schema_validators: Vec<Arc<dyn SchemaValidator>>,
    post_load: Vec<Arc<dyn PostLoad>>,
    pre_dump: Vec<Arc<dyn PreDump>>,
    post_dump: Vec<Arc<dyn PostDump>>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity: entity.into(),
            fields: Vec::new(),
            options: PipelineOptions::default(),
            resolve_relations: true,
            pre_load: Vec::new(),
            schema_validators: Vec::new(),
            post_load: Vec::new(),
            pre_dump: Vec::new(),
            post_dump: Vec::new(),
        }
    }

    /// Adds a field, replacing an earlier one of the same name in place.
    pub fn field(mut self, field: FieldSpec) -> Self {
        match self.fields.iter_mut().find(|f| f.name() == field.name()) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    pub fn fields(self, fields: impl IntoIterator<Item = FieldSpec>) -> Self {
        fields.into_iter().fold(self, SchemaBuilder::field)
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn strict(mut self) -> Self {
        self.options.strict = true;
        self
    }

    /// Leaves relation resolution before marshal to the caller.
    pub fn without_relation_resolution(mut self) -> Self {
        self.resolve_relations = false;
        self
    }

    pub fn pre_load(mut self, stage: impl PreLoad + 'static) -> Self {
        self.pre_load.push(Arc::new(stage));
        self
    }

    pub fn validate_schema(mut self, validator: impl SchemaValidator + 'static) -> Self {
        self.schema_validators.push(Arc::new(validator));
        self
    }

    pub fn post_load(mut self, stage: impl PostLoad + 'static) -> Self {
        self.post_load.push(Arc::new(stage));
        self
    }

    pub fn pre_dump(mut self, stage: impl PreDump + 'static) -> Self {
        self.pre_dump.push(Arc::new(stage));
        self
    }

    pub fn post_dump(mut self, stage: impl PostDump + 'static) -> Self {
        self.post_dump.push(Arc::new(stage));
        self
    }

    /// Paged listing: `limit`/`offset`/`page`/`per_page` inputs, the
    /// pagination check, then normalize, compose and fetch.
    pub fn paginated(self, query: ComposeQuery) -> Self {
        self.fields([
            FieldSpec::integer("limit").load_only(),
            FieldSpec::integer("offset").load_only(),
            FieldSpec::integer("page").load_only(),
            FieldSpec::integer("per_page").load_only(),
        ])
        .validate_schema(Pagination)
        .post_load(NormalizePagination)
        .post_load(query)
        .post_load(FetchPage)
    }

    /// Counting: compose the query and count matches.
    pub fn counted(self, query: ComposeQuery) -> Self {
        self.post_load(query).post_load(CountMatching)
    }

    /// Detail: key checks followed by create-or-update with linking.
    pub fn materialized(self) -> Self {
        self.post_load(CheckForeignKeys).post_load(MaterializeInstance)
    }

    pub fn build(self) -> Schema {
        let mut pre_dump = self.pre_dump;
        if self.resolve_relations {
            pre_dump.insert(0, Arc::new(ResolveDumpRelations));
        }
        Schema {
            name: self.name,
            entity: self.entity,
            fields: self.fields,
            only: None,
            options: self.options,
            pre_load: self.pre_load,
            schema_validators: self.schema_validators,
            post_load: self.post_load,
            pre_dump,
            post_dump: self.post_dump,
        }
    }
}
