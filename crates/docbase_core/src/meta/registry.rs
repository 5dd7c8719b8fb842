//! The registry resolving definitions into [`Meta`]s.

use super::builtin;
use super::definition::MetaDefinition;
use super::field::{DefaultFn, Field, FieldDefinition, Formula, ValidatorFn};
use super::fieldtype::{ColumnType, FieldType, TypeMap};
use super::standard;
use super::Meta;
use crate::config::Config;
use crate::database::Record;
use crate::document::{Controller, Document};
use crate::error::{CoreError, CoreResult};
use crate::util::is_identifier;
use crate::validators;
use docbase_storage::Value;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Registry-wide settings that influence resolution and documents.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Server mode (see [`Config::is_server`]).
    pub is_server: bool,
    /// Precision applied to float and currency fields without their own.
    pub float_precision: u32,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            is_server: true,
            float_precision: 2,
        }
    }
}

impl From<&Config> for RegistrySettings {
    fn from(config: &Config) -> Self {
        Self {
            is_server: config.is_server,
            float_precision: config.float_precision,
        }
    }
}

type FieldKey = (String, String);

#[derive(Default)]
struct Functions {
    formulas: HashMap<FieldKey, Formula>,
    defaults: HashMap<FieldKey, DefaultFn>,
    validators: HashMap<String, ValidatorFn>,
    controllers: HashMap<String, Arc<dyn Controller>>,
}

impl Functions {
    fn formula(&self, doctype: &str, base: Option<&str>, fieldname: &str) -> Option<Formula> {
        lookup(&self.formulas, doctype, base, fieldname)
    }

    fn default_fn(&self, doctype: &str, base: Option<&str>, fieldname: &str) -> Option<DefaultFn> {
        lookup(&self.defaults, doctype, base, fieldname)
    }

    fn controller(&self, doctype: &str, base: Option<&str>) -> Option<Arc<dyn Controller>> {
        self.controllers
            .get(doctype)
            .or_else(|| base.and_then(|b| self.controllers.get(b)))
            .cloned()
    }
}

fn lookup<T: Clone>(
    map: &HashMap<FieldKey, T>,
    doctype: &str,
    base: Option<&str>,
    fieldname: &str,
) -> Option<T> {
    map.get(&(doctype.to_string(), fieldname.to_string()))
        .or_else(|| base.and_then(|b| map.get(&(b.to_string(), fieldname.to_string()))))
        .cloned()
}

/// Validated, cached entity definitions.
///
/// Definitions are registered up front (by code or from stored `DocType`
/// rows); each is resolved into a [`Meta`] on first use and cached until
/// [`MetaRegistry::reload`] evicts it.
///
/// # Thread Safety
///
/// All state sits behind `RwLock`s. Resolution happens without holding any
/// of them, so resolving one entity may look up others.
pub struct MetaRegistry {
    settings: RegistrySettings,
    definitions: RwLock<IndexMap<String, MetaDefinition>>,
    cache: RwLock<HashMap<String, Arc<Meta>>>,
    type_map: RwLock<TypeMap>,
    functions: RwLock<Functions>,
}

impl MetaRegistry {
    /// Creates a registry with no entities and the built-in validators.
    #[must_use]
    pub fn new(settings: RegistrySettings) -> Self {
        let mut functions = Functions::default();
        functions
            .validators
            .insert("email".to_string(), Arc::new(validators::email));
        functions
            .validators
            .insert("phone".to_string(), Arc::new(validators::phone));

        Self {
            settings,
            definitions: RwLock::new(IndexMap::new()),
            cache: RwLock::new(HashMap::new()),
            type_map: RwLock::new(TypeMap::default()),
            functions: RwLock::new(functions),
        }
    }

    /// Creates a registry with the built-in entities (`DocType`,
    /// `DocField`, `FieldType`, `NumberSeries`, `PatchRun`).
    #[must_use]
    pub fn with_builtins(settings: RegistrySettings) -> Self {
        let registry = Self::new(settings);
        {
            let mut definitions = registry.definitions.write();
            for def in builtin::definitions() {
                definitions.insert(def.name.clone(), def);
            }
        }
        registry.register_formula(builtin::DOCFIELD, "fieldname", builtin::docfield_fieldname);
        registry
    }

    /// Registry settings.
    #[must_use]
    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Server mode.
    #[must_use]
    pub fn is_server(&self) -> bool {
        self.settings.is_server
    }

    /// Default float precision.
    #[must_use]
    pub fn float_precision(&self) -> u32 {
        self.settings.float_precision
    }

    /// Adds or replaces a definition.
    ///
    /// The definition is validated when it is first resolved.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Schema` if the entity name is not an identifier.
    pub fn register(&self, definition: MetaDefinition) -> CoreResult<()> {
        if !is_identifier(&definition.name) {
            return Err(CoreError::schema(format!(
                "invalid doctype name \"{}\"",
                definition.name
            )));
        }
        let name = definition.name.clone();
        self.definitions.write().insert(name.clone(), definition);
        self.invalidate(&name);
        debug!(doctype = %name, "registered definition");
        Ok(())
    }

    /// Registers a formula for `doctype.fieldname`.
    pub fn register_formula<F>(&self, doctype: &str, fieldname: &str, formula: F)
    where
        F: Fn(&Document, Option<&Document>) -> Value + Send + Sync + 'static,
    {
        let formula: Formula = Arc::new(formula);
        self.functions
            .write()
            .formulas
            .insert((doctype.to_string(), fieldname.to_string()), formula);
        self.invalidate(doctype);
    }

    /// Registers a computed default for `doctype.fieldname`.
    pub fn register_default<F>(&self, doctype: &str, fieldname: &str, default: F)
    where
        F: Fn(&Document) -> Value + Send + Sync + 'static,
    {
        let default: DefaultFn = Arc::new(default);
        self.functions
            .write()
            .defaults
            .insert((doctype.to_string(), fieldname.to_string()), default);
        self.invalidate(doctype);
    }

    /// Registers a named validator.
    pub fn register_validator<F>(&self, name: &str, validator: F)
    where
        F: Fn(&Value, &Document) -> Result<(), String> + Send + Sync + 'static,
    {
        let validator: ValidatorFn = Arc::new(validator);
        self.functions
            .write()
            .validators
            .insert(name.to_string(), validator);
        self.cache.write().clear();
    }

    /// Registers the lifecycle controller of a doctype.
    pub fn register_controller<C>(&self, doctype: &str, controller: C)
    where
        C: Controller + 'static,
    {
        let controller: Arc<dyn Controller> = Arc::new(controller);
        self.functions
            .write()
            .controllers
            .insert(doctype.to_string(), controller);
        self.invalidate(doctype);
    }

    /// Registers a custom scalar field type.
    pub fn register_fieldtype(&self, fieldtype: FieldType, column: ColumnType) {
        self.type_map.write().register(fieldtype, column);
        self.cache.write().clear();
    }

    /// Known field types with their column type.
    #[must_use]
    pub fn fieldtypes(&self) -> Vec<(FieldType, Option<ColumnType>)> {
        self.type_map.read().entries()
    }

    /// Returns true if a definition with this name exists.
    #[must_use]
    pub fn is_registered(&self, doctype: &str) -> bool {
        self.definitions.read().contains_key(doctype)
    }

    /// Registered doctype names in registration order.
    #[must_use]
    pub fn doctypes(&self) -> Vec<String> {
        self.definitions.read().keys().cloned().collect()
    }

    /// The definition as registered, before inheritance is merged.
    #[must_use]
    pub fn definition(&self, doctype: &str) -> Option<MetaDefinition> {
        self.definitions.read().get(doctype).cloned()
    }

    /// Returns the resolved meta of a doctype.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for an unknown doctype and
    /// `CoreError::Schema` for a broken definition.
    pub fn get_meta(&self, doctype: &str) -> CoreResult<Arc<Meta>> {
        if let Some(meta) = self.cache.read().get(doctype) {
            return Ok(Arc::clone(meta));
        }

        let meta = Arc::new(self.resolve(doctype)?);
        debug!(doctype, "resolved meta");
        self.cache
            .write()
            .insert(doctype.to_string(), Arc::clone(&meta));
        Ok(meta)
    }

    /// Resolves every registered doctype.
    ///
    /// # Errors
    ///
    /// Returns the first resolution error.
    pub fn validate_all(&self) -> CoreResult<usize> {
        let doctypes = self.doctypes();
        for doctype in &doctypes {
            self.get_meta(doctype)?;
        }
        Ok(doctypes.len())
    }

    /// Evicts a cached meta so the next lookup re-resolves it.
    pub fn reload(&self, doctype: &str) {
        self.invalidate(doctype);
        debug!(doctype, "meta evicted");
    }

    /// Registers stored `DocType` records that are not registered yet and
    /// validates them. Returns the names that were added.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be converted or fails validation.
    pub fn load_stored(&self, records: &[Record]) -> CoreResult<Vec<String>> {
        let mut loaded = Vec::new();
        for record in records {
            let definition = MetaDefinition::from_record(record)?;
            if definition.name.is_empty() || self.is_registered(&definition.name) {
                continue;
            }
            loaded.push(definition.name.clone());
            self.register(definition)?;
        }
        for doctype in &loaded {
            self.get_meta(doctype)?;
        }
        if !loaded.is_empty() {
            info!(count = loaded.len(), "loaded stored doctypes");
        }
        Ok(loaded)
    }

    /// The definition after `based_on` inheritance.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for an unknown doctype and
    /// `CoreError::Schema` for a missing or circular base.
    pub fn merged_definition(&self, doctype: &str) -> CoreResult<MetaDefinition> {
        let mut chain: Vec<MetaDefinition> = Vec::new();
        let mut current = doctype.to_string();
        loop {
            let found = self.definitions.read().get(&current).cloned();
            let Some(definition) = found else {
                return Err(match chain.last() {
                    None => CoreError::not_found("DocType", doctype),
                    Some(derived) => CoreError::schema(format!(
                        "{}: based_on \"{current}\" is not registered",
                        derived.name
                    )),
                });
            };
            if chain.iter().any(|d| d.name == definition.name) {
                return Err(CoreError::schema(format!(
                    "{doctype}: circular based_on through \"{}\"",
                    definition.name
                )));
            }
            let next = definition.based_on.clone().filter(|b| !b.is_empty());
            chain.push(definition);
            match next {
                Some(base) => current = base,
                None => break,
            }
        }

        let Some(mut merged) = chain.pop() else {
            return Err(CoreError::not_found("DocType", doctype));
        };
        merged.based_on = None;
        while let Some(derived) = chain.pop() {
            merged = merged.merged_with(&derived)?;
        }
        Ok(merged)
    }

    fn resolve(&self, doctype: &str) -> CoreResult<Meta> {
        let definition = self.merged_definition(doctype)?;
        self.validate_definition(&definition)?;

        let mut seen = HashSet::new();
        let has_formula = self.subtree_has_formula(doctype, &mut seen)?;
        let type_map = self.type_map.read().clone();
        let functions = self.functions.read();
        let base = definition.based_on.as_deref();
        let precision = self.settings.float_precision;

        let attach = |mut definition: super::field::FieldDefinition| -> CoreResult<Field> {
            if matches!(definition.fieldtype, FieldType::Float | FieldType::Currency)
                && definition.precision.is_none()
            {
                definition.precision = Some(precision);
            }
            let mut field = Field::new(definition);
            field.formula = functions.formula(doctype, base, &field.fieldname);
            field.default_fn = functions.default_fn(doctype, base, &field.fieldname);
            if let Some(name) = field.validator.as_deref() {
                let validator = functions.validators.get(name).cloned().ok_or_else(|| {
                    CoreError::schema(format!(
                        "{doctype}: validator \"{name}\" of field \"{}\" is not registered",
                        field.fieldname
                    ))
                })?;
                field.validator_fn = Some(validator);
            }
            Ok(field)
        };

        let mut fields = Vec::with_capacity(definition.fields.len() + 1);
        match definition.get_field(standard::NAME) {
            Some(declared) => {
                let mut name = declared.clone();
                name.required = true;
                fields.push(attach(name)?);
            }
            None if !definition.is_single => fields.push(attach(standard::name_field())?),
            None => {}
        }
        for declared in &definition.fields {
            if declared.fieldname != standard::NAME {
                fields.push(attach(declared.clone())?);
            }
        }
        let implicit = standard::implicit_fields(&definition)
            .into_iter()
            .map(Field::new)
            .collect();
        let controller = functions.controller(doctype, base);
        drop(functions);

        Ok(Meta::assemble(
            definition,
            fields,
            implicit,
            &type_map,
            has_formula,
            controller,
        ))
    }

    fn subtree_has_formula(&self, doctype: &str, seen: &mut HashSet<String>) -> CoreResult<bool> {
        if !seen.insert(doctype.to_string()) {
            return Ok(false);
        }
        let definition = self.merged_definition(doctype)?;
        let base = definition.based_on.as_deref();
        let own = {
            let functions = self.functions.read();
            definition
                .fields
                .iter()
                .any(|f| functions.formula(doctype, base, &f.fieldname).is_some())
        };
        if own {
            return Ok(true);
        }
        for field in &definition.fields {
            if let Some(child) = field.child_doctype() {
                if self.is_registered(child) && self.subtree_has_formula(child, seen)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Checks a merged definition against the registry.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Schema` describing the first problem found.
    pub fn validate_definition(&self, definition: &MetaDefinition) -> CoreResult<()> {
        let doctype = &definition.name;
        if !is_identifier(doctype) {
            return Err(CoreError::schema(format!("invalid doctype name \"{doctype}\"")));
        }

        let type_map = self.type_map.read().clone();
        let mut declared: HashSet<&str> = HashSet::new();
        for (i, field) in definition.fields.iter().enumerate() {
            let fieldname = field.fieldname.as_str();
            if fieldname.is_empty() {
                return Err(CoreError::schema(format!(
                    "DocType {doctype}: \"fieldname\" is required at index {}",
                    i + 1
                )));
            }
            if !is_identifier(fieldname) {
                return Err(CoreError::schema(format!(
                    "DocType {doctype}: invalid fieldname \"{fieldname}\""
                )));
            }
            if field.fieldtype.as_str().is_empty() {
                return Err(CoreError::schema(format!(
                    "DocType {doctype}: \"fieldtype\" is required for field {fieldname}"
                )));
            }
            if !type_map.is_known(&field.fieldtype) {
                return Err(CoreError::schema(format!(
                    "DocType {doctype}: unknown fieldtype \"{}\" for field {fieldname}",
                    field.fieldtype
                )));
            }
            if !declared.insert(fieldname) {
                return Err(CoreError::schema(format!(
                    "DocType {doctype}: duplicate field \"{fieldname}\""
                )));
            }
            if fieldname != standard::NAME && standard::is_implicit(definition, fieldname) {
                return Err(CoreError::schema(format!(
                    "DocType {doctype}: field \"{fieldname}\" clashes with a standard field"
                )));
            }

            if field.fieldtype.is_structural() {
                let child = field.child_doctype().filter(|c| !c.is_empty()).ok_or_else(|| {
                    CoreError::schema(format!(
                        "DocType {doctype}: field {fieldname} needs a child doctype"
                    ))
                })?;
                let child_def = self.merged_definition(child).map_err(|_| {
                    CoreError::schema(format!(
                        "DocType {doctype}: child doctype \"{child}\" of field {fieldname} is not registered"
                    ))
                })?;
                if !child_def.is_child {
                    return Err(CoreError::schema(format!(
                        "DocType {doctype}: \"{child}\" used by field {fieldname} is not a child doctype"
                    )));
                }
            }
            if let Some(target) = field.link_target() {
                if !self.is_registered(target) {
                    return Err(CoreError::schema(format!(
                        "DocType {doctype}: link target \"{target}\" of field {fieldname} is not registered"
                    )));
                }
            }
        }

        let exists = |fieldname: &str| {
            declared.contains(fieldname) || standard::is_implicit(definition, fieldname)
        };
        for fieldname in &definition.keyword_fields {
            if !exists(fieldname) {
                return Err(CoreError::schema(format!(
                    "DocType {doctype}: keyword field \"{fieldname}\" does not exist"
                )));
            }
        }
        for fieldname in definition.filters.keys() {
            if !exists(fieldname) {
                return Err(CoreError::schema(format!(
                    "DocType {doctype}: filter field \"{fieldname}\" does not exist"
                )));
            }
        }
        if let Some(title) = definition.title_field.as_deref() {
            if !exists(title) {
                return Err(CoreError::schema(format!(
                    "DocType {doctype}: title field \"{title}\" does not exist"
                )));
            }
        }
        Ok(())
    }

    /// Evicts `doctype` and every doctype that reaches it through declared
    /// `based_on` or child doctype edges, at any depth.
    fn invalidate(&self, doctype: &str) {
        let mut affected = HashSet::from([doctype.to_string()]);
        {
            let definitions = self.definitions.read();
            loop {
                let before = affected.len();
                for (name, definition) in definitions.iter() {
                    if affected.contains(name) {
                        continue;
                    }
                    let based = definition
                        .based_on
                        .as_ref()
                        .is_some_and(|base| affected.contains(base));
                    let nests = definition
                        .fields
                        .iter()
                        .filter_map(FieldDefinition::child_doctype)
                        .any(|child| affected.contains(child));
                    if based || nests {
                        affected.insert(name.clone());
                    }
                }
                if affected.len() == before {
                    break;
                }
            }
        }
        self.cache.write().retain(|name, _| !affected.contains(name));
    }
}

impl std::fmt::Debug for MetaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaRegistry")
            .field("settings", &self.settings)
            .field("doctypes", &self.doctypes())
            .field("cached", &self.cache.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{FieldDefinition, Naming};
    use docbase_storage::Row;

    fn registry() -> MetaRegistry {
        MetaRegistry::with_builtins(RegistrySettings::default())
    }

    fn names(fields: Vec<&Field>) -> Vec<&str> {
        fields.into_iter().map(|f| f.fieldname.as_str()).collect()
    }

    fn invoice_schema(registry: &MetaRegistry) {
        registry
            .register(
                MetaDefinition::new("InvoiceItem")
                    .child()
                    .field(FieldDefinition::new("item", FieldType::Data).required())
                    .field(FieldDefinition::new("qty", FieldType::Float))
                    .field(FieldDefinition::new("rate", FieldType::Currency))
                    .field(FieldDefinition::new("amount", FieldType::Currency).read_only()),
            )
            .unwrap();
        registry
            .register(
                MetaDefinition::new("Invoice")
                    .submittable()
                    .field(FieldDefinition::new("customer", FieldType::Data).required())
                    .field(
                        FieldDefinition::new("items", FieldType::Table).childtype("InvoiceItem"),
                    )
                    .field(FieldDefinition::new("total", FieldType::Currency).precision(3)),
            )
            .unwrap();
    }

    #[test]
    fn valid_fields_order() {
        let registry = registry();
        invoice_schema(&registry);

        let invoice = registry.get_meta("Invoice").unwrap();
        assert_eq!(
            names(invoice.valid_fields(true)),
            vec![
                "name",
                "submitted",
                "owner",
                "modified_by",
                "creation",
                "modified",
                "keywords",
                "customer",
                "total",
                "items"
            ]
        );
        assert!(!invoice.valid_fieldnames(false).contains(&"items".to_string()));

        let item = registry.get_meta("InvoiceItem").unwrap();
        assert_eq!(
            names(item.valid_fields(false)),
            vec!["name", "idx", "parent", "parenttype", "parentfield", "item", "qty", "rate", "amount"]
        );
    }

    #[test]
    fn default_precision_applies_to_float_and_currency() {
        let registry = registry();
        invoice_schema(&registry);
        let item = registry.get_meta("InvoiceItem").unwrap();
        assert_eq!(item.get_field("qty").unwrap().precision, Some(2));
        assert_eq!(item.get_field("rate").unwrap().precision, Some(2));
        let invoice = registry.get_meta("Invoice").unwrap();
        assert_eq!(invoice.get_field("total").unwrap().precision, Some(3));
        assert_eq!(invoice.column_type("total"), Some(ColumnType::Real));
        assert_eq!(invoice.column_type("items"), None);
    }

    #[test]
    fn has_formula_is_transitive() {
        let registry = registry();
        invoice_schema(&registry);
        assert!(!registry.get_meta("Invoice").unwrap().has_formula());

        registry.register_formula("InvoiceItem", "amount", |_, _| Value::Null);
        assert!(registry.get_meta("InvoiceItem").unwrap().has_formula());
        assert!(registry.get_meta("Invoice").unwrap().has_formula());
        assert_eq!(
            registry.get_meta("InvoiceItem").unwrap().formula_fields().len(),
            1
        );
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let registry = registry();
        registry
            .register(
                MetaDefinition::new("Note")
                    .field(FieldDefinition::new("title", FieldType::Data))
                    .field(FieldDefinition::new("title", FieldType::Text)),
            )
            .unwrap();
        let err = registry.get_meta("Note").unwrap_err();
        assert!(matches!(err, CoreError::Schema { .. }), "{err}");
        assert!(registry.validate_all().is_err());
    }

    #[test]
    fn standard_field_clash_is_rejected() {
        let registry = registry();
        registry
            .register(MetaDefinition::new("Note").field(FieldDefinition::new("owner", FieldType::Data)))
            .unwrap();
        assert!(matches!(
            registry.get_meta("Note").unwrap_err(),
            CoreError::Schema { .. }
        ));

        // redeclaring the identifier is allowed
        registry
            .register(
                MetaDefinition::new("Country")
                    .field(FieldDefinition::new("name", FieldType::Data).label("Country Name")),
            )
            .unwrap();
        let country = registry.get_meta("Country").unwrap();
        assert_eq!(country.label_of("name"), "Country Name");
        assert!(country.get_field("name").unwrap().required);
    }

    #[test]
    fn unknown_fieldtype_until_registered() {
        let registry = registry();
        registry
            .register(
                MetaDefinition::new("Review")
                    .field(FieldDefinition::new("stars", FieldType::from("Rating"))),
            )
            .unwrap();
        assert!(registry.get_meta("Review").is_err());

        registry.register_fieldtype(FieldType::from("Rating"), ColumnType::Integer);
        let review = registry.get_meta("Review").unwrap();
        assert_eq!(review.column_type("stars"), Some(ColumnType::Integer));
    }

    #[test]
    fn structural_fields_need_child_doctypes() {
        let registry = registry();
        registry
            .register(
                MetaDefinition::new("Order")
                    .field(FieldDefinition::new("lines", FieldType::Table).childtype("Missing")),
            )
            .unwrap();
        assert!(registry.get_meta("Order").is_err());

        registry
            .register(MetaDefinition::new("ToDo").field(FieldDefinition::new("subject", FieldType::Data)))
            .unwrap();
        registry
            .register(
                MetaDefinition::new("Order")
                    .field(FieldDefinition::new("lines", FieldType::Table).childtype("ToDo")),
            )
            .unwrap();
        let err = registry.get_meta("Order").unwrap_err();
        assert!(err.to_string().contains("not a child doctype"), "{err}");
    }

    #[test]
    fn unknown_doctype_is_not_found() {
        assert!(matches!(
            registry().get_meta("Nope").unwrap_err(),
            CoreError::NotFound { .. }
        ));
    }

    #[test]
    fn based_on_merges_and_shares_functions() {
        let registry = registry();
        registry
            .register(
                MetaDefinition::new("Party")
                    .field(FieldDefinition::new("party_name", FieldType::Data).required())
                    .field(FieldDefinition::new("is_customer", FieldType::Check))
                    .field(FieldDefinition::new("display", FieldType::Data).read_only()),
            )
            .unwrap();
        registry
            .register(
                MetaDefinition::new("Customer")
                    .based_on("Party")
                    .filter("is_customer", 1)
                    .field(FieldDefinition::new("sales_rep", FieldType::Data)),
            )
            .unwrap();
        registry.register_formula("Party", "display", |_, _| Value::from("x"));

        let customer = registry.get_meta("Customer").unwrap();
        assert_eq!(customer.base_doctype(), "Party");
        assert_eq!(customer.filters().get("is_customer"), Some(&Value::Int(1)));
        assert!(customer.get_field("display").unwrap().has_formula());
        assert_eq!(customer.keyword_fields(), ["party_name".to_string()]);
        assert_eq!(
            names(customer.valid_fields(false))[6..].to_vec(),
            vec!["party_name", "is_customer", "display", "sales_rep"]
        );
    }

    #[test]
    fn changes_reach_every_level_of_a_chain() {
        let registry = registry();
        registry
            .register(MetaDefinition::new("A").field(FieldDefinition::new("a1", FieldType::Data)))
            .unwrap();
        registry
            .register(
                MetaDefinition::new("B")
                    .based_on("A")
                    .field(FieldDefinition::new("b1", FieldType::Data)),
            )
            .unwrap();
        registry.register(MetaDefinition::new("C").based_on("B")).unwrap();
        assert!(registry.get_meta("C").unwrap().get_field("b1").is_some());

        registry
            .register(
                MetaDefinition::new("B")
                    .based_on("A")
                    .field(FieldDefinition::new("b1", FieldType::Data))
                    .field(FieldDefinition::new("b2", FieldType::Int)),
            )
            .unwrap();
        assert!(registry.get_meta("C").unwrap().get_field("b2").is_some());

        registry
            .register(MetaDefinition::new("Line").child().field(FieldDefinition::new("x", FieldType::Float)))
            .unwrap();
        registry
            .register(
                MetaDefinition::new("Sheet")
                    .child()
                    .field(FieldDefinition::new("lines", FieldType::Table).childtype("Line")),
            )
            .unwrap();
        registry
            .register(
                MetaDefinition::new("Book")
                    .field(FieldDefinition::new("sheets", FieldType::Table).childtype("Sheet")),
            )
            .unwrap();
        assert!(!registry.get_meta("Book").unwrap().has_formula());

        registry.register_formula("Line", "x", |_, _| Value::Float(1.0));
        assert!(registry.get_meta("Book").unwrap().has_formula());
    }

    #[test]
    fn circular_based_on_is_rejected() {
        let registry = registry();
        registry.register(MetaDefinition::new("A").based_on("B")).unwrap();
        registry.register(MetaDefinition::new("B").based_on("A")).unwrap();
        assert!(matches!(
            registry.get_meta("A").unwrap_err(),
            CoreError::Schema { .. }
        ));
    }

    #[test]
    fn keyword_fields_fallback() {
        let registry = registry();
        registry.register(MetaDefinition::new("Tag")).unwrap();
        assert_eq!(registry.get_meta("Tag").unwrap().keyword_fields(), ["name".to_string()]);
    }

    #[test]
    fn unregistered_validator_is_a_schema_error() {
        let registry = registry();
        registry
            .register(
                MetaDefinition::new("Contact")
                    .field(FieldDefinition::new("email", FieldType::Data).validator("email"))
                    .field(FieldDefinition::new("vat", FieldType::Data).validator("vat_id")),
            )
            .unwrap();
        assert!(registry.get_meta("Contact").is_err());

        registry.register_validator("vat_id", |_, _| Ok(()));
        let contact = registry.get_meta("Contact").unwrap();
        assert!(contact.get_field("email").unwrap().validator_fn().is_some());
    }

    #[test]
    fn reload_picks_up_new_definition() {
        let registry = registry();
        registry.register(MetaDefinition::new("Tag")).unwrap();
        assert!(!registry.get_meta("Tag").unwrap().has_field("color"));

        registry
            .register(MetaDefinition::new("Tag").field(FieldDefinition::new("color", FieldType::Color)))
            .unwrap();
        registry.reload("Tag");
        assert!(registry.get_meta("Tag").unwrap().has_field("color"));
    }

    #[test]
    fn load_stored_skips_registered() {
        let registry = registry();
        let mut values = Row::new();
        values.insert("name".into(), Value::from("Book"));
        values.insert("naming".into(), Value::from("autoincrement"));
        let mut field = Row::new();
        field.insert("fieldname".into(), Value::from("title"));
        field.insert("fieldtype".into(), Value::from("Data"));
        let mut record = Record::new(values);
        record.children.insert("fields".into(), vec![field]);

        let mut builtin_values = Row::new();
        builtin_values.insert("name".into(), Value::from("DocType"));
        let builtin_record = Record::new(builtin_values);

        let loaded = registry.load_stored(&[record, builtin_record]).unwrap();
        assert_eq!(loaded, vec!["Book"]);
        let book = registry.get_meta("Book").unwrap();
        assert_eq!(book.naming(), &Naming::Autoincrement);
        assert!(book.has_field("title"));
        assert!(registry.get_meta("DocType").unwrap().has_field("fields"));
    }

    #[test]
    fn builtins_validate() {
        let registry = registry();
        assert_eq!(registry.validate_all().unwrap(), 5);
        let docfield = registry.get_meta("DocField").unwrap();
        assert!(docfield.is_child());
        assert!(docfield.get_field("fieldname").unwrap().has_formula());
    }
}
