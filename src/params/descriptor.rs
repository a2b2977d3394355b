use crate::config::ConfigError;
use crate::validator::SchemaValidator;
use crate::value::BoundaryValue;
use std::fmt;
use std::sync::Arc;

/// Where a parameter's raw value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterSource {
    Path,
    Query,
    Header,
    Cookie,
    Body,
    /// Injected from the request's dependency bag
    Implicit,
}

impl ParameterSource {
    /// First segment of an error `loc`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ParameterSource::Path => "path",
            ParameterSource::Query => "query",
            ParameterSource::Header => "header",
            ParameterSource::Cookie => "cookie",
            ParameterSource::Body => "body",
            ParameterSource::Implicit => "implicit",
        }
    }
}

impl fmt::Display for ParameterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    /// Accept whatever arrives, uncoerced
    Any,
    String,
    Int,
    Float,
    Bool,
    List(Box<ParamType>),
    Map,
    Bytes,
    /// Uploaded file from the request's `files` map
    File,
    /// Resolved by a registered custom resolver
    Custom(String),
}

impl ParamType {
    #[must_use]
    pub fn list_of(inner: ParamType) -> Self {
        ParamType::List(Box::new(inner))
    }

    #[must_use]
    pub fn name(&self) -> String {
        match self {
            ParamType::Any => "any".to_string(),
            ParamType::String => "string".to_string(),
            ParamType::Int => "int".to_string(),
            ParamType::Float => "float".to_string(),
            ParamType::Bool => "bool".to_string(),
            ParamType::List(inner) => format!("list[{}]", inner.name()),
            ParamType::Map => "map".to_string(),
            ParamType::Bytes => "bytes".to_string(),
            ParamType::File => "file".to_string(),
            ParamType::Custom(name) => name.clone(),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Produces a fresh default on every resolution.
pub type DefaultFactory = Arc<dyn Fn() -> BoundaryValue + Send + Sync>;

#[derive(Clone, Default)]
pub enum DefaultValue {
    #[default]
    None,
    Literal(BoundaryValue),
    Factory(DefaultFactory),
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::None => f.write_str("None"),
            DefaultValue::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            DefaultValue::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Static metadata for one handler parameter.
#[derive(Debug, Clone)]
pub struct ParameterDescriptor {
    name: String,
    source: ParameterSource,
    param_type: ParamType,
    alias: Option<String>,
    required: bool,
    default: DefaultValue,
    convert_header_underscores: bool,
    schema: Option<Arc<SchemaValidator>>,
    sensitive: bool,
}

impl ParameterDescriptor {
    /// Start describing a parameter. Defaults: type `Any`, required, header underscore
    /// conversion on.
    pub fn builder(name: impl Into<String>, source: ParameterSource) -> ParameterDescriptorBuilder {
        ParameterDescriptorBuilder {
            name: name.into(),
            source,
            param_type: ParamType::Any,
            alias: None,
            required: true,
            literal: None,
            factory: None,
            convert_header_underscores: true,
            schema: None,
            sensitive: false,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn source(&self) -> ParameterSource {
        self.source
    }

    #[must_use]
    pub fn param_type(&self) -> &ParamType {
        &self.param_type
    }

    #[must_use]
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    #[must_use]
    pub fn required(&self) -> bool {
        self.required
    }

    #[must_use]
    pub fn default(&self) -> &DefaultValue {
        &self.default
    }

    /// True for any literal default, including `0`, `false`, `""` and `[]`.
    #[must_use]
    pub fn has_default(&self) -> bool {
        matches!(self.default, DefaultValue::Literal(_))
    }

    #[must_use]
    pub fn has_default_factory(&self) -> bool {
        matches!(self.default, DefaultValue::Factory(_))
    }

    #[must_use]
    pub fn convert_header_underscores(&self) -> bool {
        self.convert_header_underscores
    }

    #[must_use]
    pub fn schema(&self) -> Option<&SchemaValidator> {
        self.schema.as_deref()
    }

    #[must_use]
    pub fn sensitive(&self) -> bool {
        self.sensitive
    }

    /// Header names to try, in order: alias, name, name with `_` → `-`.
    #[must_use]
    pub fn header_candidates(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(3);
        if let Some(alias) = &self.alias {
            names.push(alias.clone());
        }
        names.push(self.name.clone());
        if self.convert_header_underscores && self.name.contains('_') {
            names.push(self.name.replace('_', "-"));
        }
        names
    }

    /// Key used to look the value up in its source (alias wins for non-header sources).
    #[must_use]
    pub fn lookup_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Clone)]
pub struct ParameterDescriptorBuilder {
    name: String,
    source: ParameterSource,
    param_type: ParamType,
    alias: Option<String>,
    required: bool,
    literal: Option<BoundaryValue>,
    factory: Option<DefaultFactory>,
    convert_header_underscores: bool,
    schema: Option<serde_json::Value>,
    sensitive: bool,
}

impl ParameterDescriptorBuilder {
    #[must_use]
    pub fn param_type(mut self, param_type: ParamType) -> Self {
        self.param_type = param_type;
        self
    }

    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    #[must_use]
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    #[must_use]
    pub fn optional(self) -> Self {
        self.required(false)
    }

    /// Literal default. `Null` is treated as "no default".
    #[must_use]
    pub fn default_value(mut self, value: impl Into<BoundaryValue>) -> Self {
        self.literal = Some(value.into());
        self
    }

    #[must_use]
    pub fn default_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> BoundaryValue + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    #[must_use]
    pub fn convert_header_underscores(mut self, convert: bool) -> Self {
        self.convert_header_underscores = convert;
        self
    }

    /// JSON Schema the resolved value must satisfy.
    #[must_use]
    pub fn schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Never echo this parameter's input in error payloads.
    #[must_use]
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn build(self) -> Result<ParameterDescriptor, ConfigError> {
        let literal = self.literal.filter(|v| !v.is_null());
        let default = match (literal, self.factory) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::ConflictingDefaults {
                    parameter: self.name,
                })
            }
            (Some(v), None) => DefaultValue::Literal(v),
            (None, Some(f)) => DefaultValue::Factory(f),
            (None, None) => DefaultValue::None,
        };
        let schema = match self.schema {
            Some(schema) => Some(Arc::new(SchemaValidator::compile(schema).map_err(|e| {
                ConfigError::InvalidSchema {
                    context: format!("parameter '{}'", self.name),
                    message: e.message,
                }
            })?)),
            None => None,
        };
        Ok(ParameterDescriptor {
            name: self.name,
            source: self.source,
            param_type: self.param_type,
            alias: self.alias,
            required: self.required,
            default,
            convert_header_underscores: self.convert_header_underscores,
            schema,
            sensitive: self.sensitive,
        })
    }
}
