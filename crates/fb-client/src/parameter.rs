//! Statement parameters.

use fb_protocol::Charset;
use fb_types::{DbType, SqlValue, ToSql};

/// How a parameter passes data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParameterDirection {
    /// Value sent to the server.
    #[default]
    Input,
    /// Value returned by a procedure.
    Output,
    /// Value sent and returned.
    InputOutput,
    /// Procedure return value.
    ReturnValue,
}

impl ParameterDirection {
    /// Whether the parameter is bound to an input slot.
    #[must_use]
    pub fn is_input(self) -> bool {
        matches!(self, Self::Input | Self::InputOutput)
    }

    /// Whether the parameter receives a value after execution.
    #[must_use]
    pub fn is_output(self) -> bool {
        matches!(self, Self::Output | Self::InputOutput | Self::ReturnValue)
    }
}

/// Canonical form of a parameter name: lowercase with an `@` prefix.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let name = name.trim();
    let bare = name.strip_prefix('@').unwrap_or(name);
    format!("@{}", bare.to_lowercase())
}

/// A named, typed statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    db_type: Option<DbType>,
    size: u32,
    direction: ParameterDirection,
    value: SqlValue,
    charset: Option<Charset>,
}

impl Parameter {
    /// An input parameter whose type is inferred from its value.
    pub fn new(name: impl Into<String>, value: impl ToSql) -> Self {
        Self {
            name: name.into(),
            db_type: None,
            size: 0,
            direction: ParameterDirection::Input,
            value: value.to_sql(),
            charset: None,
        }
    }

    /// An output parameter of the given type.
    pub fn output(name: impl Into<String>, db_type: DbType) -> Self {
        Self {
            name: name.into(),
            db_type: Some(db_type),
            size: 0,
            direction: ParameterDirection::Output,
            value: SqlValue::Null,
            charset: None,
        }
    }

    /// Declare the logical type.
    #[must_use]
    pub fn with_db_type(mut self, db_type: DbType) -> Self {
        self.db_type = Some(db_type);
        self
    }

    /// Declare the size in characters (or bytes for binary data).
    #[must_use]
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    /// Set the direction.
    #[must_use]
    pub fn with_direction(mut self, direction: ParameterDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Override the character set used to encode the value.
    #[must_use]
    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = Some(charset);
        self
    }

    /// Parameter name as declared.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type, or the type inferred from the value.
    #[must_use]
    pub fn db_type(&self) -> DbType {
        self.db_type.unwrap_or_else(|| DbType::infer(&self.value))
    }

    /// Declared size, or the size of the current value.
    #[must_use]
    pub fn size(&self) -> u32 {
        if self.size > 0 {
            return self.size;
        }
        let inferred = match &self.value {
            SqlValue::String(s) => s.chars().count(),
            SqlValue::Binary(b) => b.len(),
            SqlValue::Guid(_) => 16,
            _ => 0,
        };
        u32::try_from(inferred).unwrap_or(u32::MAX)
    }

    /// Direction.
    #[must_use]
    pub fn direction(&self) -> ParameterDirection {
        self.direction
    }

    /// Current value.
    #[must_use]
    pub fn value(&self) -> &SqlValue {
        &self.value
    }

    /// Character set override.
    #[must_use]
    pub fn charset(&self) -> Option<Charset> {
        self.charset
    }

    /// Replace the value.
    pub fn set_value(&mut self, value: impl ToSql) {
        self.value = value.to_sql();
    }

    pub(crate) fn set_output(&mut self, value: SqlValue) {
        self.value = value;
    }

    fn matches(&self, normalized: &str) -> bool {
        normalize_name(&self.name) == normalized
    }
}

/// The ordered parameters of a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterCollection {
    params: Vec<Parameter>,
}

impl ParameterCollection {
    /// An empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter.
    pub fn add(&mut self, param: Parameter) -> &mut Parameter {
        self.params.push(param);
        let last = self.params.len() - 1;
        &mut self.params[last]
    }

    /// Append an input parameter with a value.
    pub fn add_with_value(&mut self, name: impl Into<String>, value: impl ToSql) -> &mut Parameter {
        self.add(Parameter::new(name, value))
    }

    /// Parameter at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Parameter> {
        self.params.get(index)
    }

    /// Mutable parameter at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Parameter> {
        self.params.get_mut(index)
    }

    /// Index of the parameter called `name`. The `@` prefix and case are
    /// ignored.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        let normalized = normalize_name(name);
        self.params.iter().position(|p| p.matches(&normalized))
    }

    /// Parameter called `name`.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&Parameter> {
        self.position(name).map(|i| &self.params[i])
    }

    /// Mutable parameter called `name`.
    pub fn by_name_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.position(name).map(|i| &mut self.params[i])
    }

    /// Remove all parameters.
    pub fn clear(&mut self) {
        self.params.clear();
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Iterate in declaration order.
    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.params.iter()
    }

    /// Indices of input parameters in declaration order.
    #[must_use]
    pub fn input_indices(&self) -> Vec<usize> {
        self.indices_where(ParameterDirection::is_input)
    }

    /// Indices of output parameters in declaration order.
    #[must_use]
    pub fn output_indices(&self) -> Vec<usize> {
        self.indices_where(ParameterDirection::is_output)
    }

    fn indices_where(&self, pred: impl Fn(ParameterDirection) -> bool) -> Vec<usize> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| pred(p.direction))
            .map(|(i, _)| i)
            .collect()
    }
}

impl<'a> IntoIterator for &'a ParameterCollection {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}
