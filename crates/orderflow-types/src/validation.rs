//! Configuration validation utilities for the orderflow pipeline.
//!
//! This module provides a flexible and type-safe framework for validating
//! TOML configuration tables. It supports hierarchical validation with
//! nested schemas, custom validators, and detailed error reporting.

use thiserror::Error;

/// Errors that can occur during configuration validation.
#[derive(Debug, Error)]
pub enum ValidationError {
	/// Error that occurs when a required field is missing.
	#[error("Missing required field: {0}")]
	MissingField(String),
	/// Error that occurs when a field has an invalid value.
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
	/// Error that occurs when field type is incorrect.
	#[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
	TypeMismatch {
		field: String,
		expected: String,
		actual: String,
	},
}

/// Represents the type of a configuration field.
#[derive(Debug)]
pub enum FieldType {
	/// A string value.
	String,
	/// An integer value with optional minimum and maximum bounds.
	Integer {
		/// Minimum allowed value (inclusive).
		min: Option<i64>,
		/// Maximum allowed value (inclusive).
		max: Option<i64>,
	},
	/// A floating-point value with optional bounds. Integer literals are
	/// accepted and widened.
	Float {
		min: Option<f64>,
		max: Option<f64>,
	},
	/// A boolean value (true/false).
	Boolean,
	/// A nested table with its own schema.
	Table(Schema),
}

/// Type alias for field validator functions.
///
/// Validators are custom functions that can perform additional validation
/// beyond type checking. They receive a TOML value and return an error
/// message if validation fails.
pub type FieldValidator = Box<dyn Fn(&toml::Value) -> Result<(), String> + Send + Sync>;

/// Represents a field in a configuration schema.
///
/// A field has a name, a type, and an optional custom validator function.
/// Fields can be either required or optional within a schema.
pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub validator: Option<FieldValidator>,
}

impl std::fmt::Debug for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Field")
			.field("name", &self.name)
			.field("field_type", &self.field_type)
			.field("validator", &self.validator.is_some())
			.finish()
	}
}

impl Field {
	/// Creates a new field with the given name and type.
	pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			validator: None,
		}
	}

	/// Adds a custom validator to this field.
	///
	/// The validator function receives the field's value and should return
	/// an error message if validation fails.
	pub fn with_validator<F>(mut self, validator: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(validator));
		self
	}
}

/// Defines a validation schema for TOML configuration.
///
/// A schema consists of required fields that must be present and optional
/// fields that may be present. Schemas can be nested to validate complex
/// hierarchical configurations. Unknown fields are ignored.
#[derive(Debug)]
pub struct Schema {
	pub required: Vec<Field>,
	pub optional: Vec<Field>,
}

impl Schema {
	/// Creates a new schema with required and optional fields.
	pub fn new(required: Vec<Field>, optional: Vec<Field>) -> Self {
		Self { required, optional }
	}

	/// Validates a TOML value against this schema.
	pub fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let table = config.as_table().ok_or_else(|| ValidationError::TypeMismatch {
			field: "<root>".into(),
			expected: "table".into(),
			actual: type_name(config).into(),
		})?;

		for field in &self.required {
			match table.get(&field.name) {
				Some(value) => validate_field(field, value)?,
				None => return Err(ValidationError::MissingField(field.name.clone())),
			}
		}

		for field in &self.optional {
			if let Some(value) = table.get(&field.name) {
				validate_field(field, value)?;
			}
		}

		Ok(())
	}
}

fn validate_field(field: &Field, value: &toml::Value) -> Result<(), ValidationError> {
	check_type(&field.name, &field.field_type, value)?;

	if let Some(validator) = &field.validator {
		validator(value).map_err(|message| ValidationError::InvalidValue {
			field: field.name.clone(),
			message,
		})?;
	}

	Ok(())
}

fn check_type(name: &str, field_type: &FieldType, value: &toml::Value) -> Result<(), ValidationError> {
	let mismatch = |expected: &str| ValidationError::TypeMismatch {
		field: name.to_string(),
		expected: expected.to_string(),
		actual: type_name(value).to_string(),
	};

	match field_type {
		FieldType::String => {
			value.as_str().ok_or_else(|| mismatch("string"))?;
			Ok(())
		}
		FieldType::Integer { min, max } => {
			let v = value.as_integer().ok_or_else(|| mismatch("integer"))?;
			check_bounds(name, v, *min, *max)
		}
		FieldType::Float { min, max } => {
			let v = value
				.as_float()
				.or_else(|| value.as_integer().map(|i| i as f64))
				.ok_or_else(|| mismatch("float"))?;
			check_bounds(name, v, *min, *max)
		}
		FieldType::Boolean => {
			value.as_bool().ok_or_else(|| mismatch("boolean"))?;
			Ok(())
		}
		FieldType::Table(schema) => schema.validate(value),
	}
}

fn check_bounds<T: PartialOrd + std::fmt::Display>(
	name: &str,
	value: T,
	min: Option<T>,
	max: Option<T>,
) -> Result<(), ValidationError> {
	if let Some(min) = min {
		if value < min {
			return Err(ValidationError::InvalidValue {
				field: name.to_string(),
				message: format!("{} is below the minimum of {}", value, min),
			});
		}
	}
	if let Some(max) = max {
		if value > max {
			return Err(ValidationError::InvalidValue {
				field: name.to_string(),
				message: format!("{} exceeds the maximum of {}", value, max),
			});
		}
	}
	Ok(())
}

fn type_name(value: &toml::Value) -> &'static str {
	match value {
		toml::Value::String(_) => "string",
		toml::Value::Integer(_) => "integer",
		toml::Value::Float(_) => "float",
		toml::Value::Boolean(_) => "boolean",
		toml::Value::Datetime(_) => "datetime",
		toml::Value::Array(_) => "array",
		toml::Value::Table(_) => "table",
	}
}

/// Trait implemented by components that validate their own TOML section.
pub trait ConfigSchema: Send + Sync {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError>;
}
