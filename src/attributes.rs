use std::fmt;

use thiserror::Error;

#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Float(f32),
    Int(i32),
    Text(String),
}

/// A `name=value` pair stamped into the output file's header.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            AttributeValue::Float(v) => write!(f, "{}={}", self.name, v),
            AttributeValue::Int(v) => write!(f, "{}={}", self.name, v),
            AttributeValue::Text(v) => write!(f, "{}={}", self.name, v),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum AttributeError {
    #[error("attribute '{0}' must be of the form name=value")]
    MissingSeparator(String),
    #[error("attribute '{0}' has an empty name")]
    EmptyName(String),
    #[error("attribute '{0}' has an invalid float value")]
    InvalidFloat(String),
    #[error("attribute '{0}' has an invalid int value")]
    InvalidInt(String),
}

fn split(raw: &str) -> Result<(&str, &str), AttributeError> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| AttributeError::MissingSeparator(raw.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(AttributeError::EmptyName(raw.to_string()));
    }
    Ok((name, value))
}

pub fn parse_float(raw: &str) -> Result<Attribute, AttributeError> {
    let (name, value) = split(raw)?;
    let value = value
        .trim()
        .parse::<f32>()
        .map_err(|_| AttributeError::InvalidFloat(raw.to_string()))?;
    Ok(Attribute {
        name: name.to_string(),
        value: AttributeValue::Float(value),
    })
}

pub fn parse_int(raw: &str) -> Result<Attribute, AttributeError> {
    let (name, value) = split(raw)?;
    let value = value
        .trim()
        .parse::<i32>()
        .map_err(|_| AttributeError::InvalidInt(raw.to_string()))?;
    Ok(Attribute {
        name: name.to_string(),
        value: AttributeValue::Int(value),
    })
}

pub fn parse_text(raw: &str) -> Result<Attribute, AttributeError> {
    let (name, value) = split(raw)?;
    Ok(Attribute {
        name: name.to_string(),
        value: AttributeValue::Text(value.to_string()),
    })
}

/// Parses every attribute option, collecting all failures rather than
/// stopping at the first.
pub fn parse_all(
    floats: &[String],
    ints: &[String],
    texts: &[String],
) -> Result<Vec<Attribute>, Vec<AttributeError>> {
    let parsed = floats
        .iter()
        .map(|s| parse_float(s))
        .chain(ints.iter().map(|s| parse_int(s)))
        .chain(texts.iter().map(|s| parse_text(s)));
    let mut attributes = Vec::new();
    let mut errors = Vec::new();
    for result in parsed {
        match result {
            Ok(attribute) => attributes.push(attribute),
            Err(err) => errors.push(err),
        }
    }
    if errors.is_empty() {
        Ok(attributes)
    } else {
        Err(errors)
    }
}
