//! Property reflection.
//!
//! Every device object lists its properties in `_MM_properties`, an ordered
//! sequence of 7-element tuples:
//!
//! | index | field        | shape                                  |
//! |-------|--------------|----------------------------------------|
//! | 0     | attribute    | string, attribute name on the object   |
//! | 1     | display name | string, name shown by the host         |
//! | 2     | type tag     | string, see [`TypeTag`]                |
//! | 3     | read-only    | bool                                   |
//! | 4     | min          | number or none                         |
//! | 5     | max          | number or none                         |
//! | 6     | enum table   | mapping key → value, or none           |
//!
//! The type tag dispatch is total: an unknown tag produces an
//! [`PropertyKind::Object`] descriptor, never an error.

use tracing::debug;

use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::hub::DeviceHandle;
use crate::runtime::{Scalar, ScriptRuntime};

/// Attribute listing a device object's declared properties.
pub const PROPERTIES_ATTR: &str = "_MM_properties";

const FIELD_COUNT: usize = 7;

/// Declared type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    /// `"int"`
    Int,
    /// `"float"`
    Float,
    /// `"time"`
    Time,
    /// `"length"`
    Length,
    /// `"string"`
    String,
    /// `"bool"`
    Bool,
    /// `"enum"`
    Enum,
    /// Any other tag.
    Object,
}

impl From<&str> for TypeTag {
    fn from(tag: &str) -> Self {
        match tag {
            "int" => TypeTag::Int,
            "float" => TypeTag::Float,
            "time" => TypeTag::Time,
            "length" => TypeTag::Length,
            "string" => TypeTag::String,
            "bool" => TypeTag::Bool,
            "enum" => TypeTag::Enum,
            _ => TypeTag::Object,
        }
    }
}

/// Kind of a property descriptor, with the data each kind needs.
#[derive(Debug, Clone)]
pub enum PropertyKind<O> {
    /// Whole number.
    Integer,
    /// Floating point number.
    Float,
    /// Duration, converted with the script's millisecond unit.
    Time {
        /// The script's `unit_ms`.
        unit: O,
    },
    /// Distance, converted with the script's micrometer unit.
    Length {
        /// The script's `unit_um`.
        unit: O,
    },
    /// Text.
    String,
    /// Flag, stored by the host as 0 or 1.
    Bool,
    /// Choice between named values. `keys[i]` names `values[i]`.
    Enum {
        /// Option names, in declaration order.
        keys: Vec<String>,
        /// Scripted value of each option.
        values: Vec<O>,
    },
    /// Anything the host has no dedicated type for.
    Object,
}

/// Storage type the host uses for a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPropertyType {
    /// Integer property.
    Integer,
    /// Floating point property.
    Float,
    /// String property.
    String,
}

impl<O> PropertyKind<O> {
    /// Storage type used by the host for this kind.
    pub fn host_type(&self) -> HostPropertyType {
        match self {
            PropertyKind::Integer | PropertyKind::Bool => HostPropertyType::Integer,
            PropertyKind::Float | PropertyKind::Time { .. } | PropertyKind::Length { .. } => {
                HostPropertyType::Float
            }
            PropertyKind::String | PropertyKind::Enum { .. } | PropertyKind::Object => {
                HostPropertyType::String
            }
        }
    }

    /// Whether the host stores this kind as a number that can carry limits.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            PropertyKind::Integer
                | PropertyKind::Float
                | PropertyKind::Time { .. }
                | PropertyKind::Length { .. }
        )
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            PropertyKind::Integer => "int",
            PropertyKind::Float => "float",
            PropertyKind::Time { .. } => "time",
            PropertyKind::Length { .. } => "length",
            PropertyKind::String => "string",
            PropertyKind::Bool => "bool",
            PropertyKind::Enum { .. } => "enum",
            PropertyKind::Object => "object",
        }
    }
}

/// Inclusive numeric limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Lower limit.
    pub min: f64,
    /// Upper limit.
    pub max: f64,
}

/// Typed description of one scripted property.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor<O> {
    /// Attribute name on the scripted object.
    pub attribute: String,
    /// Name shown by the host.
    pub name: String,
    /// Declared kind.
    pub kind: PropertyKind<O>,
    /// Whether the host may only read the property.
    pub read_only: bool,
    /// Limits, only for numeric kinds that declared both ends.
    pub bounds: Option<Bounds>,
}

impl<O> PropertyDescriptor<O> {
    /// Storage type used by the host.
    pub fn host_type(&self) -> HostPropertyType {
        self.kind.host_type()
    }
}

/// Describe the properties a device declares, in declaration order.
///
/// # Errors
///
/// `MalformedMetadata` if `_MM_properties` is missing or not a sequence, if a
/// tuple does not have exactly seven fields, or if a field has the wrong shape.
/// Time and length properties also need the quantity units of a loaded script.
pub fn enumerate_properties<R: ScriptRuntime>(
    ctx: &BridgeContext<R>,
    device: &DeviceHandle<R::Object>,
) -> BridgeResult<Vec<PropertyDescriptor<R::Object>>> {
    let _guard = ctx.acquire();
    let runtime = ctx.runtime();

    let declared = runtime
        .get_attr(device.object(), PROPERTIES_ATTR)?
        .ok_or_else(|| {
            BridgeError::metadata(format!("device {} has no {}", device.id(), PROPERTIES_ATTR))
        })?;

    let descriptors = runtime
        .sequence_items(&declared)?
        .iter()
        .enumerate()
        .map(|(index, tuple)| describe(ctx, tuple, index))
        .collect::<BridgeResult<Vec<_>>>()?;

    debug!(
        device = %device.id(),
        count = descriptors.len(),
        "Enumerated properties"
    );
    Ok(descriptors)
}

fn describe<R: ScriptRuntime>(
    ctx: &BridgeContext<R>,
    tuple: &R::Object,
    index: usize,
) -> BridgeResult<PropertyDescriptor<R::Object>> {
    let runtime = ctx.runtime();
    let fields = runtime.sequence_items(tuple)?;
    if fields.len() != FIELD_COUNT {
        return Err(BridgeError::metadata(format!(
            "property #{} has {} fields, expected {}",
            index,
            fields.len(),
            FIELD_COUNT
        )));
    }

    let attribute = runtime
        .scalar(&fields[0])?
        .into_string(&format!("attribute name of property #{}", index))?;
    let field = |what: &str| format!("{} of property '{}'", what, attribute);

    let name = runtime.scalar(&fields[1])?.into_string(&field("display name"))?;
    let tag = runtime.scalar(&fields[2])?.into_string(&field("type tag"))?;
    let read_only = runtime.scalar(&fields[3])?.into_bool(&field("read-only flag"))?;

    let kind = match TypeTag::from(tag.as_str()) {
        TypeTag::Int => PropertyKind::Integer,
        TypeTag::Float => PropertyKind::Float,
        TypeTag::Time => PropertyKind::Time {
            unit: quantity_unit(ctx, |units| units.ms, &attribute)?,
        },
        TypeTag::Length => PropertyKind::Length {
            unit: quantity_unit(ctx, |units| units.um, &attribute)?,
        },
        TypeTag::String => PropertyKind::String,
        TypeTag::Bool => PropertyKind::Bool,
        TypeTag::Enum => enum_kind(runtime, &fields[6], &attribute)?,
        TypeTag::Object => PropertyKind::Object,
    };

    let bounds = if kind.is_numeric() {
        let min = runtime.scalar(&fields[4])?;
        let max = runtime.scalar(&fields[5])?;
        if min.is_none() || max.is_none() {
            None
        } else {
            Some(Bounds {
                min: min.into_f64(&field("min"))?,
                max: max.into_f64(&field("max"))?,
            })
        }
    } else {
        None
    };

    debug!(
        property = %attribute,
        kind = kind.name(),
        read_only,
        bounded = bounds.is_some(),
        "Described property"
    );
    Ok(PropertyDescriptor {
        attribute,
        name,
        kind,
        read_only,
        bounds,
    })
}

fn quantity_unit<R: ScriptRuntime>(
    ctx: &BridgeContext<R>,
    pick: impl FnOnce(crate::context::QuantityUnits<R::Object>) -> R::Object,
    attribute: &str,
) -> BridgeResult<R::Object> {
    ctx.units().map(pick).ok_or_else(|| {
        BridgeError::metadata(format!(
            "property '{}' is a quantity but no script has defined units",
            attribute
        ))
    })
}

fn enum_kind<R: ScriptRuntime>(
    runtime: &R,
    table: &R::Object,
    attribute: &str,
) -> BridgeResult<PropertyKind<R::Object>> {
    if runtime.scalar(table)?.is_none() {
        return Err(BridgeError::metadata(format!(
            "enum property '{}' has no option table",
            attribute
        )));
    }

    let mut keys = Vec::new();
    let mut values = Vec::new();
    for (key, value) in runtime.mapping_items(table)? {
        let key = match runtime.scalar(&key)? {
            Scalar::Str(key) => key,
            other => {
                return Err(BridgeError::metadata(format!(
                    "option names of enum property '{}' must be strings, found {}",
                    attribute,
                    other.kind()
                )))
            }
        };
        keys.push(key);
        values.push(value);
    }
    Ok(PropertyKind::Enum { keys, values })
}
