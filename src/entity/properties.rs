//! Flat property bags shared by the world and agents

use ahash::{AHashMap, AHashSet};

use crate::core::error::{OrganelleError, Result};
use crate::rules::value::Value;

pub type PropertyMap = AHashMap<String, Value>;

/// Declared properties win; defaults fill in whatever was not declared
pub fn overlay(declared: &PropertyMap, defaults: &PropertyMap) -> PropertyMap {
    let mut merged = defaults.clone();
    for (key, value) in declared {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Build a property map from a JSON object; non-object input yields an empty map
pub fn property_map_from_json(json: &serde_json::Value) -> Result<PropertyMap> {
    let mut map = PropertyMap::new();
    let Some(object) = json.as_object() else {
        return Ok(map);
    };
    for (key, value) in object {
        let value = Value::from_json(value).ok_or_else(|| {
            OrganelleError::malformed(format!("property '{}' must be a primitive value", key))
        })?;
        map.insert(key.clone(), value);
    }
    Ok(map)
}

#[derive(Debug, Clone, Default)]
pub struct PropertyHolder {
    props: PropertyMap,
    calculated: AHashSet<String>,
}

impl PropertyHolder {
    pub fn new(declared: &PropertyMap, defaults: &PropertyMap) -> Self {
        Self {
            props: overlay(declared, defaults),
            calculated: AHashSet::new(),
        }
    }

    pub fn props(&self) -> &PropertyMap {
        &self.props
    }

    /// Missing properties read as `Null`
    pub fn get(&self, name: &str) -> Value {
        self.props.get(name).cloned().unwrap_or_default()
    }

    pub fn number(&self, name: &str) -> f64 {
        self.props.get(name).map(Value::as_number).unwrap_or(0.0)
    }

    pub fn is_calculated(&self, name: &str) -> bool {
        self.calculated.contains(name)
    }

    /// Write a property. Calculated properties are read-only.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        if self.calculated.contains(name) {
            return Err(OrganelleError::ReadOnlyProperty(name.to_string()));
        }
        self.props.insert(name.to_string(), value.into());
        Ok(())
    }

    pub fn set_many<I, K>(&mut self, properties: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        for (name, value) in properties {
            self.set(name.as_ref(), value)?;
        }
        Ok(())
    }

    /// Overwrite a calculated property wholesale
    pub(crate) fn write_calculated(&mut self, name: &str, value: Value) {
        self.calculated.insert(name.to_string());
        self.props.insert(name.to_string(), value);
    }

    /// Engine-internal write used for position and heading updates
    pub(crate) fn write(&mut self, name: &str, value: impl Into<Value>) {
        self.props.insert(name.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, Value)]) -> PropertyMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_overlay_declared_wins() {
        let declared = map(&[("a", Value::from(1)), ("b", Value::from(false))]);
        let defaults = map(&[("b", Value::from(true)), ("d", Value::from(true))]);
        let merged = overlay(&declared, &defaults);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged["a"], Value::from(1));
        assert_eq!(merged["b"], Value::from(false));
        assert_eq!(merged["d"], Value::from(true));
    }

    #[test]
    fn test_missing_property_is_null() {
        let holder = PropertyHolder::default();
        assert_eq!(holder.get("nope"), Value::Null);
        assert_eq!(holder.number("nope"), 0.0);
    }

    #[test]
    fn test_calculated_properties_are_read_only() {
        let mut holder = PropertyHolder::default();
        holder.write_calculated("saturation", Value::from(0.5));
        assert!(holder.is_calculated("saturation"));
        assert!(matches!(
            holder.set("saturation", 1.0),
            Err(OrganelleError::ReadOnlyProperty(_))
        ));
        holder.write_calculated("saturation", Value::from(0.75));
        assert_eq!(holder.get("saturation"), Value::from(0.75));
    }

    #[test]
    fn test_set_many() {
        let mut holder = PropertyHolder::default();
        holder
            .set_many([("test", Value::from("value1")), ("number", Value::from(3))])
            .unwrap();
        assert_eq!(holder.get("test"), Value::from("value1"));
        assert_eq!(holder.number("number"), 3.0);
    }

    #[test]
    fn test_property_map_from_json_rejects_nested() {
        let ok = property_map_from_json(&serde_json::json!({"albino": true, "speed": 2})).unwrap();
        assert_eq!(ok["speed"], Value::from(2));
        assert!(property_map_from_json(&serde_json::json!({"nested": {"a": 1}})).is_err());
    }
}
