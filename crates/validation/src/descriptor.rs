//! C7 descriptor tree: `{className -> {fieldName -> [rule records]}}`,
//! populated by a builder API instead of reflection (§9).

use serde_json::Value;

/// A single constraint attached to a field: a rule name plus its
/// string-form arguments, e.g. `min` with args `["3"]`.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub args: Vec<String>,
}

impl Rule {
    pub fn named(name: impl Into<String>, args: Vec<String>) -> Self {
        Self { name: name.into(), args }
    }

    pub fn required() -> Self {
        Self::named("required", vec![])
    }

    pub fn string() -> Self {
        Self::named("string", vec![])
    }

    pub fn int() -> Self {
        Self::named("int", vec![])
    }

    pub fn min(n: f64) -> Self {
        Self::named("min", vec![n.to_string()])
    }

    pub fn max(n: f64) -> Self {
        Self::named("max", vec![n.to_string()])
    }

    pub fn between(a: f64, b: f64) -> Self {
        Self::named("between", vec![a.to_string(), b.to_string()])
    }

    pub fn email() -> Self {
        Self::named("email", vec![])
    }

    pub fn in_list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::named("in", values.into_iter().map(Into::into).collect())
    }
}

/// Built-in sanitizers, applied in declaration order before rules run.
/// Sanitizers never fail; they transform the value in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizeFilter {
    Trim,
    StripTags,
    SanitizeEmail,
    SanitizeString,
    Intval,
    Floatval,
    Boolval,
    Lowercase,
    Uppercase,
    NormalizeWhitespace,
    RemoveWhitespace,
    SanitizeUrl,
    RemoveHtml,
    Alphanumeric,
    Alpha,
    Numeric,
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub sanitizers: Vec<SanitizeFilter>,
    pub rules: Vec<Rule>,
}

/// `FieldsMatch(a, b, caseSensitive)`: both empty is OK, otherwise the two
/// fields' sanitized values must compare equal.
#[derive(Debug, Clone)]
pub struct FieldsMatchConstraint {
    pub a: String,
    pub b: String,
    pub case_sensitive: bool,
}

/// `when(gateField == gateValue).then([(targetField, rule), ...])`.
#[derive(Debug, Clone)]
pub struct ConditionalConstraint {
    pub gate_field: String,
    pub gate_value: Value,
    pub rules: Vec<(String, Rule)>,
}

/// Applies `element_rules` to every element of an array field.
#[derive(Debug, Clone)]
pub struct CollectionConstraint {
    pub field: String,
    pub element_rules: Vec<Rule>,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectDescriptor {
    pub class_name: String,
    pub fields: Vec<FieldDescriptor>,
    pub fields_match: Vec<FieldsMatchConstraint>,
    pub conditionals: Vec<ConditionalConstraint>,
    pub collections: Vec<CollectionConstraint>,
}

pub struct ObjectDescriptorBuilder {
    descriptor: ObjectDescriptor,
}

impl ObjectDescriptorBuilder {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            descriptor: ObjectDescriptor {
                class_name: class_name.into(),
                ..Default::default()
            },
        }
    }

    pub fn field(
        mut self,
        name: impl Into<String>,
        sanitizers: Vec<SanitizeFilter>,
        rules: Vec<Rule>,
    ) -> Self {
        self.descriptor.fields.push(FieldDescriptor {
            name: name.into(),
            sanitizers,
            rules,
        });
        self
    }

    pub fn fields_match(
        mut self,
        a: impl Into<String>,
        b: impl Into<String>,
        case_sensitive: bool,
    ) -> Self {
        self.descriptor.fields_match.push(FieldsMatchConstraint {
            a: a.into(),
            b: b.into(),
            case_sensitive,
        });
        self
    }

    pub fn when(
        mut self,
        gate_field: impl Into<String>,
        gate_value: Value,
        rules: Vec<(String, Rule)>,
    ) -> Self {
        self.descriptor.conditionals.push(ConditionalConstraint {
            gate_field: gate_field.into(),
            gate_value,
            rules,
        });
        self
    }

    pub fn collection(mut self, field: impl Into<String>, element_rules: Vec<Rule>) -> Self {
        self.descriptor.collections.push(CollectionConstraint {
            field: field.into(),
            element_rules,
        });
        self
    }

    pub fn build(self) -> ObjectDescriptor {
        self.descriptor
    }
}

impl ObjectDescriptor {
    pub fn builder(class_name: impl Into<String>) -> ObjectDescriptorBuilder {
        ObjectDescriptorBuilder::new(class_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_assembles_field_descriptors_in_order() {
        let descriptor = ObjectDescriptor::builder("Person")
            .field("name", vec![SanitizeFilter::Trim], vec![Rule::required(), Rule::min(3.0)])
            .field("age", vec![SanitizeFilter::Intval], vec![Rule::between(18.0, 99.0)])
            .build();

        assert_eq!(descriptor.class_name, "Person");
        assert_eq!(descriptor.fields.len(), 2);
        assert_eq!(descriptor.fields[0].name, "name");
        assert_eq!(descriptor.fields[0].rules.len(), 2);
    }
}
