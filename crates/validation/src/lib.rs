//! Declarative constraint compiler: attribute-described objects become a
//! compiled `ConstraintDescriptor` tree, walked by a sanitize-then-validate
//! pipeline with extension-registered rules.

pub mod descriptor;
pub mod registry;
pub mod rules;
pub mod sanitizers;
pub mod validator;

pub use descriptor::{
    CollectionConstraint, ConditionalConstraint, FieldDescriptor, FieldsMatchConstraint, ObjectDescriptor,
    ObjectDescriptorBuilder, Rule, SanitizeFilter,
};
pub use registry::{ConstraintRegistry, ExtensionRule, RegistryStatistics};
pub use rules::{MessageFn, RuleEvaluator};
pub use validator::{ErrorEnvelope, ErrorMap, ValidationOutcome, Validator};
