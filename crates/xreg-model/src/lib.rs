//! Registry model and schema validation.
//!
//! A [`Model`] describes which Group and Resource types a registry allows
//! and which attributes each level carries. Values arriving from clients
//! are checked with [`validate_object`] before anything is persisted.
//!
//! # Key Types
//!
//! - [`Model`] / [`GroupModel`] / [`ResourceModel`]: the type hierarchy
//! - [`Attribute`] / [`AttributeSet`] / [`Item`]: typed attribute definitions
//! - [`Capabilities`]: the registry's capabilities document

pub mod attribute;
pub mod capabilities;
pub mod error;
pub mod model;
pub mod system;
pub mod validate;

pub use attribute::{AttrType, Attribute, AttributeSet, Item, WILDCARD};
pub use capabilities::Capabilities;
pub use error::{ModelError, ModelResult};
pub use model::{parse_model, AttrHolder, GroupModel, Model, ResourceModel};
pub use system::is_generated;
pub use validate::{
    check_attribute_value, check_attrs, check_required, is_valid_attr_name, relation_matches,
    validate_object,
};
