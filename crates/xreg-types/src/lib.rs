//! Foundation types for the xRegistry server.
//!
//! Every other `xreg-*` crate depends on this one.
//!
//! # Key Types
//!
//! - [`Value`]: tagged attribute value (null, bool, int, decimal, string, array, object)
//! - [`PropPath`]: path into a nested attribute (`labels.env`, `list[0]`, `a['x.y']`)
//! - [`Xid`]: absolute entity identifier (`/dirs/d1/files/f1/versions/v1`)
//! - [`EntityKind`]: registry, group, resource, meta, version

pub mod error;
pub mod path;
pub mod time;
pub mod value;
pub mod xid;

pub use error::TypeError;
pub use path::{PathSegment, PropPath};
pub use time::{format_timestamp, normalize_timestamp, now_timestamp};
pub use value::{Object, Value};
pub use xid::{new_uuid, EntityKind, Xid};

/// The xRegistry specification version this server implements.
pub const SPECVERSION: &str = "1.0-rc1";
