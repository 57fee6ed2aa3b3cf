//! Transform implementations for row buffers

mod type_coercer;

pub use type_coercer::{CoercionError, TypeCoercer};
