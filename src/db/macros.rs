//! Argument construction macro.

/// Build a `Vec<Value>` from plain Rust values.
///
/// # Example
///
/// ```
/// use resilient_sql::{Value, args};
///
/// let args = args![42, "alice", None::<i64>];
/// assert_eq!(args[2], Value::Null);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Value>::new()
    };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::Value::from($value)),+]
    };
}
