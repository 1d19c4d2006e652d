//! Database dispatch macros for reducing code duplication.
//!
//! The sqlx driver wraps one native connection type per brand. These macros
//! generate the per-brand match arms while keeping each arm readable.

/// Macro for generating native connection dispatch match arms.
///
/// This macro generates match arms for `SqlxConnection` variants, reducing the
/// need to manually write repetitive match statements.
///
/// # Example
///
/// ```ignore
/// impl_native_dispatch!(conn, {
///     MySql(c) => do_mysql(c),
///     Postgres(c) => do_postgres(c),
///     Sqlite(c) => do_sqlite(c),
/// });
/// ```
#[macro_export]
macro_rules! impl_native_dispatch {
    ($conn:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $conn {
            $(
                $crate::db::sqlx_driver::SqlxConnection::$variant($c) => $body,
            )+
        }
    };
}

pub use impl_native_dispatch;
