//! Database dispatch macros for reducing code duplication.
//!
//! The backend enums (`DbPool`, `DbConnection`) all carry the same three
//! variants. When every arm does the same thing with a differently typed
//! payload, these macros expand the match so each arm type-checks on its own.

/// Run the same expression against whichever backend a value holds.
///
/// # Example
///
/// ```ignore
/// dispatch_backend!(DbPool, pool, p => p.close().await);
/// ```
macro_rules! dispatch_backend {
    ($enum:ident, $value:expr, $p:ident => $body:expr) => {
        match $value {
            $enum::MySql($p) => $body,
            $enum::Postgres($p) => $body,
            $enum::SQLite($p) => $body,
        }
    };
}

/// Same as `dispatch_backend!` but for backend-specific bodies.
///
/// ```ignore
/// dispatch_each!(DbConnection, conn, {
///     MySql(c) => mysql::run(c).await,
///     Postgres(c) => postgres::run(c).await,
///     SQLite(c) => sqlite::run(c).await,
/// });
/// ```
macro_rules! dispatch_each {
    ($enum:ident, $value:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $enum::$variant($p) => $body,
            )+
        }
    };
}
