//! Source and destination store clients.
//!
//! This module provides the store traits ([`SourceStore`], [`Warehouse`]),
//! the PostgreSQL source ([`PostgresSource`]), and the Snowflake SQL API
//! client ([`SnowflakeClient`]) with its authentication types ([`Auth`],
//! [`AuthType`]) and stage uploads ([`StageUploader`]).

mod auth;
mod postgres;
mod snowflake;
mod store;
mod transfer;

pub use auth::{Auth, AuthType};
pub use postgres::{PostgresSource, column_type, text_cast_query};
pub use snowflake::{
    DEFAULT_STATEMENT_TIMEOUT, SnowflakeClient, SnowflakeSession, StatementContext, put_statement,
};
pub use store::{ResultSet, SourceStore, Warehouse, WarehouseSession};
pub use transfer::StageUploader;
